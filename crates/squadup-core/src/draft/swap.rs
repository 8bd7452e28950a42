// Officer-directed corrections to a draft.

use thiserror::Error;

use super::group::{Draft, PlayerRef, SlotRef};
use crate::role::Role;
use crate::roster::{ParticipantId, Roster};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapError {
    #[error("no draft has been rolled yet")]
    NoDraft,

    #[error("{participant_id} is not in the draft")]
    NotInDraft { participant_id: ParticipantId },

    #[error("{participant_id} cannot fill the {role} slot at {slot}")]
    RoleMismatch {
        participant_id: ParticipantId,
        role: Role,
        slot: SlotRef,
    },
}

/// Where the two participants ended up after a successful swap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapOutcome {
    /// New slot of the first participant.
    pub first: SlotRef,
    /// New slot of the second participant.
    pub second: SlotRef,
    /// Whether a role check was skipped to make the swap happen.
    pub forced_mismatch: bool,
}

impl Draft {
    /// Exchange the slots of two participants.
    ///
    /// Without `force`, each participant must be eligible for the role the
    /// other's slot requires; the bench requires nothing. Nothing changes
    /// unless both checks pass.
    pub fn swap(
        &mut self,
        first: &str,
        second: &str,
        force: bool,
    ) -> Result<SwapOutcome, SwapError> {
        let (first_slot, first_player) = self.occupant(first)?;
        let (second_slot, second_player) = self.occupant(second)?;

        if first_slot == second_slot {
            return Ok(SwapOutcome {
                first: first_slot,
                second: second_slot,
                forced_mismatch: false,
            });
        }

        let first_fits = fits(&first_player, second_slot);
        let second_fits = fits(&second_player, first_slot);

        if !force {
            if let Err(role) = first_fits {
                return Err(SwapError::RoleMismatch {
                    participant_id: first.to_string(),
                    role,
                    slot: second_slot,
                });
            }
            if let Err(role) = second_fits {
                return Err(SwapError::RoleMismatch {
                    participant_id: second.to_string(),
                    role,
                    slot: first_slot,
                });
            }
        }

        self.put(first_slot, second_player);
        self.put(second_slot, first_player);

        Ok(SwapOutcome {
            first: second_slot,
            second: first_slot,
            forced_mismatch: first_fits.is_err() || second_fits.is_err(),
        })
    }

    /// Refresh the display name and class choices of the given participants
    /// from the live roster. Participants who left the roster keep their
    /// snapshot. Returns how many references were refreshed.
    pub fn rehydrate(&mut self, participant_ids: &[&str], roster: &Roster) -> usize {
        let mut refreshed = 0;
        for id in participant_ids {
            let (Some(slot), Some(signup)) = (self.locate(id), roster.get(id)) else {
                continue;
            };
            if let Some(player) = self.player_at_mut(slot) {
                player.display_name = signup.display_name.clone();
                player.sub_attributes = signup.sub_attributes.clone();
                refreshed += 1;
            }
        }
        refreshed
    }

    fn occupant(&self, participant_id: &str) -> Result<(SlotRef, PlayerRef), SwapError> {
        self.locate(participant_id)
            .and_then(|slot| self.player_at(slot).map(|p| (slot, p.clone())))
            .ok_or_else(|| SwapError::NotInDraft {
                participant_id: participant_id.to_string(),
            })
    }

    fn put(&mut self, slot: SlotRef, player: PlayerRef) {
        match slot {
            SlotRef::Group { group, slot } => {
                *self.groups[group].slot_mut(slot) = Some(player);
            }
            SlotRef::Bench { index } => {
                self.bench[index] = player;
            }
        }
    }
}

fn fits(player: &PlayerRef, destination: SlotRef) -> Result<(), Role> {
    match destination.required_role() {
        Some(role) if !player.is_eligible(role) => Err(role),
        _ => Ok(()),
    }
}
