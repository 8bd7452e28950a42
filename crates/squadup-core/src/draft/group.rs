// Draft layout: player snapshots, five-slot groups, bench, slot lookup.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::role::{Class, Role};
use crate::roster::{deserialize_sub_attributes, ParticipantId, Signup};

/// A participant as they were when the draft was built. Later roster edits
/// do not show up here unless the draft is explicitly rehydrated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRef {
    pub id: ParticipantId,
    pub display_name: String,
    pub roles: BTreeSet<Role>,
    #[serde(default, deserialize_with = "deserialize_sub_attributes")]
    pub sub_attributes: BTreeMap<Role, Class>,
}

impl PlayerRef {
    pub fn snapshot(participant_id: &str, signup: &Signup) -> Self {
        PlayerRef {
            id: participant_id.to_string(),
            display_name: signup.display_name.clone(),
            roles: signup.roles.clone(),
            sub_attributes: signup.sub_attributes.clone(),
        }
    }

    pub fn is_eligible(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn class_for(&self, role: Role) -> Option<Class> {
        if !self.is_eligible(role) {
            return None;
        }
        self.sub_attributes.get(&role).copied()
    }
}

/// Position inside a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GroupSlot {
    Tank,
    Heal,
    Dps1,
    Dps2,
    Dps3,
}

impl GroupSlot {
    /// Slots in display order.
    pub const ALL: [GroupSlot; 5] = [
        GroupSlot::Tank,
        GroupSlot::Heal,
        GroupSlot::Dps1,
        GroupSlot::Dps2,
        GroupSlot::Dps3,
    ];

    pub fn role(&self) -> Role {
        match self {
            GroupSlot::Tank => Role::Tank,
            GroupSlot::Heal => Role::Heal,
            GroupSlot::Dps1 | GroupSlot::Dps2 | GroupSlot::Dps3 => Role::Dps,
        }
    }

    pub fn display_str(&self) -> &'static str {
        match self {
            GroupSlot::Tank => "tank",
            GroupSlot::Heal => "heal",
            GroupSlot::Dps1 => "dps 1",
            GroupSlot::Dps2 => "dps 2",
            GroupSlot::Dps3 => "dps 3",
        }
    }
}

/// One group: a tank, a healer and three damage dealers. Slots may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub tank: Option<PlayerRef>,
    pub heal: Option<PlayerRef>,
    pub dps: [Option<PlayerRef>; 3],
}

impl Group {
    pub fn slot(&self, slot: GroupSlot) -> Option<&PlayerRef> {
        match slot {
            GroupSlot::Tank => self.tank.as_ref(),
            GroupSlot::Heal => self.heal.as_ref(),
            GroupSlot::Dps1 => self.dps[0].as_ref(),
            GroupSlot::Dps2 => self.dps[1].as_ref(),
            GroupSlot::Dps3 => self.dps[2].as_ref(),
        }
    }

    pub(crate) fn slot_mut(&mut self, slot: GroupSlot) -> &mut Option<PlayerRef> {
        match slot {
            GroupSlot::Tank => &mut self.tank,
            GroupSlot::Heal => &mut self.heal,
            GroupSlot::Dps1 => &mut self.dps[0],
            GroupSlot::Dps2 => &mut self.dps[1],
            GroupSlot::Dps3 => &mut self.dps[2],
        }
    }

    /// Every slot with its occupant, in display order.
    pub fn members(&self) -> impl Iterator<Item = (GroupSlot, Option<&PlayerRef>)> + '_ {
        GroupSlot::ALL.into_iter().map(move |s| (s, self.slot(s)))
    }

    pub fn filled_count(&self) -> usize {
        self.members().filter(|(_, p)| p.is_some()).count()
    }

    pub fn is_full(&self) -> bool {
        self.filled_count() == GroupSlot::ALL.len()
    }
}

/// Where a participant sits in a draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotRef {
    Group { group: usize, slot: GroupSlot },
    Bench { index: usize },
}

impl SlotRef {
    /// Role the slot requires. The bench accepts anyone.
    pub fn required_role(&self) -> Option<Role> {
        match self {
            SlotRef::Group { slot, .. } => Some(slot.role()),
            SlotRef::Bench { .. } => None,
        }
    }
}

impl fmt::Display for SlotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotRef::Group { group, slot } => {
                write!(f, "group {} {}", group + 1, slot.display_str())
            }
            SlotRef::Bench { index } => write!(f, "bench #{}", index + 1),
        }
    }
}

/// The solver's proposed partition, possibly edited by hand afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Draft {
    pub groups: Vec<Group>,
    #[serde(default)]
    pub bench: Vec<PlayerRef>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
}

impl Draft {
    pub fn new(groups: Vec<Group>, bench: Vec<PlayerRef>, created_at: DateTime<Utc>) -> Self {
        Draft {
            groups,
            bench,
            created_at,
        }
    }

    /// Find the slot holding `participant_id`.
    pub fn locate(&self, participant_id: &str) -> Option<SlotRef> {
        for (group_idx, group) in self.groups.iter().enumerate() {
            for (slot, player) in group.members() {
                if player.is_some_and(|p| p.id == participant_id) {
                    return Some(SlotRef::Group {
                        group: group_idx,
                        slot,
                    });
                }
            }
        }
        self.bench
            .iter()
            .position(|p| p.id == participant_id)
            .map(|index| SlotRef::Bench { index })
    }

    pub fn player_at(&self, slot: SlotRef) -> Option<&PlayerRef> {
        match slot {
            SlotRef::Group { group, slot } => self.groups.get(group).and_then(|g| g.slot(slot)),
            SlotRef::Bench { index } => self.bench.get(index),
        }
    }

    pub(crate) fn player_at_mut(&mut self, slot: SlotRef) -> Option<&mut PlayerRef> {
        match slot {
            SlotRef::Group { group, slot } => self
                .groups
                .get_mut(group)
                .and_then(|g| g.slot_mut(slot).as_mut()),
            SlotRef::Bench { index } => self.bench.get_mut(index),
        }
    }

    /// Participant ids in groups, then bench, in display order.
    pub fn participant_ids(&self) -> Vec<&str> {
        let placed = self
            .groups
            .iter()
            .flat_map(|g| g.members().filter_map(|(_, p)| p));
        placed
            .chain(self.bench.iter())
            .map(|p| p.id.as_str())
            .collect()
    }

    /// Number of participants sitting in a group slot.
    pub fn placed_count(&self) -> usize {
        self.groups.iter().map(Group::filled_count).sum()
    }
}
