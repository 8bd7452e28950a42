// Roster model: per-participant role eligibility and class choices.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::role::{Class, Role};

/// Participant identifier as handed over by the calling platform.
pub type ParticipantId = String;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RosterError {
    #[error("signups are locked since {locked_at}")]
    Locked { locked_at: DateTime<Utc> },

    #[error("{participant_id} is not signed up as {role}")]
    RoleNotEligible {
        participant_id: ParticipantId,
        role: Role,
    },

    #[error("`{value}` is not a valid class for {role}")]
    InvalidSubAttribute { role: Role, value: String },
}

/// One participant's signup within a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signup {
    /// Roles the participant is willing to fill.
    #[serde(default)]
    pub roles: BTreeSet<Role>,
    #[serde(default)]
    pub display_name: String,
    /// Chosen class per role. May hold entries for roles that were since
    /// toggled off; those are ignored until the role is re-added.
    #[serde(default, deserialize_with = "deserialize_sub_attributes")]
    pub sub_attributes: BTreeMap<Role, Class>,
}

impl Signup {
    pub fn new(display_name: &str) -> Self {
        Signup {
            roles: BTreeSet::new(),
            display_name: display_name.to_string(),
            sub_attributes: BTreeMap::new(),
        }
    }

    pub fn is_eligible(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// The class chosen for `role`, if the role is currently eligible.
    pub fn class_for(&self, role: Role) -> Option<Class> {
        if !self.is_eligible(role) {
            return None;
        }
        self.sub_attributes.get(&role).copied()
    }
}

/// The persisted format allows `null` values; they mean "no class chosen".
pub(crate) fn deserialize_sub_attributes<'de, D>(deserializer: D) -> Result<BTreeMap<Role, Class>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: BTreeMap<Role, Option<Class>> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(role, class)| class.map(|c| (role, c)))
        .collect())
}

/// Eligible-role head counts, used by the solver's feasibility ceiling and
/// for display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCounts {
    pub tanks: usize,
    pub heals: usize,
    pub dps: usize,
    pub total: usize,
}

impl RoleCounts {
    pub fn for_role(&self, role: Role) -> usize {
        match role {
            Role::Tank => self.tanks,
            Role::Heal => self.heals,
            Role::Dps => self.dps,
        }
    }
}

/// All signups for a session, keyed by participant id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Roster {
    signups: BTreeMap<ParticipantId, Signup>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.signups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signups.is_empty()
    }

    pub fn get(&self, participant_id: &str) -> Option<&Signup> {
        self.signups.get(participant_id)
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.signups.contains_key(participant_id)
    }

    /// Signups in participant-id order.
    pub fn iter(&self) -> impl Iterator<Item = (&ParticipantId, &Signup)> {
        self.signups.iter()
    }

    /// Flip `role` for the participant, creating an empty signup first if
    /// needed. Returns whether the participant is eligible for `role`
    /// afterwards.
    ///
    /// A non-empty `display_name` replaces the stored one. Class choices are
    /// never touched.
    pub fn toggle_role(&mut self, participant_id: &str, display_name: &str, role: Role) -> bool {
        let signup = self
            .signups
            .entry(participant_id.to_string())
            .or_insert_with(|| Signup::new(display_name));
        if !display_name.is_empty() {
            signup.display_name = display_name.to_string();
        }

        if signup.roles.remove(&role) {
            false
        } else {
            signup.roles.insert(role);
            true
        }
    }

    /// Set or clear the class for one of the participant's eligible roles.
    pub fn set_class(
        &mut self,
        participant_id: &str,
        role: Role,
        class: Option<Class>,
    ) -> Result<(), RosterError> {
        let signup = self
            .signups
            .get_mut(participant_id)
            .filter(|s| s.is_eligible(role))
            .ok_or_else(|| RosterError::RoleNotEligible {
                participant_id: participant_id.to_string(),
                role,
            })?;

        match class {
            Some(c) if !role.allows(c) => Err(RosterError::InvalidSubAttribute {
                role,
                value: c.display_str().to_string(),
            }),
            Some(c) => {
                signup.sub_attributes.insert(role, c);
                Ok(())
            }
            None => {
                signup.sub_attributes.remove(&role);
                Ok(())
            }
        }
    }

    /// Set or clear a class from free text. Eligibility is checked before the
    /// text is parsed; `none` or an empty string clears. Returns the class now
    /// stored for `role`.
    pub fn set_class_text(
        &mut self,
        participant_id: &str,
        role: Role,
        text: &str,
    ) -> Result<Option<Class>, RosterError> {
        if !self.get(participant_id).is_some_and(|s| s.is_eligible(role)) {
            return Err(RosterError::RoleNotEligible {
                participant_id: participant_id.to_string(),
                role,
            });
        }
        let trimmed = text.trim();
        let class = if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            None
        } else {
            Some(parse_class(role, trimmed)?)
        };
        self.set_class(participant_id, role, class)?;
        Ok(class)
    }

    /// Remove the participant entirely. Returns `false` if they were not
    /// signed up.
    pub fn remove_player(&mut self, participant_id: &str) -> bool {
        self.signups.remove(participant_id).is_some()
    }

    pub fn role_counts(&self) -> RoleCounts {
        let mut counts = RoleCounts {
            total: self.signups.len(),
            ..RoleCounts::default()
        };
        for signup in self.signups.values() {
            if signup.is_eligible(Role::Tank) {
                counts.tanks += 1;
            }
            if signup.is_eligible(Role::Heal) {
                counts.heals += 1;
            }
            if signup.is_eligible(Role::Dps) {
                counts.dps += 1;
            }
        }
        counts
    }
}

/// Resolve a class name typed by a user into a class allowed for `role`.
///
/// Unknown names and classes outside the role's table are both reported as
/// `InvalidSubAttribute`.
pub fn parse_class(role: Role, value: &str) -> Result<Class, RosterError> {
    Class::from_str_class(value)
        .filter(|c| role.allows(*c))
        .ok_or_else(|| RosterError::InvalidSubAttribute {
            role,
            value: value.to_string(),
        })
}
