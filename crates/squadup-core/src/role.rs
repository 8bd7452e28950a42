// Roles, classes, and the static role -> allowed class table.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The three roles a group slot can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Tank,
    Heal,
    Dps,
}

impl Role {
    /// All roles in slot order.
    pub const ALL: [Role; 3] = [Role::Tank, Role::Heal, Role::Dps];

    /// Parse a role name.
    ///
    /// Accepts the canonical names plus a few common spellings:
    /// "healer" -> Heal, "damage"/"dd" -> Dps.
    pub fn from_str_role(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "tank" => Some(Role::Tank),
            "heal" | "healer" => Some(Role::Heal),
            "dps" | "damage" | "dd" => Some(Role::Dps),
            _ => None,
        }
    }

    /// Return the display string for this role.
    pub fn display_str(&self) -> &'static str {
        match self {
            Role::Tank => "tank",
            Role::Heal => "heal",
            Role::Dps => "dps",
        }
    }

    /// Classes that may be chosen as the sub-attribute for this role.
    pub fn allowed_classes(&self) -> &'static [Class] {
        match self {
            Role::Tank => &[
                Class::Warrior,
                Class::Paladin,
                Class::Monk,
                Class::Druid,
                Class::DemonHunter,
                Class::DeathKnight,
            ],
            Role::Heal => &[
                Class::Priest,
                Class::Paladin,
                Class::Shaman,
                Class::Monk,
                Class::Druid,
                Class::Evoker,
            ],
            Role::Dps => &Class::ALL,
        }
    }

    /// Whether `class` is in this role's allowed table.
    pub fn allows(&self, class: Class) -> bool {
        self.allowed_classes().contains(&class)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_str())
    }
}

/// Per-role specialization a participant can attach to an eligible role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Class {
    Warrior,
    Paladin,
    Hunter,
    Rogue,
    Priest,
    Shaman,
    Mage,
    Warlock,
    Monk,
    Druid,
    DemonHunter,
    DeathKnight,
    Evoker,
}

impl Class {
    pub const ALL: [Class; 13] = [
        Class::Warrior,
        Class::Paladin,
        Class::Hunter,
        Class::Rogue,
        Class::Priest,
        Class::Shaman,
        Class::Mage,
        Class::Warlock,
        Class::Monk,
        Class::Druid,
        Class::DemonHunter,
        Class::DeathKnight,
        Class::Evoker,
    ];

    /// Parse a class name. Case-insensitive; spaces, dashes and underscores
    /// are interchangeable ("Death Knight", "death-knight", "DEATH_KNIGHT").
    pub fn from_str_class(s: &str) -> Option<Self> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '-' | '_'))
            .collect::<String>()
            .to_lowercase();
        match normalized.as_str() {
            "warrior" => Some(Class::Warrior),
            "paladin" => Some(Class::Paladin),
            "hunter" => Some(Class::Hunter),
            "rogue" => Some(Class::Rogue),
            "priest" => Some(Class::Priest),
            "shaman" => Some(Class::Shaman),
            "mage" => Some(Class::Mage),
            "warlock" => Some(Class::Warlock),
            "monk" => Some(Class::Monk),
            "druid" => Some(Class::Druid),
            "demonhunter" | "dh" => Some(Class::DemonHunter),
            "deathknight" | "dk" => Some(Class::DeathKnight),
            "evoker" => Some(Class::Evoker),
            _ => None,
        }
    }

    /// Return the display string for this class.
    pub fn display_str(&self) -> &'static str {
        match self {
            Class::Warrior => "Warrior",
            Class::Paladin => "Paladin",
            Class::Hunter => "Hunter",
            Class::Rogue => "Rogue",
            Class::Priest => "Priest",
            Class::Shaman => "Shaman",
            Class::Mage => "Mage",
            Class::Warlock => "Warlock",
            Class::Monk => "Monk",
            Class::Druid => "Druid",
            Class::DemonHunter => "Demon Hunter",
            Class::DeathKnight => "Death Knight",
            Class::Evoker => "Evoker",
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_role_aliases() {
        assert_eq!(Role::from_str_role("Tank"), Some(Role::Tank));
        assert_eq!(Role::from_str_role("healer"), Some(Role::Heal));
        assert_eq!(Role::from_str_role(" DPS "), Some(Role::Dps));
        assert_eq!(Role::from_str_role("support"), None);
    }

    #[test]
    fn parse_class_ignores_separators() {
        assert_eq!(Class::from_str_class("Death Knight"), Some(Class::DeathKnight));
        assert_eq!(Class::from_str_class("demon-hunter"), Some(Class::DemonHunter));
        assert_eq!(Class::from_str_class("DEMON_HUNTER"), Some(Class::DemonHunter));
        assert_eq!(Class::from_str_class("bard"), None);
    }

    #[test]
    fn tank_table_excludes_pure_damage_classes() {
        assert!(Role::Tank.allows(Class::Warrior));
        assert!(!Role::Tank.allows(Class::Mage));
        assert!(!Role::Heal.allows(Class::Rogue));
        assert!(Class::ALL.iter().all(|c| Role::Dps.allows(*c)));
    }

    #[test]
    fn serde_names_match_persisted_format() {
        assert_eq!(serde_json::to_string(&Role::Heal).unwrap(), "\"heal\"");
        assert_eq!(
            serde_json::to_string(&Class::DeathKnight).unwrap(),
            "\"death-knight\""
        );
        let role: Role = serde_json::from_str("\"dps\"").unwrap();
        assert_eq!(role, Role::Dps);
    }
}
