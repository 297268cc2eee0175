use serde::{Deserialize, Serialize};

/// How rare an achievement is, as reported by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    #[serde(other)]
    Unknown,
}

/// An unlock returned by a successful progress sync. Never created locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementEvent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub points: u32,
    #[serde(default = "default_rarity")]
    pub rarity: Rarity,
}

fn default_rarity() -> Rarity {
    Rarity::Common
}
