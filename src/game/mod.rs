pub mod addition;
pub mod nifty;
pub mod payout;
pub mod pin;

use serde::{Deserialize, Serialize};

use crate::types::Player;

/// One slot per player, serialized with the players' names as keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerPlayer<T> {
    #[serde(rename = "Ayaan")]
    pub ayaan: Option<T>,
    #[serde(rename = "Riyaan")]
    pub riyaan: Option<T>,
}

impl<T> Default for PerPlayer<T> {
    fn default() -> Self {
        Self { ayaan: None, riyaan: None }
    }
}

impl<T> PerPlayer<T> {
    pub fn get(&self, player: Player) -> Option<&T> {
        match player {
            Player::Ayaan => self.ayaan.as_ref(),
            Player::Riyaan => self.riyaan.as_ref(),
        }
    }

    pub fn slot_mut(&mut self, player: Player) -> &mut Option<T> {
        match player {
            Player::Ayaan => &mut self.ayaan,
            Player::Riyaan => &mut self.riyaan,
        }
    }
}
