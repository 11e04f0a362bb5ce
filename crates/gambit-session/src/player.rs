//! A player seated in a match.

use std::time::Instant;

use gambit_matchmaking::Contender;
use gambit_protocol::{Color, ConnectionId, OpponentInfo};
use rand::Rng;

/// One side of a [`MatchSession`](crate::MatchSession).
///
/// Lives exactly as long as its session. `connection_id` is whichever
/// socket the player is on right now; it changes on reconnect while the
/// token stays the same.
#[derive(Debug, Clone)]
pub struct Player {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub rating: i32,
    pub games_played: u32,
    pub color: Color,

    /// Secret the client presents to take this seat back after a drop.
    ///
    /// 128 random bits as 32 hex characters. Minted when the session is
    /// created and unrelated to the public game id.
    pub reconnect_token: String,

    pub connected: bool,

    /// When the player dropped, while they are gone.
    pub disconnected_at: Option<Instant>,
}

impl Player {
    pub(crate) fn seat(contender: Contender, color: Color) -> Self {
        Self {
            connection_id: contender.connection_id,
            display_name: contender.display_name,
            rating: contender.rating,
            games_played: contender.games_played,
            color,
            reconnect_token: generate_token(),
            connected: true,
            disconnected_at: None,
        }
    }

    /// How this player is shown to their opponent.
    pub fn as_opponent(&self) -> OpponentInfo {
        OpponentInfo {
            name: self.display_name.clone(),
            rating: self.rating,
        }
    }
}

/// A random 32-character hex string (128 bits of entropy).
fn generate_token() -> String {
    let bytes: [u8; 16] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
