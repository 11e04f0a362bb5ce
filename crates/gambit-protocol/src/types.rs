//! Core protocol types: identities and the chess vocabulary every layer
//! shares.
//!
//! These are the structures that get serialized into the JSON the browser
//! client reads, so their serde attributes are part of the wire contract.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// A unique identifier for a match session.
///
/// Newtype over `u64` so a `TableId` can never be passed where a game is
/// expected. `#[serde(transparent)]` keeps it a plain number in JSON.
///
/// Game ids are public: they go to both players and show up in logs. They
/// carry no authority; reconnecting requires the separate player token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub u64);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G-{}", self.0)
    }
}

/// A unique identifier for an open table in the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u64);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Chess vocabulary
// ---------------------------------------------------------------------------

/// Side of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    /// The other side.
    pub fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::White => write!(f, "white"),
            Self::Black => write!(f, "black"),
        }
    }
}

/// A clock setting: initial time plus a per-move increment, both in
/// seconds. `600+0` is ten minutes with no increment.
///
/// Matchmaking treats two time controls as compatible only when they are
/// exactly equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeControl {
    pub initial_secs: u32,
    #[serde(default)]
    pub increment_secs: u32,
}

impl TimeControl {
    /// Creates a time control from seconds.
    pub fn new(initial_secs: u32, increment_secs: u32) -> Self {
        Self {
            initial_secs,
            increment_secs,
        }
    }
}

impl fmt::Display for TimeControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.initial_secs, self.increment_secs)
    }
}

/// Final score of a game, in PGN notation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameResult {
    #[serde(rename = "1-0")]
    WhiteWins,
    #[serde(rename = "0-1")]
    BlackWins,
    #[serde(rename = "1/2-1/2")]
    Draw,
}

impl GameResult {
    /// The result in which `color` wins.
    pub fn win_for(color: Color) -> Self {
        match color {
            Color::White => Self::WhiteWins,
            Color::Black => Self::BlackWins,
        }
    }

    /// The winning side, or `None` for a draw.
    pub fn winner(self) -> Option<Color> {
        match self {
            Self::WhiteWins => Some(Color::White),
            Self::BlackWins => Some(Color::Black),
            Self::Draw => None,
        }
    }

    /// Score from `color`'s point of view: 1.0 win, 0.5 draw, 0.0 loss.
    pub fn score_for(self, color: Color) -> f64 {
        match self.winner() {
            Some(winner) if winner == color => 1.0,
            Some(_) => 0.0,
            None => 0.5,
        }
    }
}

impl fmt::Display for GameResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WhiteWins => write!(f, "1-0"),
            Self::BlackWins => write!(f, "0-1"),
            Self::Draw => write!(f, "1/2-1/2"),
        }
    }
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoveRule,
    Resignation,
    Agreement,
    DisconnectTimeout,
    Timeout,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Checkmate => "checkmate",
            Self::Stalemate => "stalemate",
            Self::InsufficientMaterial => "insufficient-material",
            Self::ThreefoldRepetition => "threefold-repetition",
            Self::FiftyMoveRule => "fifty-move-rule",
            Self::Resignation => "resignation",
            Self::Agreement => "agreement",
            Self::DisconnectTimeout => "disconnect-timeout",
            Self::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Payload fragments
// ---------------------------------------------------------------------------

/// Remaining time on both clocks, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockSnapshot {
    pub white_ms: u64,
    pub black_ms: u64,
}

/// What a player is told about the person across the board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpponentInfo {
    pub name: String,
    pub rating: i32,
}

/// One row of the open-table listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSummary {
    pub table_id: TableId,
    pub host_name: String,
    pub host_rating: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub piece_bank: Option<String>,
    pub waiting_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_id_serializes_as_plain_number() {
        assert_eq!(serde_json::to_string(&GameId(42)).unwrap(), "42");
        assert_eq!(GameId(42).to_string(), "G-42");
    }

    #[test]
    fn test_table_id_display() {
        assert_eq!(TableId(3).to_string(), "T-3");
    }

    #[test]
    fn test_color_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Color::White).unwrap(), "\"white\"");
        assert_eq!(Color::Black.opposite(), Color::White);
    }

    #[test]
    fn test_time_control_increment_defaults_to_zero() {
        let tc: TimeControl = serde_json::from_str(r#"{"initialSecs":600}"#).unwrap();
        assert_eq!(tc, TimeControl::new(600, 0));
        assert_eq!(tc.to_string(), "600+0");
    }

    #[test]
    fn test_game_result_uses_pgn_notation() {
        assert_eq!(serde_json::to_string(&GameResult::Draw).unwrap(), "\"1/2-1/2\"");
        assert_eq!(GameResult::win_for(Color::Black), GameResult::BlackWins);
        assert_eq!(GameResult::WhiteWins.winner(), Some(Color::White));
    }

    #[test]
    fn test_game_result_score_for_each_side() {
        assert_eq!(GameResult::WhiteWins.score_for(Color::White), 1.0);
        assert_eq!(GameResult::WhiteWins.score_for(Color::Black), 0.0);
        assert_eq!(GameResult::Draw.score_for(Color::Black), 0.5);
    }

    #[test]
    fn test_end_reason_is_kebab_case_on_the_wire() {
        let json = serde_json::to_string(&EndReason::DisconnectTimeout).unwrap();
        assert_eq!(json, "\"disconnect-timeout\"");
        assert_eq!(EndReason::DisconnectTimeout.to_string(), "disconnect-timeout");
    }

    #[test]
    fn test_table_summary_omits_missing_piece_bank() {
        let row = TableSummary {
            table_id: TableId(1),
            host_name: "ada".into(),
            host_rating: 1500,
            piece_bank: None,
            waiting_secs: 4,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["tableId"], 1);
        assert_eq!(json["hostName"], "ada");
        assert!(json.get("pieceBank").is_none());
    }
}
