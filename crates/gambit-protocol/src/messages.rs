//! Client ↔ server messages.
//!
//! Every message is a JSON object with a `type` discriminator and a
//! `version` field:
//!
//! ```text
//! { "version": 1, "type": "make_move", "gameId": 7, "move": "e2e4" }
//! ```
//!
//! `#[serde(tag = "type", rename_all = "snake_case")]` produces the
//! `"type": "make_move"` tag from the `MakeMove` variant, and
//! `rename_all_fields = "camelCase"` turns `game_id` into `gameId` inside
//! every variant. The version lives on the envelope and is flattened into
//! the same object.

use serde::{Deserialize, Serialize};

use crate::types::{
    ClockSnapshot, Color, EndReason, GameId, GameResult, OpponentInfo, TableId, TableSummary,
    TimeControl,
};

/// The protocol version this server speaks. Clients must send it in every
/// message.
pub const PROTOCOL_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Client → server
// ---------------------------------------------------------------------------

/// Messages a client may send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Enter the rated matchmaking queue.
    JoinQueue {
        name: String,
        #[serde(default)]
        rating: Option<i32>,
        #[serde(default)]
        games_played: Option<u32>,
        time_control: TimeControl,
    },

    /// Leave the matchmaking queue.
    LeaveQueue,

    /// Host an open table that another player can pick from the lobby.
    CreateTable {
        name: String,
        #[serde(default)]
        rating: Option<i32>,
        #[serde(default)]
        piece_bank: Option<String>,
    },

    /// Ask for the current open-table listing.
    ListTables,

    /// Sit down at someone else's open table.
    JoinTable {
        table_id: TableId,
        name: String,
        #[serde(default)]
        rating: Option<i32>,
    },

    /// Cancel the table this connection is hosting.
    LeaveTable,

    /// Play a move in coordinate notation (`e2e4`, `e7e8q`).
    MakeMove {
        game_id: GameId,
        #[serde(rename = "move")]
        mv: String,
    },

    Resign {
        game_id: GameId,
    },

    OfferDraw {
        game_id: GameId,
    },

    AcceptDraw {
        game_id: GameId,
    },

    DeclineDraw {
        game_id: GameId,
    },

    /// Resume a game from a new connection using the token handed out in
    /// `game_found`.
    Reconnect {
        game_id: GameId,
        player_token: String,
    },
}

impl ClientMessage {
    /// The wire name of this message, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinQueue { .. } => "join_queue",
            Self::LeaveQueue => "leave_queue",
            Self::CreateTable { .. } => "create_table",
            Self::ListTables => "list_tables",
            Self::JoinTable { .. } => "join_table",
            Self::LeaveTable => "leave_table",
            Self::MakeMove { .. } => "make_move",
            Self::Resign { .. } => "resign",
            Self::OfferDraw { .. } => "offer_draw",
            Self::AcceptDraw { .. } => "accept_draw",
            Self::DeclineDraw { .. } => "decline_draw",
            Self::Reconnect { .. } => "reconnect",
        }
    }

    /// `true` for messages that would put the sender into a new pairing.
    /// These are refused while the server drains.
    pub fn starts_pairing(&self) -> bool {
        matches!(
            self,
            Self::JoinQueue { .. } | Self::CreateTable { .. } | Self::JoinTable { .. }
        )
    }
}

/// A client message together with the protocol version it was written for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    pub version: u32,
    #[serde(flatten)]
    pub message: ClientMessage,
}

// ---------------------------------------------------------------------------
// Server → client
// ---------------------------------------------------------------------------

/// Machine-readable error category sent in [`ServerMessage::Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The bytes were not JSON.
    ParseError,
    /// JSON that doesn't match any message schema or protocol rule.
    InvalidMessage,
    GameNotFound,
    TableNotFound,
    /// Move rejected: illegal, out of turn, or unreadable notation.
    IllegalMove,
    /// A game action that isn't available right now (no draw pending, ...).
    InvalidAction,
    /// Reconnect token doesn't belong to the game.
    InvalidToken,
    /// The connection is already playing a game.
    AlreadyInGame,
    /// The connection is already queued or hosting a table.
    AlreadyWaiting,
    /// A host tried to join their own table.
    OwnTable,
    ServerFull,
    TooManyConnections,
    RateLimited,
    ShuttingDown,
    InternalError,
}

/// Messages the server sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// You're queued. `estimated_wait` is in seconds, `null` when no
    /// opponent is in reach yet.
    QueueStatus {
        position: usize,
        estimated_wait: Option<u64>,
    },

    QueueLeft,

    /// Nobody compatible showed up before the queue ceiling.
    QueueTimeout {
        waited_secs: u64,
    },

    TableCreated {
        table_id: TableId,
    },

    TablesList {
        tables: Vec<TableSummary>,
    },

    TableCancelled {
        table_id: TableId,
    },

    /// Your table sat unanswered past its time-to-live.
    TableExpired {
        table_id: TableId,
    },

    /// A match was formed. `player_token` is this player's private
    /// reconnect secret; it is never sent to the opponent.
    GameFound {
        game_id: GameId,
        color: Color,
        opponent: OpponentInfo,
        time_control: Option<TimeControl>,
        fen: String,
        player_token: String,
        rated: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        piece_bank: Option<String>,
    },

    /// Your move was accepted.
    MoveAck {
        game_id: GameId,
        #[serde(rename = "move")]
        mv: String,
        fen: String,
        clocks: Option<ClockSnapshot>,
    },

    /// Your opponent moved.
    OpponentMove {
        game_id: GameId,
        #[serde(rename = "move")]
        mv: String,
        fen: String,
        clocks: Option<ClockSnapshot>,
    },

    DrawOffer {
        game_id: GameId,
        from: Color,
    },

    DrawDeclined {
        game_id: GameId,
    },

    GameOver {
        game_id: GameId,
        result: GameResult,
        reason: EndReason,
        winner: Option<Color>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        elo_change: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_elo: Option<i32>,
    },

    OpponentDisconnected {
        game_id: GameId,
        grace_secs: u64,
    },

    OpponentReconnected {
        game_id: GameId,
    },

    /// Full resume state after a successful `reconnect`.
    Reconnected {
        game_id: GameId,
        color: Color,
        opponent: OpponentInfo,
        time_control: Option<TimeControl>,
        fen: String,
        moves: Vec<String>,
        clocks: Option<ClockSnapshot>,
        finished: bool,
    },

    /// The server is draining; finish up, new games are refused.
    ShuttingDown {
        drain_timeout_ms: u64,
    },

    Error {
        code: ErrorCode,
        message: String,
    },
}

impl ServerMessage {
    /// Shorthand for an `error` message.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

/// Outbound counterpart of [`ClientEnvelope`]. Borrows the message so a
/// broadcast can encode the same value for several recipients.
#[derive(Debug, Serialize)]
pub struct ServerEnvelope<'a> {
    pub version: u32,
    #[serde(flatten)]
    pub message: &'a ServerMessage,
}

impl<'a> ServerEnvelope<'a> {
    /// Wraps a message with the current protocol version.
    pub fn new(message: &'a ServerMessage) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            message,
        }
    }
}
