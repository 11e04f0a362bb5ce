//! Error types for the session layer.

use gambit_protocol::ErrorCode;

use crate::session::GameEnd;

/// Why the rules refused a move or a position.
///
/// The `Display` text is what the player sees, so it stays short and
/// free of internals.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RulesError {
    /// The move text could not be read as coordinate notation.
    #[error("malformed move '{0}', expected coordinates like e2e4 or e7e8q")]
    Malformed(String),

    /// Well-formed, but not legal in the current position.
    #[error("illegal move {0}")]
    Illegal(String),

    /// The position could not be parsed. Points at a server bug, since
    /// positions only ever come from the rules themselves.
    #[error("invalid position: {0}")]
    InvalidPosition(String),
}

/// A move attempt the session turned down.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("game is already over")]
    GameOver,

    #[error("you are not playing in this game")]
    NotAParticipant,

    #[error("not your turn")]
    NotYourTurn,

    #[error(transparent)]
    Rules(#[from] RulesError),

    /// The mover's flag fell before the move arrived. The session is now
    /// finished and the caller must run end-of-game handling.
    #[error("out of time")]
    TimeExpired(GameEnd),
}

impl SessionError {
    /// The wire error code for this failure.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Rules(RulesError::InvalidPosition(_)) => ErrorCode::InternalError,
            Self::Rules(_) => ErrorCode::IllegalMove,
            Self::GameOver | Self::NotAParticipant | Self::NotYourTurn | Self::TimeExpired(_) => {
                ErrorCode::InvalidAction
            }
        }
    }
}
