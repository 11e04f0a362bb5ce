//! Match sessions for Gambit.
//!
//! Once two players are paired they share a [`MatchSession`]: the state
//! machine that owns the board position, the move list, the clocks, draw
//! negotiation, and disconnect/reconnect recovery.
//!
//! ```text
//!                 make_move (terminal) / resign / accept_draw
//!                 check_flag / check_disconnect_timeout
//!   Playing ──────────────────────────────────────────────→ Finished
//! ```
//!
//! There is no waiting state: a session only exists once both players do.
//!
//! Legality is not decided here. The session hands every move to a
//! [`ChessRules`] implementation and only keeps the bookkeeping around it;
//! [`StandardRules`] is the implementation the server uses.
//!
//! # How it fits in the stack
//!
//! ```text
//! Orchestrator (above)  ← owns every session, routes messages by game id
//!     ↕
//! Session Layer (this crate)  ← one state machine per game
//!     ↕
//! Matchmaking / Protocol (below)  ← MatchResult in, wire vocabulary out
//! ```

mod clock;
mod error;
mod player;
mod rules;
mod session;
mod standard;

pub use clock::GameClock;
pub use error::{RulesError, SessionError};
pub use player::Player;
pub use rules::{ChessRules, MoveOutcome, MoveRequest, PieceKind, Promotion};
pub use session::{GameEnd, MatchSession, MoveAck, Reconnection, SessionConfig, SessionState};
pub use standard::StandardRules;
