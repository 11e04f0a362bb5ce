//! # Gambit
//!
//! Real-time multiplayer chess server.
//!
//! Gambit pairs players through a rating-banded queue or open tables, runs
//! each game as a server-authoritative [`MatchSession`](gambit_session::MatchSession),
//! and keeps games alive across dropped sockets, crashing handlers, and
//! restarts.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use gambit::prelude::*;
//!
//! # async fn start() -> Result<(), GambitError> {
//! let server = GambitServer::builder()
//!     .config(ServerConfig::from_env())
//!     .build(Arc::new(MemoryStore::new()))
//!     .await?;
//! server.run().await
//! # }
//! ```

pub mod config;
mod error;
mod handler;
pub mod orchestrator;
pub mod persistence;
pub mod rating;
mod server;
pub mod sweeper;

pub use error::GambitError;
pub use server::{GambitServer, GambitServerBuilder};

/// Everything needed to embed and drive a Gambit server.
pub mod prelude {
    pub use crate::GambitError;
    pub use crate::config::{ServerConfig, SweepConfig};
    pub use crate::orchestrator::{Orchestrator, Outbox};
    pub use crate::persistence::{
        GameRecord, GameStore, MemoryStore, PersistenceQueue, PlayerOutcome, PlayerRecord,
        SeatRecord, StoreError,
    };
    pub use crate::rating::{EloChange, MatchElo, calculate_match_elo, expected_score};
    pub use crate::server::{GambitServer, GambitServerBuilder};

    pub use gambit_matchmaking::{QueueConfig, TableConfig};
    pub use gambit_protocol::{
        ClientMessage, ClockSnapshot, Color, ConnectionId, EndReason, ErrorCode, GameId,
        GameResult, PROTOCOL_VERSION, ServerMessage, TableId, TimeControl,
    };
    pub use gambit_resilience::{ShutdownConfig, ShutdownController, ShutdownPhase};
    pub use gambit_session::{SessionConfig, StandardRules};
}
