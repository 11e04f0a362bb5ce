//! Pairing players for Gambit.
//!
//! Two independent ways to end up across the board from someone:
//!
//! 1. **Rating queue** ([`RatingQueue`]): automated matchmaking. Players
//!    wait with a rating and a time control; the queue pairs them once
//!    their ratings fall within a window that widens the longer they wait.
//! 2. **Open tables** ([`OpenTableLobby`]): a player hosts a table, others
//!    browse the listing and pick one. No rating check at all.
//!
//! Both produce the same [`MatchResult`] through [`MatchStrategy::offer`],
//! and both implement [`MatchSource`] so the server can withdraw a
//! connection from "wherever it is waiting" without caring which strategy
//! holds it.
//!
//! Neither component knows about sockets or sessions. They are plain
//! synchronous data structures owned by the orchestrator; time is always
//! passed in as an `Instant` so behaviour is reproducible in tests.

mod queue;
mod source;
mod tables;

pub use queue::{QueueConfig, QueueEntry, RatingQueue};
pub use source::{Contender, MatchOrigin, MatchResult, MatchSource, MatchStrategy};
pub use tables::{JoinTable, OpenTable, OpenTableLobby, TableConfig};
