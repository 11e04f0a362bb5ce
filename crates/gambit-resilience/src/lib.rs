//! Keeping a Gambit server standing under load and through failures.
//!
//! - [`ConnectionLimiter`]: caps concurrent sockets per IP address.
//! - [`MessageRateLimiter`]: caps inbound messages per connection per second.
//! - [`RoomAdmission`]: refuses new matches once the server holds too many.
//! - [`ShutdownController`] and [`setup_graceful_shutdown`]: drain live
//!   games on SIGINT/SIGTERM before closing sockets.
//! - [`install_crash_recovery`] and [`contain`]: a panic while handling one
//!   message is logged and turned into an error instead of taking the
//!   process or other games down with it.
//!
//! None of these know anything about chess. They gate work; the
//! orchestrator decides what the work is.

mod crash;
mod error;
mod limits;
mod shutdown;

pub use crash::{contain, install_crash_recovery};
pub use error::ResilienceError;
pub use limits::{ConnectionLimiter, MessageRateLimiter, RoomAdmission};
pub use shutdown::{
    ShutdownConfig, ShutdownController, ShutdownHooks, ShutdownPhase, listen_for_signals,
    setup_graceful_shutdown,
};
