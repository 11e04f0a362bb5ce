//! Admission control: per-IP connection caps, per-connection message rate
//! limits, and the room-capacity gate.
//!
//! The two limiters are shared by every connection task, so they guard
//! their maps with a `std::sync::Mutex`. Critical sections are a hash
//! lookup and an increment; nothing awaits while holding the lock.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use gambit_transport::ConnectionId;
use tracing::debug;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Counters stay usable even if a holder panicked mid-update.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ---------------------------------------------------------------------------
// ConnectionLimiter
// ---------------------------------------------------------------------------

/// Caps how many sockets one IP address may hold open at once.
#[derive(Debug)]
pub struct ConnectionLimiter {
    max_per_ip: u32,
    counts: Mutex<HashMap<IpAddr, u32>>,
}

impl ConnectionLimiter {
    pub fn new(max_per_ip: u32) -> Self {
        Self {
            max_per_ip,
            counts: Mutex::new(HashMap::new()),
        }
    }

    /// Counts a new connection from `ip`. Returns `false`, without
    /// counting it, once the ceiling is reached; the caller must then
    /// refuse the connection.
    pub fn track_connection(&self, ip: IpAddr) -> bool {
        let mut counts = lock(&self.counts);
        let count = counts.entry(ip).or_insert(0);
        if *count >= self.max_per_ip {
            debug!(%ip, limit = self.max_per_ip, "per-ip connection limit reached");
            return false;
        }
        *count += 1;
        true
    }

    /// Releases a connection counted by [`track_connection`](Self::track_connection).
    pub fn release_connection(&self, ip: IpAddr) {
        let mut counts = lock(&self.counts);
        if let Some(count) = counts.get_mut(&ip) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                counts.remove(&ip);
            }
        }
    }

    /// Connections currently counted for `ip`.
    pub fn connections_from(&self, ip: IpAddr) -> u32 {
        lock(&self.counts).get(&ip).copied().unwrap_or(0)
    }
}

// ---------------------------------------------------------------------------
// MessageRateLimiter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window limit on inbound messages per connection.
///
/// Each connection gets `max_per_window` messages per window. The window
/// restarts with the first message after it has elapsed.
#[derive(Debug)]
pub struct MessageRateLimiter {
    max_per_window: u32,
    window: Duration,
    windows: Mutex<HashMap<ConnectionId, Window>>,
}

impl MessageRateLimiter {
    /// A limiter allowing `max_per_second` messages per second.
    pub fn per_second(max_per_second: u32) -> Self {
        Self {
            max_per_window: max_per_second,
            window: Duration::from_secs(1),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Counts one message from `connection_id`. Returns `false` when the
    /// connection is over its limit; the message should be dropped and
    /// answered with `RATE_LIMITED`, the connection kept.
    pub fn check_ws_rate_limit(&self, connection_id: ConnectionId, now: Instant) -> bool {
        let mut windows = lock(&self.windows);
        let window = windows.entry(connection_id).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.saturating_duration_since(window.started) >= self.window {
            window.started = now;
            window.count = 0;
        }
        if window.count >= self.max_per_window {
            return false;
        }
        window.count += 1;
        true
    }

    /// Drops the bookkeeping for a closed connection.
    pub fn forget(&self, connection_id: ConnectionId) {
        lock(&self.windows).remove(&connection_id);
    }

    /// Number of connections with an open window.
    pub fn tracked(&self) -> usize {
        lock(&self.windows).len()
    }
}

// ---------------------------------------------------------------------------
// RoomAdmission
// ---------------------------------------------------------------------------

/// Refuses new matches once the server holds `max_rooms` of them.
///
/// Existing games are never affected; only the next pairing is turned away.
#[derive(Debug, Clone, Copy)]
pub struct RoomAdmission {
    max_rooms: usize,
}

impl RoomAdmission {
    pub fn new(max_rooms: usize) -> Self {
        Self { max_rooms }
    }

    pub fn can_create_room(&self, current_room_count: usize) -> bool {
        current_room_count < self.max_rooms
    }

    pub fn max_rooms(&self) -> usize {
        self.max_rooms
    }
}
