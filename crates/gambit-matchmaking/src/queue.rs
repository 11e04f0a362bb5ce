//! Rating-window matchmaking queue.
//!
//! Players wait in arrival order. Two waiting players are compatible when
//! they asked for the same time control and their rating gap fits inside
//! the current window. The window starts narrow and widens in steps as the
//! longer-waiting of the pair keeps waiting:
//!
//! ```text
//! window(wait) = min(base + step * floor(wait / interval), max)
//!
//! with the defaults:  0-14s -> 100   15-29s -> 200   30-44s -> 300
//!                     45-59s -> 400  60s+   -> 500
//! ```
//!
//! Anyone still unmatched after the timeout is dropped by
//! [`RatingQueue::check_timeouts`] instead of being forced into a lopsided
//! game.

use std::time::{Duration, Instant};

use gambit_protocol::{ConnectionId, TimeControl};
use tracing::debug;

use crate::source::{Contender, MatchOrigin, MatchResult, MatchSource, MatchStrategy};

/// Tuning for the widening rating window.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Window for players who have only just joined.
    pub base_window: u32,
    /// How much the window grows per elapsed interval.
    pub window_step: u32,
    /// How often the window grows.
    pub step_interval: Duration,
    /// The window never grows past this.
    pub max_window: u32,
    /// Players waiting strictly longer than this are removed.
    pub timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            base_window: 100,
            window_step: 100,
            step_interval: Duration::from_secs(15),
            max_window: 500,
            timeout: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    /// Rating window for a pair whose longer wait is `waited`.
    pub fn window(&self, waited: Duration) -> u32 {
        let interval = self.step_interval.as_millis();
        if interval == 0 {
            return self.max_window;
        }
        let steps = u32::try_from(waited.as_millis() / interval).unwrap_or(u32::MAX);
        self.window_step
            .saturating_mul(steps)
            .saturating_add(self.base_window)
            .min(self.max_window)
    }
}

/// A player waiting in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub connection_id: ConnectionId,
    pub display_name: String,
    pub rating: i32,
    pub games_played: u32,
    pub time_control: TimeControl,
    pub joined_at: Instant,
}

impl QueueEntry {
    fn waited(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.joined_at)
    }
}

impl From<QueueEntry> for Contender {
    fn from(entry: QueueEntry) -> Self {
        Self {
            connection_id: entry.connection_id,
            display_name: entry.display_name,
            rating: entry.rating,
            games_played: entry.games_played,
        }
    }
}

/// Arrival-ordered queue of players looking for a rated game.
///
/// Each connection appears at most once. Pairing is first-come: when
/// several candidates fit, the earliest-queued one wins ties.
#[derive(Debug, Default)]
pub struct RatingQueue {
    config: QueueConfig,
    entries: Vec<QueueEntry>,
}

impl RatingQueue {
    /// Creates an empty queue.
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            entries: Vec::new(),
        }
    }

    /// The queue's tuning.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Number of waiting players.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` if nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `true` if the connection is waiting in the queue.
    pub fn contains(&self, connection_id: ConnectionId) -> bool {
        self.entries
            .iter()
            .any(|e| e.connection_id == connection_id)
    }

    /// Adds a player and tries to pair them immediately.
    ///
    /// The entry's `joined_at` doubles as the evaluation instant. Among
    /// compatible waiting players the one with the smallest rating gap is
    /// chosen; equal gaps go to whoever queued first. On a match both
    /// players leave the queue and the existing one becomes `player1`.
    ///
    /// A connection that is already queued is left as it is and `None` is
    /// returned; callers are expected to reject that case up front.
    pub fn add_player(&mut self, entry: QueueEntry) -> Option<MatchResult> {
        if self.contains(entry.connection_id) {
            debug!(connection = %entry.connection_id, "already queued, ignoring");
            return None;
        }

        let now = entry.joined_at;
        let best = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, waiting)| self.is_compatible(waiting, &entry, now))
            .min_by_key(|(idx, waiting)| (rating_gap(waiting, &entry), *idx))
            .map(|(idx, _)| idx);

        match best {
            Some(idx) => {
                let opponent = self.entries.remove(idx);
                debug!(
                    waiting = %opponent.connection_id,
                    joining = %entry.connection_id,
                    gap = rating_gap(&opponent, &entry),
                    "immediate queue match"
                );
                Some(pair(opponent, entry))
            }
            None => {
                debug!(
                    connection = %entry.connection_id,
                    rating = entry.rating,
                    time_control = %entry.time_control,
                    "player queued"
                );
                self.entries.push(entry);
                None
            }
        }
    }

    /// Removes a player. Returns `false` if they were not queued.
    pub fn remove_player(&mut self, connection_id: ConnectionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.connection_id != connection_id);
        self.entries.len() != before
    }

    /// Removes and returns every player who has waited longer than the
    /// timeout.
    pub fn check_timeouts(&mut self, now: Instant) -> Vec<QueueEntry> {
        let timeout = self.config.timeout;
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.waited(now) > timeout);
        self.entries = kept;
        expired
    }

    /// Pairs as many waiting players as the current windows allow.
    ///
    /// Greedy in queue order: each unpaired player takes the first later
    /// player compatible with them. No player ends up in two results.
    pub fn scan_for_matches(&mut self, now: Instant) -> Vec<MatchResult> {
        let n = self.entries.len();
        let mut taken = vec![false; n];
        let mut pairs = Vec::new();

        for i in 0..n {
            if taken[i] {
                continue;
            }
            for j in (i + 1)..n {
                if !taken[j] && self.is_compatible(&self.entries[i], &self.entries[j], now) {
                    taken[i] = true;
                    taken[j] = true;
                    pairs.push((i, j));
                    break;
                }
            }
        }

        if pairs.is_empty() {
            return Vec::new();
        }

        let mut slots: Vec<Option<QueueEntry>> = std::mem::take(&mut self.entries)
            .into_iter()
            .map(Some)
            .collect();
        let mut results = Vec::with_capacity(pairs.len());
        for (i, j) in pairs {
            if let (Some(first), Some(second)) = (slots[i].take(), slots[j].take()) {
                results.push(pair(first, second));
            }
        }
        self.entries = slots.into_iter().flatten().collect();

        debug!(matches = results.len(), remaining = self.entries.len(), "queue scan");
        results
    }

    /// 1-based place in the queue, or `None` if not queued.
    pub fn position(&self, connection_id: ConnectionId) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.connection_id == connection_id)
            .map(|idx| idx + 1)
    }

    /// Whether two players could be paired at `now`.
    ///
    /// Same time control, and a rating gap no wider than the window for the
    /// longer of the two waits.
    pub fn is_compatible(&self, a: &QueueEntry, b: &QueueEntry, now: Instant) -> bool {
        if a.time_control != b.time_control {
            return false;
        }
        let waited = a.waited(now).max(b.waited(now));
        rating_gap(a, b) <= self.config.window(waited)
    }

    /// How much longer the player should expect to wait.
    ///
    /// `Some(ZERO)` means someone already fits. Otherwise this is the time
    /// until the window covers the closest-rated player on the same time
    /// control. `None` when nobody compatible is waiting, or the gap is out
    /// of reach before the timeout.
    pub fn estimated_wait(&self, connection_id: ConnectionId, now: Instant) -> Option<Duration> {
        let me = self
            .entries
            .iter()
            .find(|e| e.connection_id == connection_id)?;

        self.entries
            .iter()
            .filter(|other| {
                other.connection_id != connection_id && other.time_control == me.time_control
            })
            .filter_map(|other| {
                let needed = self.wait_needed_for(rating_gap(me, other))?;
                let waited = me.waited(now).max(other.waited(now));
                Some(needed.saturating_sub(waited))
            })
            .min()
    }

    /// Smallest wait at which the window reaches `gap`, if it ever does
    /// before the timeout.
    fn wait_needed_for(&self, gap: u32) -> Option<Duration> {
        let cfg = &self.config;
        if gap <= cfg.base_window {
            return Some(Duration::ZERO);
        }
        if gap > cfg.max_window || cfg.window_step == 0 {
            return None;
        }
        let steps = (gap - cfg.base_window).div_ceil(cfg.window_step);
        let needed = cfg.step_interval.saturating_mul(steps);
        (needed <= cfg.timeout).then_some(needed)
    }
}

impl MatchSource for RatingQueue {
    fn label(&self) -> &'static str {
        "rating-queue"
    }

    fn is_waiting(&self, connection_id: ConnectionId) -> bool {
        self.contains(connection_id)
    }

    fn withdraw(&mut self, connection_id: ConnectionId) -> bool {
        self.remove_player(connection_id)
    }
}

impl MatchStrategy for RatingQueue {
    type Request = QueueEntry;

    /// Same as [`RatingQueue::add_player`].
    fn offer(&mut self, entry: QueueEntry) -> Option<MatchResult> {
        self.add_player(entry)
    }
}

fn rating_gap(a: &QueueEntry, b: &QueueEntry) -> u32 {
    a.rating.abs_diff(b.rating)
}

fn pair(first: QueueEntry, second: QueueEntry) -> MatchResult {
    let time_control = first.time_control;
    MatchResult {
        player1: first.into(),
        player2: second.into(),
        time_control: Some(time_control),
        rated: true,
        piece_bank: None,
        origin: MatchOrigin::RatingQueue,
    }
}
