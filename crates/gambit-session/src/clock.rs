//! Chess clocks.

use std::time::{Duration, Instant};

use gambit_protocol::{ClockSnapshot, Color, TimeControl};

/// Two countdown clocks, one per side, only one running at a time.
///
/// Nothing ticks in the background. The clock remembers when the current
/// turn started and works out the running side's remaining time on demand
/// from the `now` it is given.
#[derive(Debug, Clone)]
pub struct GameClock {
    increment: Duration,
    white: Duration,
    black: Duration,
    running: Option<Color>,
    turn_started: Instant,
}

impl GameClock {
    /// Both sides get the initial time; White's clock starts at `now`.
    pub fn start(control: TimeControl, now: Instant) -> Self {
        let initial = Duration::from_secs(u64::from(control.initial_secs));
        Self {
            increment: Duration::from_secs(u64::from(control.increment_secs)),
            white: initial,
            black: initial,
            running: Some(Color::White),
            turn_started: now,
        }
    }

    /// Time `color` has left at `now`.
    pub fn remaining(&self, color: Color, now: Instant) -> Duration {
        let banked = self.banked(color);
        if self.running == Some(color) {
            banked.saturating_sub(now.saturating_duration_since(self.turn_started))
        } else {
            banked
        }
    }

    /// The running side, once it has no time left.
    pub fn flagged(&self, now: Instant) -> Option<Color> {
        self.running
            .filter(|color| self.remaining(*color, now).is_zero())
    }

    /// Ends `mover`'s turn: charges the thinking time, adds the increment
    /// and starts the other side's clock.
    pub fn punch(&mut self, mover: Color, now: Instant) {
        let left = self.remaining(mover, now);
        *self.banked_mut(mover) = left + self.increment;
        self.running = Some(mover.opposite());
        self.turn_started = now;
    }

    /// Freezes both clocks where they stand.
    pub fn stop(&mut self, now: Instant) {
        if let Some(color) = self.running.take() {
            let left = self.remaining_unfrozen(color, now);
            *self.banked_mut(color) = left;
        }
    }

    pub fn snapshot(&self, now: Instant) -> ClockSnapshot {
        ClockSnapshot {
            white_ms: millis(self.remaining(Color::White, now)),
            black_ms: millis(self.remaining(Color::Black, now)),
        }
    }

    fn remaining_unfrozen(&self, color: Color, now: Instant) -> Duration {
        self.banked(color)
            .saturating_sub(now.saturating_duration_since(self.turn_started))
    }

    fn banked(&self, color: Color) -> Duration {
        match color {
            Color::White => self.white,
            Color::Black => self.black,
        }
    }

    fn banked_mut(&mut self, color: Color) -> &mut Duration {
        match color {
            Color::White => &mut self.white,
            Color::Black => &mut self.black,
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[test]
    fn test_start_white_runs_first() {
        let t0 = Instant::now();
        let clock = GameClock::start(TimeControl::new(60, 0), t0);
        assert_eq!(clock.remaining(Color::White, t0 + secs(10)), secs(50));
        assert_eq!(clock.remaining(Color::Black, t0 + secs(10)), secs(60));
    }

    #[test]
    fn test_punch_charges_mover_and_adds_increment() {
        let t0 = Instant::now();
        let mut clock = GameClock::start(TimeControl::new(60, 2), t0);
        clock.punch(Color::White, t0 + secs(10));

        let t1 = t0 + secs(15);
        assert_eq!(clock.remaining(Color::White, t1), secs(52));
        assert_eq!(clock.remaining(Color::Black, t1), secs(55));
        assert_eq!(
            clock.snapshot(t1),
            ClockSnapshot {
                white_ms: 52_000,
                black_ms: 55_000
            }
        );
    }

    #[test]
    fn test_flagged_only_for_running_side() {
        let t0 = Instant::now();
        let clock = GameClock::start(TimeControl::new(30, 0), t0);
        assert_eq!(clock.flagged(t0 + secs(29)), None);
        assert_eq!(clock.flagged(t0 + secs(30)), Some(Color::White));
    }

    #[test]
    fn test_stop_freezes_time() {
        let t0 = Instant::now();
        let mut clock = GameClock::start(TimeControl::new(60, 0), t0);
        clock.stop(t0 + secs(20));
        assert_eq!(clock.remaining(Color::White, t0 + secs(50)), secs(40));
        assert_eq!(clock.flagged(t0 + secs(500)), None);
    }
}
