//! Clock synchronization.
//!
//! Periodic ping/pong probing gives a one-way latency estimate (`ping`) and
//! the offset between the local and remote wall clocks:
//!
//! ```text
//! local_time + clock_delta ~= remote_time
//! ```
//!
//! Probing is scheduled from the dispatch loop's update so a suspended host
//! does not accumulate timer drift.

use tracing::debug;

/// A pong whose timestamps cannot be combined with the local clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("pong timestamps out of range: original {original_ms}, remote {remote_ms}, local {now_ms}")]
pub struct TimestampOverflow {
    pub now_ms: i64,
    pub original_ms: i64,
    pub remote_ms: i64,
}

/// Current local wall-clock time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Outcome of feeding one pong to [`ClockSync::on_pong`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingUpdate {
    /// The stored ping moved to the new estimate.
    Accepted { previous: i64, ping_ms: i64 },
    /// The estimate was within hysteresis of the stored ping.
    Unchanged { candidate: i64, ping_ms: i64 },
}

#[derive(Debug, Clone)]
pub struct ClockSync {
    interval_ms: i64,
    hysteresis_ms: i64,
    ping_ms: i64,
    clock_delta_ms: i64,
    /// Whether `ping_ms` holds a real estimate yet.
    estimated: bool,
    samples: u32,
    last_probe_ms: Option<i64>,
}

impl ClockSync {
    pub fn new(interval_ms: i64, hysteresis_ms: i64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            hysteresis_ms: hysteresis_ms.max(0),
            ping_ms: 1,
            clock_delta_ms: 0,
            estimated: false,
            samples: 0,
            last_probe_ms: None,
        }
    }

    /// Starts from a known ping instead of accepting the first sample blindly.
    pub fn with_ping(mut self, ping_ms: i64) -> Self {
        self.ping_ms = ping_ms.max(1);
        self.estimated = true;
        self
    }

    pub fn ping_ms(&self) -> i64 {
        self.ping_ms
    }

    pub fn clock_delta_ms(&self) -> i64 {
        self.clock_delta_ms
    }

    /// Number of pongs processed since the last reset.
    pub fn samples(&self) -> u32 {
        self.samples
    }

    pub fn probe_due(&self, now_ms: i64) -> bool {
        match self.last_probe_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.interval_ms,
        }
    }

    /// Records a probe sent at `now_ms` and returns the timestamp to put on
    /// the wire.
    pub fn start_probe(&mut self, now_ms: i64) -> i64 {
        self.last_probe_ms = Some(now_ms);
        now_ms
    }

    /// Folds one pong into the estimates.
    ///
    /// A pong whose timestamps overflow the arithmetic leaves every estimate
    /// untouched.
    pub fn on_pong(
        &mut self,
        now_ms: i64,
        original_ms: i64,
        remote_ms: i64,
    ) -> Result<PingUpdate, TimestampOverflow> {
        let overflow = TimestampOverflow {
            now_ms,
            original_ms,
            remote_ms,
        };
        let round_trip = now_ms.checked_sub(original_ms).ok_or(overflow)?.max(0);
        // ceil(rtt / 2), never below 1
        let candidate = (round_trip / 2 + round_trip % 2).max(1);
        let accept =
            !self.estimated || candidate.abs_diff(self.ping_ms) > self.hysteresis_ms.unsigned_abs();
        let ping_ms = if accept { candidate } else { self.ping_ms };
        let clock_delta_ms = remote_ms
            .checked_sub(now_ms)
            .and_then(|d| d.checked_add(ping_ms))
            .ok_or(overflow)?;

        let update = if accept {
            PingUpdate::Accepted {
                previous: self.ping_ms,
                ping_ms,
            }
        } else {
            PingUpdate::Unchanged { candidate, ping_ms }
        };
        self.ping_ms = ping_ms;
        self.estimated = true;
        self.clock_delta_ms = clock_delta_ms;
        self.samples += 1;
        debug!(
            rtt = round_trip,
            ping = self.ping_ms,
            clock_delta = self.clock_delta_ms,
            "Pong"
        );
        Ok(update)
    }

    /// Forgets every estimate; the next pong is accepted unconditionally.
    pub fn reset(&mut self) {
        *self = Self::new(self.interval_ms, self.hysteresis_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_always_accepted() {
        let mut clock = ClockSync::new(2_000, 4);
        let update = clock.on_pong(1_000, 998, 5_000).unwrap();
        assert_eq!(
            update,
            PingUpdate::Accepted {
                previous: 1,
                ping_ms: 1
            }
        );
        let update = ClockSync::new(2_000, 4).on_pong(1_000, 900, 5_000).unwrap();
        assert_eq!(
            update,
            PingUpdate::Accepted {
                previous: 1,
                ping_ms: 50
            }
        );
    }

    #[test]
    fn hysteresis_filters_small_changes() {
        let mut clock = ClockSync::new(2_000, 4).with_ping(100);

        // rtt 204 -> candidate 102
        let update = clock.on_pong(10_204, 10_000, 0).unwrap();
        assert_eq!(
            update,
            PingUpdate::Unchanged {
                candidate: 102,
                ping_ms: 100
            }
        );
        assert_eq!(clock.ping_ms(), 100);

        // rtt 212 -> candidate 106
        clock.on_pong(20_212, 20_000, 0).unwrap();
        assert_eq!(clock.ping_ms(), 106);
        assert_eq!(clock.samples(), 2);
    }

    #[test]
    fn odd_round_trip_rounds_up() {
        let mut clock = ClockSync::new(2_000, 4);
        clock.on_pong(101, 0, 0).unwrap();
        assert_eq!(clock.ping_ms(), 51);
    }

    #[test]
    fn clock_delta_uses_stored_ping() {
        let mut clock = ClockSync::new(2_000, 4);
        // local 1_100, remote stamped 50_050, rtt 100 -> ping 50
        clock.on_pong(1_100, 1_000, 50_050).unwrap();
        assert_eq!(clock.ping_ms(), 50);
        assert_eq!(clock.clock_delta_ms(), 50_050 - 1_100 + 50);
    }

    #[test]
    fn ping_never_drops_below_one() {
        let mut clock = ClockSync::new(2_000, 0);
        clock.on_pong(500, 500, 0).unwrap();
        assert_eq!(clock.ping_ms(), 1);
        // clock went backwards between probe and pong
        clock.on_pong(400, 500, 0).unwrap();
        assert_eq!(clock.ping_ms(), 1);
    }

    #[test]
    fn overflowing_pong_is_rejected() {
        let mut clock = ClockSync::new(2_000, 4);
        clock.on_pong(1_100, 1_000, 50_050).unwrap();

        let err = clock.on_pong(1_200, i64::MIN, 0).unwrap_err();
        assert_eq!(err.original_ms, i64::MIN);
        assert!(clock.on_pong(-10, i64::MAX, 0).is_err());
        assert!(clock.on_pong(1_200, 1_180, i64::MIN).is_err());

        // rejected samples leave the estimates alone
        assert_eq!(clock.ping_ms(), 50);
        assert_eq!(clock.clock_delta_ms(), 50_050 - 1_100 + 50);
        assert_eq!(clock.samples(), 1);

        // extreme but representable timestamps are fine
        clock.on_pong(i64::MAX, i64::MAX - 100, i64::MAX).unwrap();
        assert_eq!(clock.clock_delta_ms(), 50);
    }

    #[test]
    fn probe_cadence() {
        let mut clock = ClockSync::new(2_000, 4);
        assert!(clock.probe_due(0));
        assert_eq!(clock.start_probe(10), 10);
        assert!(!clock.probe_due(2_009));
        assert!(clock.probe_due(2_010));

        clock.on_pong(50, 10, 0).unwrap();
        clock.reset();
        assert!(clock.probe_due(11));
        assert_eq!(clock.samples(), 0);
        assert_eq!(clock.ping_ms(), 1);
    }
}
