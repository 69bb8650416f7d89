//! Tick estimation.
//!
//! The remote tags queue frames with a 16-bit tick id. [`TickUnwrapper`]
//! extends those ids into a monotonic `u32` frame number so interpolation
//! buffers never see a wrap. [`TickEstimator`] turns wall-clock time into the
//! fractional frame that should be rendered now.

use netsync_shared::protocol::InitInfo;

use crate::clock::ClockSync;

/// Half of the 16-bit tick space.
const TICK_WRAP_THRESHOLD: u16 = u16::MAX / 2;

/// Wrap-aware "is `a` newer than `b`" for 16-bit tick ids.
pub fn tick_greater_than(a: u16, b: u16) -> bool {
    ((a > b) && (a - b <= TICK_WRAP_THRESHOLD)) || ((a < b) && (b - a > TICK_WRAP_THRESHOLD))
}

#[derive(Debug, Clone, Default)]
pub struct TickUnwrapper {
    latest: Option<u32>,
}

impl TickUnwrapper {
    /// Anchors the frame sequence at the handshake reference tick.
    pub fn seed(&mut self, reference_tick: u16) -> u32 {
        let frame = u32::from(reference_tick);
        self.latest = Some(frame);
        frame
    }

    /// Newest frame seen so far.
    pub fn latest(&self) -> Option<u32> {
        self.latest
    }

    /// Maps a wire tick onto the frame closest to the newest frame seen.
    ///
    /// Ticks older than the newest one map to earlier frames and leave the
    /// newest frame alone.
    pub fn unwrap(&mut self, tick: u16) -> u32 {
        let Some(latest) = self.latest else {
            return self.seed(tick);
        };
        // `latest as u16` keeps the low bits; the signed step is half-range
        let step = tick.wrapping_sub(latest as u16) as i16;
        let frame = u32::try_from(i64::from(latest) + i64::from(step)).unwrap_or(0);
        if tick_greater_than(tick, latest as u16) {
            self.latest = Some(frame);
        }
        frame
    }

    pub fn reset(&mut self) {
        self.latest = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("remote tick rate must be non-zero")]
pub struct ZeroTickRate;

/// Handshake reference point plus the fixed rendering delay.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickEstimator {
    tick_rate: u8,
    reference_time_ms: i64,
    reference_frame: u32,
    dejitter_ms: f64,
}

impl TickEstimator {
    pub fn new(
        tick_rate: u8,
        reference_time_ms: i64,
        reference_frame: u32,
        dejitter_ms: f64,
    ) -> Result<Self, ZeroTickRate> {
        if tick_rate == 0 {
            return Err(ZeroTickRate);
        }
        Ok(Self {
            tick_rate,
            reference_time_ms,
            reference_frame,
            dejitter_ms,
        })
    }

    pub fn from_init(
        info: &InitInfo,
        reference_frame: u32,
        dejitter_ms: f64,
    ) -> Result<Self, ZeroTickRate> {
        Self::new(
            info.tick_rate,
            info.reference_time_ms,
            reference_frame,
            dejitter_ms,
        )
    }

    /// Duration of one remote tick.
    pub fn tick_ms(&self) -> f64 {
        1000.0 / f64::from(self.tick_rate)
    }

    /// Remote instant to render at local time `now_ms`, in frames.
    ///
    /// Stays one tick behind the freshest estimate so both interpolation
    /// brackets have usually arrived.
    pub fn fractional_tick(&self, now_ms: i64, clock: &ClockSync) -> f64 {
        let adjusted = now_ms.saturating_add(clock.clock_delta_ms()) as f64
            - clock.ping_ms() as f64
            - self.dejitter_ms;
        let elapsed = adjusted - self.reference_time_ms as f64;
        f64::from(self.reference_frame) + elapsed / 1000.0 * f64::from(self.tick_rate) - 1.0
    }
}
