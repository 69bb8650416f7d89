//! Interpolation.
//!
//! The remote sends values at discrete ticks; the client renders at its own
//! rate somewhere between them. Each interpolated variable keeps a fixed ring
//! of samples indexed by `frame % horizon`. Every slot remembers the frame it
//! was written at, so a slot left over from a previous lap is never read as
//! current.

use netsync_shared::math::Lerp;

#[derive(Debug, Clone)]
pub struct InterpolationBuffer<T> {
    slots: Vec<Option<(u32, T)>>,
    len: usize,
}

impl<T: Lerp> InterpolationBuffer<T> {
    /// Creates a buffer holding at most `horizon` consecutive frames.
    pub fn new(horizon: u32) -> Self {
        let horizon = horizon.max(2) as usize;
        Self {
            slots: vec![None; horizon],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn index(&self, frame: u32) -> usize {
        frame as usize % self.slots.len()
    }

    /// Stores `value` at `frame`.
    ///
    /// Returns `false` when the slot already holds a newer frame; that sample
    /// is outside the horizon and is dropped.
    pub fn add_value(&mut self, frame: u32, value: T) -> bool {
        let index = self.index(frame);
        match &self.slots[index] {
            Some((existing, _)) if *existing > frame => return false,
            Some(_) => {}
            None => self.len += 1,
        }
        self.slots[index] = Some((frame, value));
        true
    }

    /// Sample stored at exactly `frame`.
    pub fn get(&self, frame: u32) -> Option<&T> {
        match &self.slots[self.index(frame)] {
            Some((stored, value)) if *stored == frame => Some(value),
            _ => None,
        }
    }

    /// Reconstructs the value at a fractional frame.
    ///
    /// Needs samples at both `floor(frame)` and `ceil(frame)`; an integral
    /// frame needs only its own sample.
    pub fn get_value(&self, frame: f64) -> Option<T> {
        if !frame.is_finite() || frame < 0.0 || frame > f64::from(u32::MAX) {
            return None;
        }
        let lo = frame.floor();
        let t = frame - lo;
        // range checked above
        let lo = lo as u32;
        let a = self.get(lo)?;
        if t == 0.0 {
            return Some(a.clone());
        }
        let b = self.get(lo.checked_add(1)?)?;
        Some(a.lerp(b, t))
    }

    /// Newest sample at or before `frame`.
    pub fn latest_at_or_before(&self, frame: u32) -> Option<(u32, &T)> {
        self.slots
            .iter()
            .flatten()
            .filter(|(stored, _)| *stored <= frame)
            .max_by_key(|(stored, _)| *stored)
            .map(|(stored, value)| (*stored, value))
    }

    /// Newest sample held.
    pub fn latest(&self) -> Option<(u32, &T)> {
        self.latest_at_or_before(u32::MAX)
    }

    /// Drops every sample older than `frame`. Returns how many were dropped.
    pub fn evict_before(&mut self, frame: u32) -> usize {
        let mut evicted = 0;
        for slot in &mut self.slots {
            if matches!(slot, Some((stored, _)) if *stored < frame) {
                *slot = None;
                evicted += 1;
            }
        }
        self.len -= evicted;
        evicted
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netsync_shared::{math::Vec2, value::WireValue};

    #[test]
    fn scalar_midpoint() {
        let mut buf = InterpolationBuffer::new(64);
        buf.add_value(10, 0.0f64);
        buf.add_value(11, 10.0f64);
        assert_eq!(buf.get_value(10.5), Some(5.0));
    }

    #[test]
    fn vec2_blends_componentwise() {
        let mut buf = InterpolationBuffer::new(64);
        buf.add_value(10, Vec2::new(0.0, 0.0));
        buf.add_value(11, Vec2::new(10.0, 10.0));
        assert_eq!(buf.get_value(10.25), Some(Vec2::new(2.5, 2.5)));
    }

    #[test]
    fn missing_bracket_is_none() {
        let mut buf = InterpolationBuffer::new(64);
        buf.add_value(10, 1.0f32);
        assert_eq!(buf.get_value(10.5), None);
        assert_eq!(buf.get_value(9.5), None);
        assert_eq!(buf.get_value(10.0), Some(1.0));
        assert_eq!(buf.get_value(-0.5), None);
        assert_eq!(buf.get_value(f64::NAN), None);
    }

    #[test]
    fn stale_lap_is_not_read() {
        let mut buf = InterpolationBuffer::new(8);
        buf.add_value(3, 1.0f64);
        // frame 11 shares slot 3
        assert_eq!(buf.get(11), None);
        assert!(buf.add_value(11, 2.0));
        assert_eq!(buf.get(3), None);
        assert_eq!(buf.get(11), Some(&2.0));
        assert_eq!(buf.len(), 1);

        // frame 3 is now older than the horizon
        assert!(!buf.add_value(3, 9.0));
        assert_eq!(buf.get(11), Some(&2.0));
    }

    #[test]
    fn eviction_and_latest() {
        let mut buf = InterpolationBuffer::new(16);
        for frame in 20..26 {
            buf.add_value(frame, WireValue::I16(frame as i16));
        }
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.latest().map(|(f, _)| f), Some(25));
        assert_eq!(buf.latest_at_or_before(22).map(|(f, _)| f), Some(22));

        assert_eq!(buf.evict_before(23), 3);
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.get(22), None);
        assert_eq!(buf.latest_at_or_before(22), None);

        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.latest(), None);
    }

    #[test]
    fn integer_values_round() {
        let mut buf = InterpolationBuffer::new(4);
        buf.add_value(1, WireValue::U8(0));
        buf.add_value(2, WireValue::U8(3));
        assert_eq!(buf.get_value(1.5), Some(WireValue::U8(2)));
    }
}
