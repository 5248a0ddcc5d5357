//! Clock and timing utilities for encode sessions.
//!
//! Every submitted frame is stamped by a [`FrameClock`]: timestamps start at
//! zero and advance by a fixed frame duration, so the produced timeline is
//! monotonic and gapless. The same counter drives keyframe cadence across the
//! main and freeze-frame phases.

use std::time::Instant;

/// Microseconds per second.
pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Every `KEYFRAME_INTERVAL`-th submitted frame (1-based) is hinted as a keyframe.
pub const KEYFRAME_INTERVAL: u64 = 150;

/// Timing assigned to a single submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameTick {
    /// 1-based submission index, counted across main and freeze phases.
    pub index: u64,
    /// Presentation timestamp in microseconds.
    pub timestamp_us: u64,
    /// Frame duration in microseconds.
    pub duration_us: u64,
    /// Whether the encoder should be asked for a keyframe.
    pub keyframe: bool,
}

/// Per-session frame clock.
#[derive(Debug, Clone)]
pub struct FrameClock {
    frame_duration_us: u64,
    next_timestamp_us: u64,
    frame_count: u64,
}

impl FrameClock {
    /// Create a clock for the given frame rate. A zero rate is treated as 1 fps.
    pub fn new(fps: u32) -> Self {
        Self {
            frame_duration_us: frame_duration_us(fps),
            next_timestamp_us: 0,
            frame_count: 0,
        }
    }

    /// Stamp the next frame and advance.
    pub fn advance(&mut self) -> FrameTick {
        self.frame_count += 1;
        let tick = FrameTick {
            index: self.frame_count,
            timestamp_us: self.next_timestamp_us,
            duration_us: self.frame_duration_us,
            keyframe: is_keyframe_index(self.frame_count),
        };
        self.next_timestamp_us += self.frame_duration_us;
        tick
    }

    /// Duration of a single frame in microseconds.
    pub fn frame_duration_us(&self) -> u64 {
        self.frame_duration_us
    }

    /// Timestamp the next call to [`advance`](Self::advance) will assign.
    pub fn next_timestamp_us(&self) -> u64 {
        self.next_timestamp_us
    }

    /// Timestamp of the most recently stamped frame, if any.
    pub fn last_timestamp_us(&self) -> Option<u64> {
        if self.frame_count == 0 {
            None
        } else {
            Some(self.next_timestamp_us - self.frame_duration_us)
        }
    }

    /// Frames stamped so far.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

/// `1_000_000 / fps`, using integer division.
pub fn frame_duration_us(fps: u32) -> u64 {
    MICROS_PER_SEC / fps.max(1) as u64
}

/// Whether the 1-based frame `index` is hinted as a keyframe.
pub fn is_keyframe_index(index: u64) -> bool {
    index != 0 && index % KEYFRAME_INTERVAL == 0
}

/// Convert freeze seconds to microseconds. Negative and non-finite values map to zero.
pub fn freeze_duration_us(freeze_seconds: f64) -> u64 {
    if !freeze_seconds.is_finite() || freeze_seconds <= 0.0 {
        return 0;
    }
    (freeze_seconds * MICROS_PER_SEC as f64).round() as u64
}

/// Number of freeze frames appended after the source is exhausted.
///
/// The freeze loop repeats while `t < t0 + freeze_us`, with `t` starting at
/// `t0` and advancing by `frame_duration_us`. That is `ceil(freeze_us / frame_duration_us)`,
/// so a freeze span that does not divide evenly gets one extra frame.
pub fn freeze_frame_count(freeze_us: u64, frame_duration_us: u64) -> u64 {
    if freeze_us == 0 || frame_duration_us == 0 {
        return 0;
    }
    freeze_us.div_ceil(frame_duration_us)
}

/// Wall clock for a single encode run.
#[derive(Debug, Clone)]
pub struct EncodeClock {
    started: Instant,
    started_wall: String,
}

impl EncodeClock {
    /// Start a clock anchored to now.
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            started_wall: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Seconds elapsed since the run started.
    pub fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    /// Wall-clock time at start (RFC 3339).
    pub fn started_wall(&self) -> &str {
        &self.started_wall
    }

    /// Encoded frames per wall-clock second.
    pub fn throughput(&self, frames: u64) -> f64 {
        let secs = self.elapsed_secs();
        if secs <= f64::EPSILON {
            return 0.0;
        }
        frames as f64 / secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_first_frame_starts_at_zero() {
        let mut clock = FrameClock::new(8);
        let tick = clock.advance();
        assert_eq!(tick.index, 1);
        assert_eq!(tick.timestamp_us, 0);
        assert_eq!(tick.duration_us, 125_000);
        assert!(!tick.keyframe);
    }

    #[test]
    fn test_twenty_four_frames_at_eight_fps() {
        let mut clock = FrameClock::new(8);
        let last = (0..24).map(|_| clock.advance()).last().unwrap();
        assert_eq!(last.timestamp_us, 2_875_000);
        assert_eq!(clock.last_timestamp_us(), Some(2_875_000));
        assert_eq!(clock.next_timestamp_us(), 3_000_000);
    }

    #[test]
    fn test_keyframe_cadence() {
        assert!(!is_keyframe_index(1));
        assert!(!is_keyframe_index(149));
        assert!(is_keyframe_index(150));
        assert!(!is_keyframe_index(151));
        assert!(is_keyframe_index(300));
    }

    #[test]
    fn test_freeze_frame_count() {
        assert_eq!(freeze_frame_count(0, 125_000), 0);
        assert_eq!(freeze_frame_count(2_000_000, 125_000), 16);
        // 2s at 3 fps: 333_333us frames, 6 frames reach 1_999_998us so a 7th is emitted.
        assert_eq!(freeze_frame_count(2_000_000, frame_duration_us(3)), 7);
    }

    #[test]
    fn test_freeze_duration_rejects_negative() {
        assert_eq!(freeze_duration_us(-1.0), 0);
        assert_eq!(freeze_duration_us(f64::NAN), 0);
        assert_eq!(freeze_duration_us(2.0), 2_000_000);
    }

    #[test]
    fn test_empty_clock_has_no_last_timestamp() {
        let clock = FrameClock::new(30);
        assert_eq!(clock.last_timestamp_us(), None);
        assert_eq!(clock.frame_count(), 0);
    }

    proptest! {
        #[test]
        fn final_timestamp_is_n_minus_one_durations(n in 1u64..500, fps in 1u32..120) {
            let mut clock = FrameClock::new(fps);
            let mut last = None;
            for _ in 0..n {
                last = Some(clock.advance());
            }
            let last = last.unwrap();
            prop_assert_eq!(last.timestamp_us, (n - 1) * (1_000_000 / fps as u64));
        }

        #[test]
        fn keyframes_fall_on_multiples_of_interval(n in 1u64..1000) {
            let mut clock = FrameClock::new(8);
            for i in 1..=n {
                let tick = clock.advance();
                prop_assert_eq!(tick.keyframe, i % 150 == 0);
            }
        }
    }
}
