//! Latency-driven ring capacity.
//!
//! The consumer drains at a fixed hardware quantum whose phase relative to
//! producer bursts is unknown, so the ring holds the nominal latency window
//! rounded up to a power of two, then doubled.

/// Per-callback scheduling overhead subtracted from the requested latency
/// before sizing (ms).
pub const DEFAULT_CALLBACK_OVERHEAD_MS: i32 = 32;

/// Frames covered by `latency_ms` at `sample_rate`, after removing
/// `overhead_ms`. Negative windows clamp to zero.
pub fn latency_frames(latency_ms: i32, sample_rate: u32, overhead_ms: i32) -> usize {
    let window_ms = latency_ms.saturating_sub(overhead_ms).max(0) as u64;
    (sample_rate as u64 * window_ms / 1000) as usize
}

/// Ring capacity in frames for a target latency: `npot(raw) * 2`.
///
/// Always a power of two and never smaller than `2 * latency_frames(..)`.
pub fn capacity_for_latency(latency_ms: i32, sample_rate: u32, overhead_ms: i32) -> usize {
    latency_frames(latency_ms, sample_rate, overhead_ms).next_power_of_two() * 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtracts_overhead_before_sizing() {
        // 64 ms - 32 ms = 32 ms at 48 kHz = 1536 frames -> 2048 -> 4096
        assert_eq!(latency_frames(64, 48_000, DEFAULT_CALLBACK_OVERHEAD_MS), 1536);
        assert_eq!(capacity_for_latency(64, 48_000, DEFAULT_CALLBACK_OVERHEAD_MS), 4096);
    }

    #[test]
    fn exact_power_of_two_is_not_bumped() {
        // 1024 frames exactly: npot(1024) = 1024, doubled = 2048
        assert_eq!(capacity_for_latency(1024, 1000, 0), 2048);
    }

    #[test]
    fn negative_and_short_latency_clamp_to_zero_window() {
        assert_eq!(latency_frames(-50, 44_100, 0), 0);
        assert_eq!(latency_frames(10, 44_100, 32), 0);
        // npot(0) = 1, doubled
        assert_eq!(capacity_for_latency(-50, 44_100, 32), 2);
    }

    #[test]
    fn capacity_is_power_of_two_and_covers_doubled_window() {
        for rate in [8_000u32, 22_050, 44_100, 48_000, 96_000] {
            for latency in [0, 33, 64, 100, 250, 500] {
                let raw = latency_frames(latency, rate, DEFAULT_CALLBACK_OVERHEAD_MS);
                let cap = capacity_for_latency(latency, rate, DEFAULT_CALLBACK_OVERHEAD_MS);
                assert!(cap.is_power_of_two(), "rate={rate} latency={latency}");
                assert!(cap >= raw * 2, "rate={rate} latency={latency}");
            }
        }
    }
}
