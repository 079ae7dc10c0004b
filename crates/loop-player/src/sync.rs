//! Drift-correction policy.
//!
//! Once per callback the renderer compares where playback *should* be (wall clock) with where
//! it *is* (device feedback) and picks one of three reactions:
//! - **hard sync**: jump the cursor by the whole offset (session start, large drift)
//! - **soft sync**: nudge the cursor one step at a time while rendering (small drift)
//! - nothing, when already within the soft threshold

use crate::config::SyncConfig;

/// Correction chosen for a single callback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SyncDecision {
    /// Move the cursor by `offset_ms` at once.
    Hard { offset_ms: f64 },
    /// Nudge the cursor in `direction` (+1 forward, -1 backward) during this callback.
    Soft { offset_ms: f64, direction: i64 },
    /// Within tolerance.
    InSync { offset_ms: f64 },
}

impl SyncDecision {
    pub fn offset_ms(&self) -> f64 {
        match *self {
            SyncDecision::Hard { offset_ms }
            | SyncDecision::Soft { offset_ms, .. }
            | SyncDecision::InSync { offset_ms } => offset_ms,
        }
    }
}

/// Wall-clock position the output should be at, in milliseconds.
///
/// Wrapped into `[0, loop_size_ms)` when looping; linear otherwise.
pub fn estimated_target_ms(
    start_offset_ms: i64,
    elapsed_ms: i64,
    playback_shift_ms: i64,
    loop_size_ms: i64,
) -> f64 {
    let target = start_offset_ms
        .saturating_add(elapsed_ms)
        .saturating_add(playback_shift_ms);
    if loop_size_ms > 0 {
        target.rem_euclid(loop_size_ms) as f64
    } else {
        target as f64
    }
}

/// Signed `target - observed`, taking the shorter way around the loop.
///
/// A target just past the loop start and an observed position just before the loop end are
/// a few milliseconds apart, not almost a full loop. Ties resolve forward.
pub fn normalized_offset_ms(target_ms: f64, observed_ms: f64, loop_size_ms: i64) -> f64 {
    let raw = target_ms - observed_ms;
    if loop_size_ms <= 0 {
        return raw;
    }
    let size = loop_size_ms as f64;
    let forward = raw.rem_euclid(size);
    let backward = forward - size;
    if forward <= -backward { forward } else { backward }
}

/// Pick the correction for an already-normalized offset.
pub fn decide(offset_ms: f64, just_started: bool, config: &SyncConfig) -> SyncDecision {
    let magnitude = offset_ms.abs();
    if just_started || magnitude > config.hard_sync_threshold_ms {
        SyncDecision::Hard { offset_ms }
    } else if magnitude > config.soft_sync_threshold_ms {
        SyncDecision::Soft {
            offset_ms,
            direction: if offset_ms > 0.0 { 1 } else { -1 },
        }
    } else {
        SyncDecision::InSync { offset_ms }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> SyncConfig {
        SyncConfig::default()
    }

    #[test]
    fn hard_sync_boundaries() {
        assert!(matches!(decide(199.0, false, &cfg()), SyncDecision::Soft { .. }));
        assert!(matches!(decide(200.0, false, &cfg()), SyncDecision::Soft { .. }));
        assert!(matches!(decide(201.0, false, &cfg()), SyncDecision::Hard { .. }));
        assert!(matches!(decide(-200.0, false, &cfg()), SyncDecision::Soft { .. }));
        assert!(matches!(decide(-201.0, false, &cfg()), SyncDecision::Hard { .. }));
    }

    #[test]
    fn soft_sync_boundaries() {
        assert!(matches!(decide(1.0, false, &cfg()), SyncDecision::InSync { .. }));
        assert!(matches!(decide(2.0, false, &cfg()), SyncDecision::InSync { .. }));
        assert!(matches!(decide(-2.0, false, &cfg()), SyncDecision::InSync { .. }));
        assert!(matches!(decide(3.0, false, &cfg()), SyncDecision::Soft { .. }));
        assert!(matches!(decide(-3.0, false, &cfg()), SyncDecision::Soft { .. }));
    }

    #[test]
    fn soft_sync_direction_follows_sign() {
        assert_eq!(
            decide(10.0, false, &cfg()),
            SyncDecision::Soft { offset_ms: 10.0, direction: 1 }
        );
        assert_eq!(
            decide(-10.0, false, &cfg()),
            SyncDecision::Soft { offset_ms: -10.0, direction: -1 }
        );
    }

    #[test]
    fn just_started_forces_hard_sync() {
        assert_eq!(decide(0.0, true, &cfg()), SyncDecision::Hard { offset_ms: 0.0 });
        assert_eq!(decide(3.0, true, &cfg()), SyncDecision::Hard { offset_ms: 3.0 });
    }

    #[test]
    fn offset_wraps_across_loop_boundary() {
        assert_eq!(normalized_offset_ms(5.0, 995.0, 1000), 10.0);
        assert_eq!(normalized_offset_ms(995.0, 5.0, 1000), -10.0);
        assert_eq!(normalized_offset_ms(0.0, 999.0, 1000), 1.0);
    }

    #[test]
    fn offset_keeps_sign_inside_loop() {
        assert_eq!(normalized_offset_ms(600.0, 500.0, 1000), 100.0);
        assert_eq!(normalized_offset_ms(500.0, 600.0, 1000), -100.0);
        assert_eq!(normalized_offset_ms(750.0, 250.0, 1000), 500.0);
    }

    #[test]
    fn offset_is_raw_when_not_looping() {
        assert_eq!(normalized_offset_ms(5.0, 995.0, 0), -990.0);
        assert_eq!(normalized_offset_ms(5.0, 995.0, -10), -990.0);
    }

    #[test]
    fn target_wraps_and_includes_shift() {
        assert_eq!(estimated_target_ms(900, 150, 0, 1000), 50.0);
        assert_eq!(estimated_target_ms(0, 500, 0, 1000), 500.0);
        assert_eq!(estimated_target_ms(0, 500, -600, 1000), 900.0);
        assert_eq!(estimated_target_ms(900, 150, 0, 0), 1050.0);
    }
}
