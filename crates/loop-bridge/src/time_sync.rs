//! Local clock correction from SNTP.
//!
//! A background thread polls an SNTP server, keeps the ten answers with the shortest round
//! trip, discards outliers and grades the resulting estimate. `Good` estimates update the
//! timeline (and, while playing, the playback shift); `Perfect` ones are also saved so the
//! next start can use them before the network answers. Polling ends a while after the first
//! `Perfect` estimate.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use loop_player::renderer::LoopControl;
use serde::{Deserialize, Serialize};

use crate::sntp::{self, SntpSample};
use crate::timeline::{Timeline, unix_now_ms};

const KEEP_SAMPLES: usize = 10;
/// Saved offsets older than this are ignored.
const STORE_MAX_AGE_MS: i64 = 2 * 24 * 60 * 60 * 1000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Accuracy {
    Bad,
    Good,
    Perfect,
}

/// Offset derived from the retained samples.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OffsetEstimate {
    pub offset_ms: i64,
    /// Mean absolute deviation of the samples that were kept.
    pub spread_ms: i64,
    pub samples: usize,
    pub round_trip_ms: f64,
}

impl OffsetEstimate {
    pub fn accuracy(&self) -> Accuracy {
        if self.samples >= 5 && self.spread_ms < 10 {
            Accuracy::Perfect
        } else if self.samples >= 3 && self.spread_ms < 50 {
            Accuracy::Good
        } else {
            Accuracy::Bad
        }
    }
}

fn mean_abs_deviation(samples: &[SntpSample], center: i64) -> i64 {
    samples
        .iter()
        .map(|s| (s.offset_ms - center).abs())
        .sum::<i64>()
        / samples.len() as i64
}

fn mean_offset(samples: &[SntpSample]) -> i64 {
    samples.iter().map(|s| s.offset_ms).sum::<i64>() / samples.len() as i64
}

/// Best-round-trip sample window.
#[derive(Debug, Default)]
pub struct OffsetEstimator {
    /// Sorted by round trip, shortest first.
    samples: Vec<SntpSample>,
}

impl OffsetEstimator {
    pub fn push(&mut self, sample: SntpSample) -> OffsetEstimate {
        let at = self
            .samples
            .partition_point(|s| s.round_trip_ms <= sample.round_trip_ms);
        self.samples.insert(at, sample);
        self.samples.truncate(KEEP_SAMPLES);
        self.estimate()
    }

    /// Average the samples whose offset lies within the mean deviation of the mean.
    fn estimate(&self) -> OffsetEstimate {
        let all = &self.samples;
        let mean = mean_offset(all);
        let deviation = mean_abs_deviation(all, mean);
        let mut precise: Vec<SntpSample> = all
            .iter()
            .copied()
            .filter(|s| (s.offset_ms - mean).abs() <= deviation)
            .collect();
        if precise.is_empty() {
            precise = all.clone();
        }
        let offset_ms = mean_offset(&precise);
        OffsetEstimate {
            offset_ms,
            spread_ms: mean_abs_deviation(&precise, offset_ms),
            samples: precise.len(),
            round_trip_ms: precise.iter().map(|s| s.round_trip_ms as f64).sum::<f64>()
                / precise.len() as f64,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedOffset {
    offset_ms: i64,
    saved_unix_ms: i64,
}

/// JSON file holding the last `Perfect` offset.
#[derive(Clone, Debug)]
pub struct OffsetStore {
    path: PathBuf,
}

impl OffsetStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `<data dir>/time-offset.json` for this user, if the platform has one.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("io", "loop-sync", "loop-bridge")
            .map(|dirs| dirs.data_dir().join("time-offset.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The saved offset, unless missing, unreadable, or not saved within the last two days.
    pub fn load(&self, now_unix_ms: i64) -> Option<i64> {
        let content = std::fs::read_to_string(&self.path).ok()?;
        let saved: SavedOffset = match serde_json::from_str(&content) {
            Ok(saved) => saved,
            Err(e) => {
                tracing::warn!(path = ?self.path, error = %e, "ignoring unreadable time offset");
                return None;
            }
        };
        let age_ms = now_unix_ms - saved.saved_unix_ms;
        (0..STORE_MAX_AGE_MS)
            .contains(&age_ms)
            .then_some(saved.offset_ms)
    }

    pub fn save(&self, offset_ms: i64, now_unix_ms: i64) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("create {}", dir.display()))?;
        }
        let content = serde_json::to_string_pretty(&SavedOffset {
            offset_ms,
            saved_unix_ms: now_unix_ms,
        })?;
        std::fs::write(&self.path, content)
            .with_context(|| format!("write {}", self.path.display()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimeSyncConfig {
    /// `host` or `host:port`.
    pub server: String,
    /// Requests per poll; the shortest round trip wins.
    pub requests: usize,
    pub timeout: Duration,
    pub interval: Duration,
    /// How long to keep polling after the first `Perfect` estimate.
    pub settle: Duration,
    /// Constant added to every SNTP estimate.
    pub correction_ms: i64,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            server: "time.google.com".to_string(),
            requests: 3,
            timeout: Duration::from_secs(10),
            interval: Duration::from_secs(2),
            settle: Duration::from_secs(120),
            correction_ms: 0,
        }
    }
}

/// Turns SNTP samples into timeline updates.
pub struct TimeSync {
    estimator: OffsetEstimator,
    correction_ms: i64,
    timeline: Arc<Timeline>,
    control: LoopControl,
    store: Option<OffsetStore>,
}

impl TimeSync {
    pub fn new(
        correction_ms: i64,
        timeline: Arc<Timeline>,
        control: LoopControl,
        store: Option<OffsetStore>,
    ) -> Self {
        Self {
            estimator: OffsetEstimator::default(),
            correction_ms,
            timeline,
            control,
            store,
        }
    }

    /// Fold in one sample and publish the estimate if it is good enough.
    pub fn accept(&mut self, sample: SntpSample, now_unix_ms: i64) -> Accuracy {
        let estimate = self.estimator.push(sample);
        let accuracy = estimate.accuracy();
        let offset_ms = estimate.offset_ms + self.correction_ms;
        tracing::debug!(
            offset_ms,
            spread_ms = estimate.spread_ms,
            samples = estimate.samples,
            round_trip_ms = estimate.round_trip_ms,
            ?accuracy,
            "time offset estimate"
        );
        if accuracy == Accuracy::Bad {
            return accuracy;
        }
        self.timeline.apply_offset(offset_ms, &self.control);
        if accuracy == Accuracy::Perfect {
            if let Some(store) = &self.store {
                if let Err(e) = store.save(offset_ms, now_unix_ms) {
                    tracing::warn!("saving time offset failed: {e:#}");
                }
            }
        }
        accuracy
    }
}

/// Poll `config.server` until settled or until every `stop` sender is dropped.
pub fn spawn_time_sync(
    config: TimeSyncConfig,
    mut sync: TimeSync,
    stop: Receiver<()>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let mut server = None;
        let mut perfect_since: Option<Instant> = None;
        loop {
            match stop.recv_timeout(config.interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                Err(RecvTimeoutError::Timeout) => {}
            }
            if perfect_since.is_some_and(|since| since.elapsed() > config.settle) {
                tracing::info!(
                    offset_ms = sync.timeline.offset_tracker().current_ms(),
                    "time offset settled"
                );
                break;
            }

            let addr = match server {
                Some(addr) => addr,
                None => match sntp::resolve(&config.server) {
                    Ok(addr) => *server.insert(addr),
                    Err(e) => {
                        tracing::warn!("{e:#}");
                        continue;
                    }
                },
            };
            let sample = match sntp::best_of(addr, config.requests, config.timeout) {
                Ok(sample) => sample,
                Err(e) => {
                    tracing::warn!(server = %addr, "{e:#}");
                    continue;
                }
            };
            if sync.accept(sample, unix_now_ms()) == Accuracy::Perfect {
                perfect_since.get_or_insert_with(Instant::now);
            }
        }
        tracing::debug!("time sync stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use loop_player::config::SyncConfig;
    use loop_player::convert::StreamFormat;
    use loop_player::timing::{ManualClock, ManualTiming};

    fn sample(offset_ms: i64, round_trip_ms: i64) -> SntpSample {
        SntpSample {
            offset_ms,
            round_trip_ms,
        }
    }

    fn control() -> LoopControl {
        LoopControl::new(
            StreamFormat::pcm16(48_000, 2).unwrap(),
            SyncConfig::default(),
            Arc::new(ManualTiming::new(Some(0.0))),
            Arc::new(ManualClock::new(0)),
        )
    }

    #[test]
    fn outliers_are_left_out_of_the_estimate() {
        let mut estimator = OffsetEstimator::default();
        for (offset, rtt) in [(100, 10), (101, 11), (99, 12), (100, 13)] {
            estimator.push(sample(offset, rtt));
        }
        let estimate = estimator.push(sample(400, 14));
        assert_eq!(estimate.offset_ms, 100);
        assert_eq!(estimate.samples, 4);
        assert_eq!(estimate.spread_ms, 0);
        assert_eq!(estimate.accuracy(), Accuracy::Good);
    }

    #[test]
    fn window_keeps_the_shortest_round_trips() {
        let mut estimator = OffsetEstimator::default();
        for rtt in 1..=10 {
            estimator.push(sample(50, rtt));
        }
        // Slow answers with a wild offset never displace the fast ones.
        let estimate = estimator.push(sample(900, 500));
        assert_eq!(estimate.offset_ms, 50);
        assert_eq!(estimate.samples, 10);
        assert_eq!(estimate.accuracy(), Accuracy::Perfect);
    }

    #[test]
    fn accuracy_needs_enough_consistent_samples() {
        let grade = |samples, spread_ms| {
            OffsetEstimate {
                offset_ms: 0,
                spread_ms,
                samples,
                round_trip_ms: 10.0,
            }
            .accuracy()
        };
        assert_eq!(grade(2, 0), Accuracy::Bad);
        assert_eq!(grade(3, 49), Accuracy::Good);
        assert_eq!(grade(3, 50), Accuracy::Bad);
        assert_eq!(grade(5, 9), Accuracy::Perfect);
        assert_eq!(grade(5, 10), Accuracy::Good);
    }

    #[test]
    fn store_round_trips_and_expires() {
        let dir = tempfile::tempdir().unwrap();
        let store = OffsetStore::new(dir.path().join("nested").join("time-offset.json"));
        assert_eq!(store.load(1_000), None);

        store.save(-42, 1_000).unwrap();
        assert_eq!(store.load(1_000 + 60_000), Some(-42));
        assert_eq!(store.load(1_000 + STORE_MAX_AGE_MS), None);
        // Saved "in the future": the wall clock moved underneath us.
        assert_eq!(store.load(500), None);
    }

    #[test]
    fn corrupt_store_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("time-offset.json");
        std::fs::write(&path, "not json").unwrap();
        assert_eq!(OffsetStore::new(path).load(0), None);
    }

    #[test]
    fn good_estimates_shift_playback_and_perfect_ones_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let store = OffsetStore::new(dir.path().join("time-offset.json"));
        let timeline = Arc::new(Timeline::new(0, 1_000, 0));
        let control = control();
        control.play(0, 1_000);
        timeline.offset_tracker().mark_started();
        let mut sync = TimeSync::new(-30, timeline.clone(), control.clone(), Some(store.clone()));

        assert_eq!(sync.accept(sample(80, 10), 5_000), Accuracy::Bad);
        assert_eq!(sync.accept(sample(80, 11), 5_000), Accuracy::Bad);
        assert_eq!(control.playback_shift_ms(), 0);

        assert_eq!(sync.accept(sample(80, 12), 5_000), Accuracy::Good);
        assert_eq!(timeline.offset_tracker().current_ms(), 50);
        assert_eq!(control.playback_shift_ms(), 50);
        assert_eq!(store.load(5_000), None);

        sync.accept(sample(80, 13), 5_000);
        assert_eq!(sync.accept(sample(80, 14), 5_000), Accuracy::Perfect);
        assert_eq!(store.load(5_000), Some(50));
    }

    #[test]
    fn worker_stops_when_its_sender_is_dropped() {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let config = TimeSyncConfig {
            server: "127.0.0.1:9".to_string(),
            interval: Duration::from_millis(10),
            timeout: Duration::from_millis(10),
            ..TimeSyncConfig::default()
        };
        let sync = TimeSync::new(0, Arc::new(Timeline::new(0, 1_000, 0)), control(), None);
        let handle = spawn_time_sync(config, sync, stop_rx);
        drop(stop_tx);
        handle.join().unwrap();
    }
}
