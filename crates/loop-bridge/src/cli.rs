use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use loop_player::config::SyncConfig;

use crate::config::BridgePlayConfig;
use crate::decode::RawPcmSpec;
use crate::time_sync::{OffsetStore, TimeSyncConfig};

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "loop-bridge", version = VERSION)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Drift above this many milliseconds is corrected with a single jump
    #[arg(long, default_value_t = 200.0)]
    pub hard_sync_ms: f64,

    /// Drift above this many milliseconds is corrected gradually
    #[arg(long, default_value_t = 2.0)]
    pub soft_sync_ms: f64,

    /// Frames between two gradual correction steps
    #[arg(long, default_value_t = 50)]
    pub soft_sync_interval: u32,

    /// Output latency assumed when the device cannot report one (milliseconds)
    #[arg(long, default_value_t = 120.0)]
    pub default_latency_ms: f64,

    /// HTTP API bind address, e.g. 0.0.0.0:5560
    #[arg(long)]
    pub http_bind: Option<SocketAddr>,

    /// Interval between status log lines (milliseconds)
    #[arg(long, default_value_t = 1000)]
    pub status_interval_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Loop a file in sync with the shared timeline
    Play {
        /// Path to the loop (raw 16-bit PCM or anything Symphonia decodes)
        path: PathBuf,

        /// Start offset in milliseconds (default: derived from the timeline)
        #[arg(long, allow_hyphen_values = true)]
        offset_ms: Option<i64>,

        /// Loop length in milliseconds; 0 plays once (default: file length)
        #[arg(long)]
        loop_ms: Option<i64>,

        /// Timeline epoch as Unix milliseconds
        #[arg(long, default_value_t = 0)]
        epoch_ms: i64,

        /// Correction added to the local clock in milliseconds (default: saved SNTP offset)
        #[arg(long, allow_hyphen_values = true)]
        time_offset_ms: Option<i64>,

        #[command(flatten)]
        time_sync: TimeSyncArgs,

        /// Sample rate of raw PCM input
        #[arg(long, default_value_t = 44_100)]
        raw_rate: u32,

        /// Channel count of raw PCM input
        #[arg(long, default_value_t = 2)]
        raw_channels: u16,

        /// Requested device buffer size in frames (clamped to the device range)
        #[arg(long)]
        buffer_frames: Option<u32>,
    },
}

#[derive(clap::Args, Debug)]
pub struct TimeSyncArgs {
    /// SNTP server used to estimate the local clock correction
    #[arg(long, default_value = "time.google.com")]
    pub ntp_server: String,

    /// Do not query an SNTP server
    #[arg(long)]
    pub no_ntp: bool,

    /// SNTP requests per poll; the shortest round trip wins
    #[arg(long, default_value_t = 3)]
    pub ntp_requests: usize,

    /// Interval between SNTP polls (milliseconds)
    #[arg(long, default_value_t = 2000)]
    pub ntp_interval_ms: u64,

    /// Constant added to every SNTP estimate (milliseconds)
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub ntp_correction_ms: i64,

    /// File the last precise clock correction is saved to (default: user data dir)
    #[arg(long)]
    pub offset_store: Option<PathBuf>,

    /// Neither load nor save the clock correction
    #[arg(long)]
    pub no_offset_store: bool,
}

impl TimeSyncArgs {
    pub fn time_sync_config(&self) -> Option<TimeSyncConfig> {
        if self.no_ntp {
            return None;
        }
        Some(TimeSyncConfig {
            server: self.ntp_server.clone(),
            requests: self.ntp_requests.max(1),
            interval: Duration::from_millis(self.ntp_interval_ms.max(1)),
            correction_ms: self.ntp_correction_ms,
            ..TimeSyncConfig::default()
        })
    }

    pub fn offset_store_path(&self) -> Option<PathBuf> {
        if self.no_offset_store {
            return None;
        }
        self.offset_store.clone().or_else(OffsetStore::default_path)
    }
}

impl Args {
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            hard_sync_threshold_ms: self.hard_sync_ms,
            soft_sync_threshold_ms: self.soft_sync_ms,
            soft_sync_interval_frames: self.soft_sync_interval,
            default_latency_ms: self.default_latency_ms,
            ..SyncConfig::default()
        }
    }

    /// Fold the global flags and the `play` subcommand into one config.
    pub fn play_config(&self) -> Option<BridgePlayConfig> {
        let Some(Command::Play {
            path,
            offset_ms,
            loop_ms,
            epoch_ms,
            time_offset_ms,
            time_sync,
            raw_rate,
            raw_channels,
            buffer_frames,
        }) = &self.cmd
        else {
            return None;
        };
        Some(BridgePlayConfig {
            path: path.clone(),
            device: self.device.clone(),
            raw: RawPcmSpec {
                sample_rate: *raw_rate,
                channels: *raw_channels,
            },
            offset_ms: *offset_ms,
            loop_size_ms: *loop_ms,
            epoch_ms: *epoch_ms,
            time_offset_ms: *time_offset_ms,
            time_sync: time_sync.time_sync_config(),
            offset_store: time_sync.offset_store_path(),
            buffer_frames: *buffer_frames,
            sync: self.sync_config(),
            http_bind: self.http_bind,
            status_interval: Duration::from_millis(self.status_interval_ms.max(1)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_sync_config() {
        let args = Args::try_parse_from(["loop-bridge", "play", "loop.raw"]).unwrap();
        assert_eq!(args.sync_config(), SyncConfig::default());
        let cfg = args.play_config().unwrap();
        assert_eq!(cfg.raw.sample_rate, 44_100);
        assert_eq!(cfg.raw.channels, 2);
        assert_eq!(cfg.loop_size_ms, None);
        assert_eq!(cfg.time_offset_ms, None);
        assert_eq!(cfg.time_sync, Some(TimeSyncConfig::default()));
        assert_eq!(cfg.status_interval, Duration::from_millis(1000));
        assert!(cfg.http_bind.is_none());
    }

    #[test]
    fn play_flags_are_carried_over() {
        let args = Args::try_parse_from([
            "loop-bridge",
            "--device",
            "usb",
            "--hard-sync-ms",
            "150",
            "--http-bind",
            "127.0.0.1:5560",
            "play",
            "loop.flac",
            "--offset-ms",
            "-20",
            "--loop-ms",
            "296250",
            "--epoch-ms",
            "1612384206000",
        ])
        .unwrap();
        let cfg = args.play_config().unwrap();
        assert_eq!(cfg.device.as_deref(), Some("usb"));
        assert_eq!(cfg.offset_ms, Some(-20));
        assert_eq!(cfg.loop_size_ms, Some(296_250));
        assert_eq!(cfg.epoch_ms, 1_612_384_206_000);
        assert_eq!(cfg.sync.hard_sync_threshold_ms, 150.0);
        assert_eq!(cfg.http_bind, Some("127.0.0.1:5560".parse().unwrap()));
    }

    #[test]
    fn clock_correction_flags() {
        let args = Args::try_parse_from([
            "loop-bridge",
            "play",
            "loop.raw",
            "--time-offset-ms",
            "-15",
            "--ntp-server",
            "pool.ntp.org",
            "--ntp-requests",
            "5",
            "--ntp-correction-ms",
            "-30",
            "--offset-store",
            "/tmp/offset.json",
        ])
        .unwrap();
        let cfg = args.play_config().unwrap();
        assert_eq!(cfg.time_offset_ms, Some(-15));
        let sync = cfg.time_sync.unwrap();
        assert_eq!(sync.server, "pool.ntp.org");
        assert_eq!(sync.requests, 5);
        assert_eq!(sync.correction_ms, -30);
        assert_eq!(cfg.offset_store, Some(PathBuf::from("/tmp/offset.json")));

        let args = Args::try_parse_from([
            "loop-bridge",
            "play",
            "loop.raw",
            "--no-ntp",
            "--no-offset-store",
        ])
        .unwrap();
        let cfg = args.play_config().unwrap();
        assert!(cfg.time_sync.is_none());
        assert!(cfg.offset_store.is_none());
    }

    #[test]
    fn list_devices_needs_no_subcommand() {
        let args = Args::try_parse_from(["loop-bridge", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.play_config().is_none());
    }
}
