use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

pub use loop_player::config::SyncConfig;

pub use crate::decode::RawPcmSpec;
pub use crate::time_sync::TimeSyncConfig;

#[derive(Clone, Debug)]
pub struct BridgePlayConfig {
    pub path: PathBuf,
    pub device: Option<String>,
    pub raw: RawPcmSpec,
    pub offset_ms: Option<i64>,
    pub loop_size_ms: Option<i64>,
    pub epoch_ms: i64,
    /// Explicit clock correction; overrides the saved one.
    pub time_offset_ms: Option<i64>,
    /// SNTP polling, unless disabled.
    pub time_sync: Option<TimeSyncConfig>,
    pub offset_store: Option<PathBuf>,
    pub buffer_frames: Option<u32>,
    pub sync: SyncConfig,
    pub http_bind: Option<SocketAddr>,
    pub status_interval: Duration,
}
