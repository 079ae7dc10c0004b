//! Loop Bridge: plays a looped PCM buffer through a CPAL output device, kept in step with a
//! wall-clock timeline shared by every listener.
//!
//! ## Sync
//! Each device callback compares the wall-clock target with the position the device reports
//! and corrects the read cursor: one jump for large drift, a frame at a time for small drift.
//! The local clock correction comes from SNTP, with the last precise value saved for the next
//! start.
//!
//! ## Modes
//! - `play <path>`: loop a file against the timeline until Ctrl-C.
//! - `--list-devices`: print output devices and exit.

use anyhow::{Result, anyhow};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use loop_bridge::{cli, runtime};

fn main() -> Result<()> {
    let args = cli::Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,loop_bridge=info,loop_player=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let config = args
        .play_config()
        .ok_or_else(|| anyhow!("nothing to do; try `loop-bridge play <path>` or --list-devices"))?;
    runtime::run_play(config)
}
