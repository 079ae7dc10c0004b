//! Bridge runtime helpers.
//!
//! Provides device enumeration and the synced loop playback session.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use loop_player::events;
use loop_player::timing::{Clock, MonotonicClock};

use crate::config::BridgePlayConfig;
use crate::engine::SyncEngine;
use crate::http_api::{self, ApiState};
use crate::time_sync::{self, OffsetStore, TimeSync};
use crate::timeline::{self, Timeline};
use crate::{decode, device, monitor};

/// List output devices and print them to stdout.
pub fn list_devices() -> Result<()> {
    let host = cpal::default_host();
    device::list_devices(&host)
}

/// Load the loop, start the stream and keep it in sync until Ctrl-C.
pub fn run_play(config: BridgePlayConfig) -> Result<()> {
    let loaded = decode::load(&config.path, config.raw)?;
    tracing::info!(
        path = ?config.path,
        rate_hz = loaded.sample_rate,
        channels = loaded.channels,
        duration_ms = loaded.duration_ms(),
        "loop loaded"
    );

    let host = cpal::default_host();
    let device_name = device::normalize_device_name(config.device.clone());
    let device = device::pick_device(&host, device_name.as_deref())?;
    let supported = device::pick_output_config(&device, loaded.sample_rate, loaded.channels)?;
    if supported.sample_rate() != loaded.sample_rate {
        return Err(anyhow!(
            "output device cannot play {} Hz (closest supported: {} Hz)",
            loaded.sample_rate,
            supported.sample_rate()
        ));
    }
    let buffer_size = device::pick_buffer_size(&supported, config.buffer_frames);

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let mut engine = SyncEngine::new(device, &supported, buffer_size, config.sync.clone(), clock)?;
    let control = engine.control();
    let _event_logger = events::spawn_event_logger(control.events());

    let loop_size_ms = config.loop_size_ms.unwrap_or_else(|| loaded.duration_ms());
    let store = config.offset_store.clone().map(OffsetStore::new);
    let time_offset_ms = initial_time_offset(config.time_offset_ms, store.as_ref());
    let timeline = Arc::new(Timeline::new(config.epoch_ms, loop_size_ms, time_offset_ms));

    engine.prepare(loaded.buffer)?;

    let offset_ms = config.offset_ms.unwrap_or_else(|| timeline.offset_now());
    control.play(offset_ms, loop_size_ms);
    timeline.offset_tracker().mark_started();
    tracing::info!(offset_ms, loop_size_ms, time_offset_ms, "playback started");

    // Dropping the sender stops the SNTP worker.
    let (time_sync_stop, time_sync_stop_rx) = crossbeam_channel::bounded::<()>(1);
    if let Some(sync_config) = config.time_sync.clone() {
        tracing::info!(server = %sync_config.server, "estimating clock correction over sntp");
        let sync = TimeSync::new(
            sync_config.correction_ms,
            timeline.clone(),
            control.clone(),
            store,
        );
        let _time_sync = time_sync::spawn_time_sync(sync_config, sync, time_sync_stop_rx);
    }

    if let Some(bind) = config.http_bind {
        let _http = http_api::spawn_http_server(
            bind,
            ApiState {
                control: control.clone(),
                timeline: timeline.clone(),
            },
        );
    }

    let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.try_send(());
    })
    .context("install Ctrl-C handler")?;

    monitor::run(&mut engine, &timeline, config.status_interval, &shutdown_rx);
    drop(time_sync_stop);

    control.stop();
    engine.stop();
    tracing::info!("playback stopped");
    Ok(())
}

/// An explicit correction wins; otherwise a recent saved one, otherwise none.
fn initial_time_offset(explicit_ms: Option<i64>, store: Option<&OffsetStore>) -> i64 {
    if let Some(ms) = explicit_ms {
        return ms;
    }
    let saved = store.and_then(|s| s.load(timeline::unix_now_ms()).map(|ms| (s, ms)));
    match saved {
        Some((store, ms)) => {
            tracing::info!(offset_ms = ms, path = ?store.path(), "using saved time offset");
            ms
        }
        None => 0,
    }
}
