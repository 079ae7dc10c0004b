//! HTTP control API.
//!
//! Handlers only touch the thread-safe [`LoopControl`] and the [`Timeline`]; the stream itself
//! stays with the engine thread.

use std::net::SocketAddr;
use std::sync::Arc;

use actix_web::{App, HttpResponse, HttpServer, Responder, get, post, web};
use loop_player::renderer::LoopControl;
use loop_sync_types::{PlayRequest, ShiftRequest, TimeOffsetRequest};
use serde::Serialize;

use crate::timeline::Timeline;

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub control: LoopControl,
    pub timeline: Arc<Timeline>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[get("/health")]
async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[get("/status")]
async fn status(state: web::Data<ApiState>) -> impl Responder {
    HttpResponse::Ok().json(state.control.status())
}

/// Start or re-seek playback. Missing fields fall back to the shared timeline.
#[post("/play")]
async fn play(state: web::Data<ApiState>, body: web::Json<PlayRequest>) -> impl Responder {
    let loop_size_ms = body.loop_size_ms.unwrap_or(state.timeline.loop_size_ms());
    let offset_ms = body
        .offset_ms
        .unwrap_or_else(|| state.timeline.offset_now());
    tracing::info!(offset_ms, loop_size_ms, "play request");
    state.control.play(offset_ms, loop_size_ms);
    state.timeline.offset_tracker().mark_started();
    HttpResponse::Ok().json(state.control.status())
}

#[post("/stop")]
async fn stop(state: web::Data<ApiState>) -> impl Responder {
    tracing::info!("stop request");
    state.control.stop();
    state.timeline.offset_tracker().mark_stopped();
    HttpResponse::Ok().finish()
}

#[post("/shift")]
async fn shift(state: web::Data<ApiState>, body: web::Json<ShiftRequest>) -> impl Responder {
    tracing::info!(shift_ms = body.shift_ms, "playback shift request");
    state.control.set_playback_shift(body.shift_ms);
    HttpResponse::Ok().finish()
}

/// Feed a new local clock correction; while playing it becomes a playback shift.
#[post("/time-offset")]
async fn time_offset(
    state: web::Data<ApiState>,
    body: web::Json<TimeOffsetRequest>,
) -> impl Responder {
    state.timeline.apply_offset(body.offset_ms, &state.control);
    HttpResponse::Ok().finish()
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(status)
        .service(play)
        .service(stop)
        .service(shift)
        .service(time_offset);
}

/// Serve the API on its own thread with a single-worker actix system.
pub fn spawn_http_server(bind: SocketAddr, state: ApiState) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let data = web::Data::new(state);
        let result = actix_web::rt::System::new().block_on(async move {
            let server = HttpServer::new(move || App::new().app_data(data.clone()).configure(configure))
                .workers(1)
                .disable_signals()
                .bind(bind)?;
            tracing::info!(bind = %bind, "http api listening");
            server.run().await
        });
        if let Err(e) = result {
            tracing::error!(error = %e, "http server failed");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test;
    use loop_player::config::SyncConfig;
    use loop_player::convert::StreamFormat;
    use loop_player::timing::{ManualClock, ManualTiming};
    use loop_sync_types::SyncStatus;

    fn make_state() -> web::Data<ApiState> {
        let format = StreamFormat::pcm16(48_000, 2).unwrap();
        let control = LoopControl::new(
            format,
            SyncConfig::default(),
            Arc::new(ManualTiming::new(Some(0.0))),
            Arc::new(ManualClock::new(0)),
        );
        web::Data::new(ApiState {
            control,
            timeline: Arc::new(Timeline::new(0, 1_000, 0)),
        })
    }

    #[actix_web::test]
    async fn health_reports_ok() {
        let app = test::init_service(App::new().configure(configure)).await;
        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn play_then_status_round_trip() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/play")
            .set_json(PlayRequest {
                offset_ms: Some(250),
                loop_size_ms: Some(2_000),
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get().uri("/status").to_request();
        let sync_status: SyncStatus = test::call_and_read_body_json(&app, req).await;
        assert!(sync_status.playing);
        assert_eq!(sync_status.start_offset_ms, 250);
        assert_eq!(sync_status.loop_size_ms, 2_000);
        assert_ne!(sync_status.session_id, 0);
    }

    #[actix_web::test]
    async fn play_defaults_loop_to_timeline() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/play")
            .set_json(PlayRequest {
                offset_ms: Some(10),
                loop_size_ms: None,
            })
            .to_request();
        let sync_status: SyncStatus = test::call_and_read_body_json(&app, req).await;
        assert_eq!(sync_status.loop_size_ms, 1_000);
    }

    #[actix_web::test]
    async fn shift_and_stop_reach_control() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/shift")
            .set_json(ShiftRequest { shift_ms: -40 })
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert_eq!(state.control.playback_shift_ms(), -40);

        state.control.play(0, 1_000);
        let req = test::TestRequest::post().uri("/stop").to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert!(!state.control.is_playing());
    }

    #[actix_web::test]
    async fn time_offset_becomes_shift_only_while_playing() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/time-offset")
            .set_json(TimeOffsetRequest { offset_ms: 15 })
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert_eq!(state.control.playback_shift_ms(), 0);

        let req = test::TestRequest::post()
            .uri("/play")
            .set_json(PlayRequest {
                offset_ms: Some(0),
                loop_size_ms: Some(1_000),
            })
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let req = test::TestRequest::post()
            .uri("/time-offset")
            .set_json(TimeOffsetRequest { offset_ms: 45 })
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert_eq!(state.control.playback_shift_ms(), 30);
    }

    #[actix_web::test]
    async fn malformed_body_is_rejected() {
        let state = make_state();
        let app =
            test::init_service(App::new().app_data(state.clone()).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/shift")
            .insert_header(("content-type", "application/json"))
            .set_payload("{\"shift\": \"soon\"}")
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_client_error());
    }
}
