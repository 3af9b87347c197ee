//! Thin HTTP adapter exposing the engine's domain API as JSON routes.
//!
//! This is a convenience harness for manually exercising a running engine,
//! not a production control-plane surface: no auth, no batching, no
//! streaming, one request per domain call.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use playout_core::{AssetRef, EngineError, PlayoutEngine};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<PlayoutEngine>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/channels/start", post(start_channel))
        .route("/channels/stop", post(stop_channel))
        .route("/channels/load_preview", post(load_preview))
        .route("/channels/switch_to_live", post(switch_to_live))
        .route("/channels/update_plan", post(update_plan))
        .with_state(state)
}

async fn health() -> impl IntoResponse {
    api_ok()
}

#[derive(Deserialize)]
struct StartChannelRequest {
    id: i32,
    asset_uri: String,
    #[serde(default = "default_timebase_num")]
    timebase_num: u32,
    #[serde(default = "default_timebase_den")]
    timebase_den: u32,
    plan: String,
    // Pass-through fields from the domain API's literal shape; the engine
    // itself has no notion of a transport port or unix socket, so these are
    // accepted and ignored rather than plumbed anywhere.
    #[serde(default)]
    #[allow(dead_code)]
    port: i32,
    #[serde(default)]
    #[allow(dead_code)]
    uds: Option<String>,
}

fn default_timebase_num() -> u32 {
    1
}

fn default_timebase_den() -> u32 {
    90_000
}

async fn start_channel(State(state): State<AppState>, Json(req): Json<StartChannelRequest>) -> impl IntoResponse {
    let asset = AssetRef::new(req.asset_uri, req.timebase_num, req.timebase_den);
    match state.engine.start_channel(req.id, asset, req.plan) {
        Ok(()) => api_success(()),
        Err(e) => api_error(e),
    }
}

#[derive(Deserialize)]
struct ChannelIdRequest {
    id: i32,
}

async fn stop_channel(State(state): State<AppState>, Json(req): Json<ChannelIdRequest>) -> impl IntoResponse {
    match state.engine.stop_channel(req.id) {
        Ok(()) => api_success(()),
        Err(e) => api_error(e),
    }
}

#[derive(Deserialize)]
struct LoadPreviewRequest {
    id: i32,
    asset_uri: String,
    #[serde(default = "default_timebase_num")]
    timebase_num: u32,
    #[serde(default = "default_timebase_den")]
    timebase_den: u32,
    plan: String,
}

#[derive(Serialize)]
struct LoadPreviewResponse {
    shadow_decode_started: bool,
}

async fn load_preview(State(state): State<AppState>, Json(req): Json<LoadPreviewRequest>) -> impl IntoResponse {
    let asset = AssetRef::new(req.asset_uri, req.timebase_num, req.timebase_den);
    match state.engine.load_preview(req.id, asset, req.plan) {
        Ok(shadow_decode_started) => api_success(LoadPreviewResponse { shadow_decode_started }),
        Err(e) => api_error(e),
    }
}

#[derive(Serialize)]
struct SwitchToLiveResponse {
    pts_contiguous: bool,
    live_start_pts: u64,
}

async fn switch_to_live(State(state): State<AppState>, Json(req): Json<ChannelIdRequest>) -> impl IntoResponse {
    match state.engine.switch_to_live(req.id) {
        Ok(summary) => api_success(SwitchToLiveResponse {
            pts_contiguous: summary.contiguous,
            // §6 specifies `live_start_pts` as uint64 on the wire; pts values
            // are never negative in this system's pipelines.
            live_start_pts: summary.shadow_start_pts.max(0) as u64,
        }),
        Err(e) => api_error(e),
    }
}

#[derive(Deserialize)]
struct UpdatePlanRequest {
    id: i32,
    plan: String,
}

async fn update_plan(State(state): State<AppState>, Json(req): Json<UpdatePlanRequest>) -> impl IntoResponse {
    match state.engine.update_plan(req.id, req.plan) {
        Ok(()) => api_success(()),
        Err(e) => api_error(e),
    }
}

#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    message: String,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    data: Option<T>,
}

fn api_success<T: Serialize>(data: T) -> axum::response::Response {
    (
        StatusCode::OK,
        Json(ApiResponse { success: true, message: "ok".to_string(), data: Some(data) }),
    )
        .into_response()
}

fn api_ok() -> axum::response::Response {
    (
        StatusCode::OK,
        Json(ApiResponse::<()> { success: true, message: "ok".to_string(), data: None }),
    )
        .into_response()
}

fn api_error(err: EngineError) -> axum::response::Response {
    let status = match err {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyExists(_) => StatusCode::CONFLICT,
        EngineError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        EngineError::BadState(_) => StatusCode::CONFLICT,
        EngineError::NotReady(_) => StatusCode::CONFLICT,
        EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        EngineError::SlotErrored(_, _) => StatusCode::INTERNAL_SERVER_ERROR,
        EngineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    log::warn!("domain call failed: [{}] {err}", err.kind());
    (
        status,
        Json(ApiResponse::<()> { success: false, message: err.to_string(), data: None }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use playout_core::{noop_sink, EngineConfig, MasterClock, RealClock};
    use tower::ServiceExt;

    use crate::decoders::{LoggingSinkFactory, SyntheticDecoderFactory};

    fn test_state() -> AppState {
        let clock: Arc<dyn MasterClock> = Arc::new(RealClock::new());
        let engine = PlayoutEngine::new(
            EngineConfig::default(),
            clock,
            Arc::new(SyntheticDecoderFactory),
            Arc::new(LoggingSinkFactory { log_every: 1_000_000 }),
            noop_sink(),
        )
        .unwrap();
        AppState { engine: Arc::new(engine) }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let router = create_router(test_state());
        let response = router
            .oneshot(axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn start_then_duplicate_start_reports_conflict() {
        let router = create_router(test_state());
        let body = serde_json::json!({
            "id": 1,
            "asset_uri": "synthetic://a",
            "plan": "plan-a",
            "port": 9000,
        });

        let request = |router: &Router, body: serde_json::Value| {
            router.clone().oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/channels/start")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
        };

        let first = request(&router, body.clone()).await.unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        let second = request(&router, body).await.unwrap();
        assert_eq!(second.status(), StatusCode::CONFLICT);
        let json = body_json(second).await;
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn stop_unknown_channel_reports_not_found() {
        let router = create_router(test_state());
        let body = serde_json::json!({ "id": 42 });
        let response = router
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/channels/stop")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
