use std::net::{IpAddr, SocketAddr};

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use super::config::ServiceConfig;
use super::events::route_event;
use super::state::AppState;
use super::BoxError;

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);

    let (state, dispatcher_control) = AppState::build(config)?;
    info!(
        "persona {} ({}) listening on {}, channel={}, queue_capacity={}",
        state.config.persona.id,
        state.config.persona.display_name,
        addr,
        state.config.channel_id,
        state.dispatcher.capacity()
    );

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    dispatcher_control.stop_and_join().await;
    serve_result?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.inbound_body_max_bytes;
    Router::new()
        .route("/", get(health).post(slack_events))
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/slack/events", axum::routing::post(slack_events))
        .with_state(state)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, state.config.persona.liveness_message())
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let cooldown = state.store.cooldown();
    Json(json!({
        "persona": state.config.persona.id,
        "paused_until": cooldown.paused_until,
        "last_response_at": cooldown.last_response_at,
        "threads_tracked": state.store.thread_count(),
        "last_activity_at": state.store.last_activity(),
        "queue_capacity": state.dispatcher.capacity(),
        "queued": state.dispatcher.queued(),
    }))
}

async fn slack_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    route_event(&state, &headers, &body)
}
