use crate::api::model::{AcmeStatus, DkimProvider, Status};
use crate::api::server::AppState;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use time::format_description::well_known::Rfc3339;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

pub(super) fn new(state: AppState) -> Router {
    Router::new()
        .route("/healthcheck", get(health_check))
        .route("/status", get(status))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(state.config.api_timeout))
        .with_state(state)
}

#[allow(clippy::unused_async)]
async fn health_check() -> impl IntoResponse {
    Json(json!({"ok":"healthy"}))
}

#[allow(clippy::unused_async)]
async fn status(
    State(state): State<AppState>,
    ConnectInfo(client_addr): ConnectInfo<SocketAddr>,
) -> Json<Status> {
    tracing::debug!("status requested by {client_addr}");
    let dkim = state.dkim.as_ref().map(|registry| {
        registry
            .providers()
            .into_iter()
            .map(|(provider, updated_at)| DkimProvider {
                provider,
                updated_at: updated_at.format(&Rfc3339).unwrap_or_default(),
            })
            .collect()
    });
    let mut zones: Vec<String> = state.zones.apexes().map(str::to_string).collect();
    zones.sort();
    Json(Status {
        zones,
        acme: state.acme.as_ref().map(|registry| AcmeStatus {
            pending_challenges: registry.pending(),
        }),
        dkim,
    })
}
