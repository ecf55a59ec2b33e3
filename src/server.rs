//! HTTP/WebSocket surface (spec §6, expanded component K): the signaling
//! upgrade route, a liveness check, and duplicate-address eviction at
//! connection-accept time — resolved from `hiwave_go`'s `InitPeer` handler,
//! where the address scan runs before the new client is subscribed to the
//! hub at all.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;

use crate::client;
use crate::config::Settings;
use crate::hub::HubHandle;

#[derive(Clone)]
struct AppState {
    hub: HubHandle,
    settings: Arc<Settings>,
}

pub fn router(hub: HubHandle, settings: Arc<Settings>) -> Router {
    let state = AppState { hub, settings };

    Router::new()
        .route("/websocket", get(websocket_upgrade))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Accepts the upgrade, evicts any existing client already connected from
/// the same remote address, then spawns the new client's actor. Eviction
/// happens before `client::spawn` subscribes to the hub so the incoming
/// connection never observes its own stale predecessor.
async fn websocket_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let ip_addr = addr.ip().to_string();
    let stale = state.hub.clients_with_ip(&ip_addr).await;
    for client in stale {
        log::info!("evicting existing client {} from {ip_addr}", client.uuid());
        client::shutdown_client(&client).await;
    }

    let hub = state.hub.clone();
    let settings = state.settings.clone();
    ws.on_upgrade(move |socket| async move {
        client::spawn(ip_addr, hub, settings, socket);
    })
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connected_clients": state.hub.client_count().await,
    }))
}
