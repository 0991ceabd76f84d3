//! WebSocket endpoints.
//!
//! `GET /ws/telemetry/{tenant_id}?token=<jwt>` streams a tenant's telemetry
//! and data-signal channels; `GET /ws/admin/health/?token=<jwt>` streams
//! platform health to admins. Subscribers authenticate once at connect time
//! and are rejected when unauthenticated or when the URL tenant does not
//! match their token's tenant.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use uuid::Uuid;

use cadence_core::registry::Registry;

use crate::auth::{Claims, TokenSigner};
use crate::bus::InMemoryBus;
use crate::protocol::TelemetryEvent;
use crate::ADMIN_HEALTH_CHANNEL;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEALTH_INTERVAL: Duration = Duration::from_secs(10);

/// Supplies the periodic `health_update` payload for the admin channel.
pub trait HealthSource: Send + Sync {
    fn snapshot(&self) -> serde_json::Value;
}

pub struct BridgeState {
    pub bus: InMemoryBus,
    pub signer: TokenSigner,
    pub registry: Arc<Registry>,
    pub health: Arc<dyn HealthSource>,
}

/// Routes for the two WS endpoints.
pub fn router(state: Arc<BridgeState>) -> Router {
    Router::new()
        .route("/ws/telemetry/{tenant_id}", get(telemetry_ws_handler))
        .route("/ws/admin/health/", get(admin_ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

fn authenticate(
    state: &BridgeState,
    params: &HashMap<String, String>,
) -> Result<Claims, StatusCode> {
    let token = params.get("token").ok_or(StatusCode::UNAUTHORIZED)?;
    state.signer.verify(token).map_err(|e| {
        warn!(error = %e, "rejecting WS connection");
        StatusCode::UNAUTHORIZED
    })
}

async fn telemetry_ws_handler(
    ws: WebSocketUpgrade,
    Path(tenant_id): Path<Uuid>,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<BridgeState>>,
) -> impl IntoResponse {
    let claims = match authenticate(&state, &params) {
        Ok(c) => c,
        Err(status) => return status.into_response(),
    };

    // The URL's tenant must match the token's tenant.
    if claims.tenant_id != tenant_id {
        warn!(%tenant_id, token_tenant = %claims.tenant_id, "tenant mismatch on WS connect");
        return StatusCode::FORBIDDEN.into_response();
    }

    let tenant = match state.registry.get_tenant(tenant_id).await {
        Ok(Some(t)) => t,
        _ => return StatusCode::NOT_FOUND.into_response(),
    };

    info!(tenant = %tenant.schema_name, user = %claims.user_id, "telemetry WS accepted");
    ws.on_upgrade(move |socket| stream_tenant_channels(socket, state, tenant))
}

async fn stream_tenant_channels(
    socket: WebSocket,
    state: Arc<BridgeState>,
    tenant: cadence_core::types::Tenant,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let telemetry_rx = state.bus.subscribe(&tenant.telemetry_channel());
    let signals_rx = state.bus.subscribe(&tenant.data_channel());
    let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);

    loop {
        tokio::select! {
            result = telemetry_rx.recv_async() => {
                match result {
                    Ok(event) => {
                        if send_event(&mut ws_tx, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            result = signals_rx.recv_async() => {
                match result {
                    Ok(event) => {
                        if send_event(&mut ws_tx, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            _ = heartbeat.tick() => {
                let ping = serde_json::json!({
                    "type": "ping",
                    "timestamp": chrono::Utc::now().to_rfc3339()
                });
                if ws_tx.send(Message::Text(ping.to_string().into())).await.is_err() {
                    break;
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {} // clients don't send anything we act on
                }
            }
        }
    }
}

async fn admin_ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(state): State<Arc<BridgeState>>,
) -> impl IntoResponse {
    let claims = match authenticate(&state, &params) {
        Ok(c) => c,
        Err(status) => return status.into_response(),
    };
    if !claims.is_platform_admin {
        warn!(user = %claims.user_id, "non-admin rejected from health WS");
        return StatusCode::FORBIDDEN.into_response();
    }

    info!(user = %claims.user_id, "admin health WS accepted");
    ws.on_upgrade(move |socket| stream_admin_channel(socket, state))
}

async fn stream_admin_channel(socket: WebSocket, state: Arc<BridgeState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let rx = state.bus.subscribe(ADMIN_HEALTH_CHANNEL);
    let mut ticker = tokio::time::interval(HEALTH_INTERVAL);

    // Initial full state, then one snapshot every tick.
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let event = TelemetryEvent::HealthUpdate {
                    data: state.health.snapshot(),
                };
                if send_event(&mut ws_tx, &event).await.is_err() {
                    break;
                }
            }

            result = rx.recv_async() => {
                match result {
                    Ok(event) => {
                        if send_event(&mut ws_tx, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }
}

async fn send_event<S>(ws_tx: &mut S, event: &TelemetryEvent) -> std::result::Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let json = serde_json::to_string(event).unwrap_or_default();
    ws_tx.send(Message::Text(json.into())).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticHealth;
    impl HealthSource for StaticHealth {
        fn snapshot(&self) -> serde_json::Value {
            serde_json::json!({ "status": "healthy" })
        }
    }

    #[tokio::test]
    async fn authenticate_checks_token_and_params() {
        let registry = Arc::new(Registry::open_in_memory().await.unwrap());
        let state = BridgeState {
            bus: InMemoryBus::new(),
            signer: TokenSigner::new(b"secret"),
            registry,
            health: Arc::new(StaticHealth),
        };

        // No token at all.
        assert_eq!(
            authenticate(&state, &HashMap::new()).unwrap_err(),
            StatusCode::UNAUTHORIZED
        );

        // Garbage token.
        let mut params = HashMap::new();
        params.insert("token".to_string(), "garbage".to_string());
        assert_eq!(
            authenticate(&state, &params).unwrap_err(),
            StatusCode::UNAUTHORIZED
        );

        // Valid token.
        let user = Uuid::new_v4();
        let tenant = Uuid::new_v4();
        let token = state.signer.issue(user, tenant, false);
        params.insert("token".to_string(), token);
        let claims = authenticate(&state, &params).unwrap();
        assert_eq!(claims.user_id, user);
        assert_eq!(claims.tenant_id, tenant);
    }
}
