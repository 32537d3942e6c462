use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use beamcast_signaling::{GlobalStats, RoomSummary, SignalingService};

use crate::config::Config;
use crate::ws::websocket_handler;

/// Shared state handed to every route
#[derive(Clone)]
pub struct AppState {
    pub service: SignalingService,
    pub max_message_size: usize,
    pub shutdown: CancellationToken,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .with_state(state)
}

/// Always returns OK while the server is running
pub async fn health_check() -> impl IntoResponse {
    "OK"
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatsResponse {
    global: GlobalStats,
    rooms: Vec<RoomSummary>,
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(StatsResponse {
        global: state.service.global_stats(),
        rooms: state.service.room_summaries(),
    })
}

/// Serve HTTP until `shutdown` is cancelled
pub async fn serve(
    config: &Config,
    service: SignalingService,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let http_addr: std::net::SocketAddr = config
        .http_address()
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid HTTP address '{}': {e}", config.http_address()))?;

    let listener = tokio::net::TcpListener::bind(http_addr).await.map_err(|e| {
        error!("Failed to bind HTTP address {}: {}", http_addr, e);
        anyhow::anyhow!("Failed to bind {http_addr}: {e}")
    })?;

    info!("HTTP server listening on {}", http_addr);

    let router = create_router(AppState {
        service,
        max_message_size: config.server.max_message_size,
        shutdown: shutdown.clone(),
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("HTTP server shut down gracefully");
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT/Ctrl+C)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("Received Ctrl+C"); }
        () = terminate => { info!("Received SIGTERM"); }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use beamcast_signaling::{AllowAllValidator, SignalingConfig};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        create_router(AppState {
            service: SignalingService::new(SignalingConfig::default(), Arc::new(AllowAllValidator)),
            max_message_size: 64 * 1024,
            shutdown: CancellationToken::new(),
        })
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_stats_empty() {
        let response = app()
            .oneshot(Request::builder().uri("/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["global"]["totalRooms"], 0);
        assert_eq!(json["rooms"], serde_json::json!([]));
    }
}
