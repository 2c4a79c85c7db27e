//! Shared HTTP plumbing for both agents: CORS, serving with graceful shutdown

use anyhow::{Context, Result};
use axum::Router;
use axum::http::{HeaderName, HeaderValue, Method, header};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::{info, warn};

use crate::protocol::AGENT_HEADER;

/// CORS for the browser frontend. An empty origin list allows any origin.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(AGENT_HEADER),
        ]);

    if origins.is_empty() {
        return layer.allow_origin(Any);
    }

    let parsed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(parsed))
}

/// Bind a listener, with the address in the error context
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))
}

/// Serve `router` on `listener` until `shutdown` is cancelled. Peer
/// addresses are exposed to handlers for rate limiting.
pub async fn serve(
    name: &str,
    listener: TcpListener,
    router: Router,
    shutdown: CancellationToken,
) -> Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!("{} listening on http://{}", name, addr);

    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown.cancelled_owned())
    .await
    .with_context(|| format!("{} server error", name))?;

    info!("{} stopped", name);
    Ok(())
}

/// Cancel `shutdown` on Ctrl+C
pub fn cancel_on_ctrl_c(shutdown: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
        shutdown.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let router = Router::new().route("/ping", get(|| async { "pong" }));

        let handle = tokio::spawn(serve("test", listener, router, shutdown.clone()));

        let body = reqwest::get(format!("http://{}/ping", addr))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(body, "pong");

        shutdown.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_bind_reports_address() {
        let err = bind("256.0.0.1:0").await.unwrap_err();
        assert!(format!("{:#}", err).contains("256.0.0.1:0"));
    }

    #[test]
    fn test_cors_layer_builds_with_and_without_origins() {
        let _any = cors_layer(&[]);
        let _listed = cors_layer(&["http://localhost:5173".to_string(), "bad\norigin".to_string()]);
    }
}
