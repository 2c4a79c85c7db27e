//! tandem-calendar-agent — Agent B
//!
//! Validates delegated bearer tokens, enforces per-route scopes and performs
//! calendar CRUD against Google Calendar, falling back to mock events when no
//! credentials are configured.

pub mod gateway;
pub mod server;
pub mod service;

use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tandem_core::config::TandemConfig;
use tandem_core::gatekeeper::Gatekeeper;
use tandem_core::google::GoogleTokenSource;
use tandem_core::rate_limit::RateLimiter;

pub use gateway::{CalendarGateway, GoogleCalendarClient, MockCalendar};
pub use server::{AppState, router};
pub use service::CalendarService;

/// Wire the calendar service from resolved config
pub fn build_service(config: &TandemConfig) -> CalendarService {
    let timeout = config.http.request_timeout();
    let gateway: Option<Arc<dyn CalendarGateway>> =
        GoogleTokenSource::from_config(&config.google, timeout).map(|tokens| {
            Arc::new(GoogleCalendarClient::new(
                &config.google.calendar_base_url,
                &config.calendar_agent.calendar_id,
                Arc::new(tokens),
                timeout,
            )) as Arc<dyn CalendarGateway>
        });
    if gateway.is_none() {
        info!("Google Calendar not configured, serving mock events");
    }
    CalendarService::new(gateway).with_default_time_zone(&config.calendar_agent.default_time_zone)
}

/// Full Agent B router from resolved config
pub fn build_router(config: &TandemConfig) -> Result<Router> {
    let gate = Gatekeeper::new(config.calendar_validator()?);
    let state = AppState::new(Arc::new(build_service(config)), &config.calendar_public_url());
    let limiter = config
        .rate_limit
        .enabled
        .then(|| RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window()));
    Ok(router(state, gate, limiter, &config.http.cors_origins))
}

/// Serve Agent B until `shutdown` is cancelled
pub async fn run(config: &TandemConfig, shutdown: CancellationToken) -> Result<()> {
    let app = build_router(config)?;
    let listener = tandem_core::server::bind(&config.calendar_agent.bind).await?;
    tandem_core::server::serve(server::SERVICE_NAME, listener, app, shutdown).await
}
