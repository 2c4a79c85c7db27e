//! tandem-mail-agent — Agent A
//!
//! Fetches email from Gmail, summarizes it and extracts action items with an
//! LLM, then exchanges the caller's session token for a `calendar.write`
//! credential and hands the resulting event drafts to the calendar agent.

pub mod calendar_client;
pub mod llm;
pub mod mail;
pub mod planner;
pub mod protocol;
pub mod server;
pub mod service;
pub mod summarize;

use anyhow::Result;
use axum::Router;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tandem_core::config::TandemConfig;
use tandem_core::delegation::DelegationClient;
use tandem_core::gatekeeper::Gatekeeper;
use tandem_core::google::GoogleTokenSource;
use tandem_core::rate_limit::RateLimiter;

pub use calendar_client::CalendarAgentClient;
pub use llm::LlmProvider;
pub use mail::{GmailClient, MailGateway, MailService, MockMailbox};
pub use server::{AppState, router};
pub use service::MailAgent;
pub use summarize::Summarizer;

/// Wire the mail agent from resolved config
pub fn build_agent(config: &TandemConfig) -> Result<MailAgent> {
    let timeout = config.http.request_timeout();

    let gateway: Option<Arc<dyn MailGateway>> =
        GoogleTokenSource::from_config(&config.google, timeout).map(|tokens| {
            Arc::new(GmailClient::new(
                &config.google.gmail_base_url,
                Arc::new(tokens),
                timeout,
            )) as Arc<dyn MailGateway>
        });
    if gateway.is_none() {
        info!("Gmail not configured, serving mock mailbox");
    }

    let llm: Option<Arc<dyn LlmProvider>> = llm::from_config(&config.ai, timeout).map(Arc::from);
    match &llm {
        Some(llm) => info!("Summarizing with {} ({})", llm.provider_name(), llm.model()),
        None => info!("No AI key configured, using heuristic summaries"),
    }

    let delegation =
        DelegationClient::new(config.credential_provider()?).with_ttl(config.auth.delegation_ttl_secs);

    Ok(MailAgent::new(
        MailService::new(gateway),
        Summarizer::new(llm),
        delegation,
        CalendarAgentClient::new(&config.mail_agent.calendar_agent_url, timeout),
    ))
}

/// Full Agent A router from resolved config
pub fn build_router(config: &TandemConfig) -> Result<Router> {
    let gate = Gatekeeper::new(config.session_validator()?);
    let state = AppState::new(Arc::new(build_agent(config)?), &config.mail_public_url());
    let limiter = config
        .rate_limit
        .enabled
        .then(|| RateLimiter::new(config.rate_limit.max_requests, config.rate_limit.window()));
    Ok(router(state, gate, limiter, &config.http.cors_origins))
}

/// Serve Agent A until `shutdown` is cancelled
pub async fn run(config: &TandemConfig, shutdown: CancellationToken) -> Result<()> {
    let app = build_router(config)?;
    let listener = tandem_core::server::bind(&config.mail_agent.bind).await?;
    tandem_core::server::serve(server::SERVICE_NAME, listener, app, shutdown).await
}
