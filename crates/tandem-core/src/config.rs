//! Workspace configuration, loaded from `~/.tandem/config.toml`

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::delegation::{CredentialProvider, LocalCredentialProvider, RemoteCredentialProvider};
use crate::protocol::MAIL_AGENT_MARKER;
use crate::scope::CALENDAR_AUDIENCE;
use crate::secrets::{SecretsConfig, SecretsManager};
use crate::token::{LocalIssuer, SESSION_AUDIENCE};
use crate::validator::{LocalTokenValidator, RemoteTokenValidator, TokenValidator};

/// Minimum signing secret length for the local issuer
pub const MIN_SIGNING_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TandemConfig {
    #[serde(default)]
    pub mail_agent: MailAgentConfig,
    #[serde(default)]
    pub calendar_agent: CalendarAgentConfig,
    #[serde(default)]
    pub auth: AuthSettings,
    #[serde(default)]
    pub google: GoogleConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub secrets: SecretsConfig,
}

// ── Agents ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailAgentConfig {
    #[serde(default = "default_mail_bind")]
    pub bind: String,
    /// Public URL advertised in the agent card
    #[serde(default)]
    pub public_url: Option<String>,
    /// Where Agent B is reachable from Agent A
    #[serde(default = "default_calendar_url")]
    pub calendar_agent_url: String,
}

impl Default for MailAgentConfig {
    fn default() -> Self {
        Self {
            bind: default_mail_bind(),
            public_url: None,
            calendar_agent_url: default_calendar_url(),
        }
    }
}

fn default_mail_bind() -> String {
    "127.0.0.1:3001".to_string()
}

fn default_calendar_url() -> String {
    "http://127.0.0.1:3002".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarAgentConfig {
    #[serde(default = "default_calendar_bind")]
    pub bind: String,
    #[serde(default)]
    pub public_url: Option<String>,
    #[serde(default = "default_calendar_id")]
    pub calendar_id: String,
    /// Time zone applied to drafts that carry none
    #[serde(default = "default_time_zone")]
    pub default_time_zone: String,
}

impl Default for CalendarAgentConfig {
    fn default() -> Self {
        Self {
            bind: default_calendar_bind(),
            public_url: None,
            calendar_id: default_calendar_id(),
            default_time_zone: default_time_zone(),
        }
    }
}

fn default_calendar_bind() -> String {
    "127.0.0.1:3002".to_string()
}

fn default_calendar_id() -> String {
    "primary".to_string()
}

fn default_time_zone() -> String {
    "UTC".to_string()
}

// ── Auth ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// HS256 tokens signed with a shared secret
    #[default]
    Local,
    /// External exchange and introspection endpoints
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthSettings {
    #[serde(default)]
    pub mode: AuthMode,
    #[serde(default = "default_issuer")]
    pub issuer: String,
    #[serde(default = "default_signing_secret")]
    pub signing_secret: Option<String>,
    #[serde(default)]
    pub exchange_url: Option<String>,
    #[serde(default)]
    pub introspection_url: Option<String>,
    #[serde(default = "default_auth_client_id")]
    pub client_id: Option<String>,
    #[serde(default = "default_auth_client_secret")]
    pub client_secret: Option<String>,
    #[serde(default = "default_delegation_ttl")]
    pub delegation_ttl_secs: u64,
    #[serde(default = "default_session_ttl")]
    pub session_ttl_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            mode: AuthMode::Local,
            issuer: default_issuer(),
            signing_secret: default_signing_secret(),
            exchange_url: None,
            introspection_url: None,
            client_id: default_auth_client_id(),
            client_secret: default_auth_client_secret(),
            delegation_ttl_secs: default_delegation_ttl(),
            session_ttl_secs: default_session_ttl(),
        }
    }
}

fn default_issuer() -> String {
    "tandem-local".to_string()
}

fn default_signing_secret() -> Option<String> {
    Some("$secret{TANDEM_SIGNING_SECRET}".to_string())
}

fn default_auth_client_id() -> Option<String> {
    Some("$secret{TANDEM_AUTH_CLIENT_ID}".to_string())
}

fn default_auth_client_secret() -> Option<String> {
    Some("$secret{TANDEM_AUTH_CLIENT_SECRET}".to_string())
}

fn default_delegation_ttl() -> u64 {
    300
}

fn default_session_ttl() -> u64 {
    3_600
}

// ── Upstreams ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default = "default_google_access_token")]
    pub access_token: Option<String>,
    #[serde(default = "default_google_client_id")]
    pub client_id: Option<String>,
    #[serde(default = "default_google_client_secret")]
    pub client_secret: Option<String>,
    #[serde(default = "default_google_refresh_token")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_gmail_base_url")]
    pub gmail_base_url: String,
    #[serde(default = "default_calendar_base_url")]
    pub calendar_base_url: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            access_token: default_google_access_token(),
            client_id: default_google_client_id(),
            client_secret: default_google_client_secret(),
            refresh_token: default_google_refresh_token(),
            token_url: default_token_url(),
            gmail_base_url: default_gmail_base_url(),
            calendar_base_url: default_calendar_base_url(),
        }
    }
}

fn default_google_access_token() -> Option<String> {
    Some("$secret{GOOGLE_ACCESS_TOKEN}".to_string())
}

fn default_google_client_id() -> Option<String> {
    Some("$secret{GOOGLE_CLIENT_ID}".to_string())
}

fn default_google_client_secret() -> Option<String> {
    Some("$secret{GOOGLE_CLIENT_SECRET}".to_string())
}

fn default_google_refresh_token() -> Option<String> {
    Some("$secret{GOOGLE_REFRESH_TOKEN}".to_string())
}

fn default_token_url() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_gmail_base_url() -> String {
    "https://gmail.googleapis.com/gmail/v1".to_string()
}

fn default_calendar_base_url() -> String {
    "https://www.googleapis.com/calendar/v3".to_string()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProviderKind {
    #[default]
    Anthropic,
    Openai,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    #[serde(default)]
    pub provider: AiProviderKind,
    #[serde(default = "default_ai_api_key")]
    pub api_key: Option<String>,
    #[serde(default = "default_ai_model")]
    pub model: String,
    /// Override for the provider's API base URL
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_ai_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: AiProviderKind::Anthropic,
            api_key: default_ai_api_key(),
            model: default_ai_model(),
            base_url: None,
            max_tokens: default_ai_max_tokens(),
        }
    }
}

fn default_ai_api_key() -> Option<String> {
    Some("$secret{ANTHROPIC_API_KEY}".to_string())
}

fn default_ai_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}

fn default_ai_max_tokens() -> u32 {
    1_024
}

// ── HTTP surface ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_max_requests() -> usize {
    100
}

fn default_window_secs() -> u64 {
    900
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Allowed browser origins; empty allows any
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Timeout for every outbound upstream call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            cors_origins: Vec::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn default_request_timeout() -> u64 {
    30
}

// ── Loading ─────────────────────────────────────────────────────

/// `~/.tandem/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tandem")
        .join("config.toml")
}

impl TandemConfig {
    /// Read and parse a config file. A missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse config TOML")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, bind) in [
            ("mail_agent.bind", &self.mail_agent.bind),
            ("calendar_agent.bind", &self.calendar_agent.bind),
        ] {
            bind.parse::<SocketAddr>()
                .with_context(|| format!("{} is not a socket address: '{}'", name, bind))?;
        }
        url::Url::parse(&self.mail_agent.calendar_agent_url).with_context(|| {
            format!(
                "mail_agent.calendar_agent_url is not a URL: '{}'",
                self.mail_agent.calendar_agent_url
            )
        })?;
        if self.rate_limit.enabled && (self.rate_limit.max_requests == 0 || self.rate_limit.window_secs == 0) {
            bail!("rate_limit.max_requests and rate_limit.window_secs must be positive");
        }
        if self.http.request_timeout_secs == 0 {
            bail!("http.request_timeout_secs must be positive");
        }
        if self.auth.delegation_ttl_secs == 0 {
            bail!("auth.delegation_ttl_secs must be positive");
        }
        Ok(())
    }

    /// Expand `$secret{...}` references in every credential field. Fields
    /// that end up empty become `None`.
    pub async fn resolve_secrets(mut self) -> Result<Self> {
        let manager = SecretsManager::from_config(&self.secrets);

        self.auth.signing_secret = manager.resolve_optional(self.auth.signing_secret.as_deref()).await?;
        self.auth.client_id = manager.resolve_optional(self.auth.client_id.as_deref()).await?;
        self.auth.client_secret = manager.resolve_optional(self.auth.client_secret.as_deref()).await?;

        self.google.access_token = manager.resolve_optional(self.google.access_token.as_deref()).await?;
        self.google.client_id = manager.resolve_optional(self.google.client_id.as_deref()).await?;
        self.google.client_secret = manager.resolve_optional(self.google.client_secret.as_deref()).await?;
        self.google.refresh_token = manager.resolve_optional(self.google.refresh_token.as_deref()).await?;

        self.ai.api_key = manager.resolve_optional(self.ai.api_key.as_deref()).await?;

        Ok(self)
    }

    // ── Auth wiring ─────────────────────────────────────────────

    /// Issuer for local mode. Fails when no usable signing secret is set.
    pub fn local_issuer(&self) -> Result<Arc<LocalIssuer>> {
        let Some(secret) = self.auth.signing_secret.as_deref() else {
            bail!("auth.signing_secret is required in local mode (set TANDEM_SIGNING_SECRET)");
        };
        if secret.len() < MIN_SIGNING_SECRET_LEN {
            bail!(
                "auth.signing_secret must be at least {} bytes",
                MIN_SIGNING_SECRET_LEN
            );
        }
        Ok(Arc::new(LocalIssuer::new(&self.auth.issuer, secret.as_bytes())))
    }

    fn remote_client_id(&self) -> Result<&str> {
        self.auth
            .client_id
            .as_deref()
            .context("auth.client_id is required in remote mode")
    }

    fn token_validator(&self, audience: &str) -> Result<Arc<dyn TokenValidator>> {
        match self.auth.mode {
            AuthMode::Local => Ok(Arc::new(LocalTokenValidator::new(
                self.local_issuer()?,
                Some(audience.to_string()),
            ))),
            AuthMode::Remote => {
                let endpoint = self
                    .auth
                    .introspection_url
                    .as_deref()
                    .context("auth.introspection_url is required in remote mode")?;
                Ok(Arc::new(RemoteTokenValidator::new(
                    endpoint,
                    self.remote_client_id()?,
                    self.auth.client_secret.clone(),
                    Some(audience.to_string()),
                    self.http.request_timeout(),
                )))
            }
        }
    }

    /// Validator for user session tokens presented to Agent A
    pub fn session_validator(&self) -> Result<Arc<dyn TokenValidator>> {
        self.token_validator(SESSION_AUDIENCE)
    }

    /// Validator for delegated tokens presented to Agent B
    pub fn calendar_validator(&self) -> Result<Arc<dyn TokenValidator>> {
        self.token_validator(CALENDAR_AUDIENCE)
    }

    /// Credential provider Agent A exchanges session tokens with
    pub fn credential_provider(&self) -> Result<Arc<dyn CredentialProvider>> {
        match self.auth.mode {
            AuthMode::Local => Ok(Arc::new(LocalCredentialProvider::new(
                self.local_issuer()?,
                MAIL_AGENT_MARKER,
                self.auth.delegation_ttl_secs,
            ))),
            AuthMode::Remote => {
                let endpoint = self
                    .auth
                    .exchange_url
                    .as_deref()
                    .context("auth.exchange_url is required in remote mode")?;
                Ok(Arc::new(RemoteCredentialProvider::new(
                    endpoint,
                    self.remote_client_id()?,
                    self.auth.client_secret.clone(),
                    self.http.request_timeout(),
                )))
            }
        }
    }

    /// URL advertised in Agent A's card
    pub fn mail_public_url(&self) -> String {
        self.mail_agent
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.mail_agent.bind))
    }

    /// URL advertised in Agent B's card
    pub fn calendar_public_url(&self) -> String {
        self.calendar_agent
            .public_url
            .clone()
            .unwrap_or_else(|| format!("http://{}", self.calendar_agent.bind))
    }
}
