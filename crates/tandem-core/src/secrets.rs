//! Secret resolution for configuration values
//!
//! Config values may reference `$secret{NAME}`. References are expanded once
//! at startup through a pluggable provider; a value that is empty after
//! expansion (or still holds an unresolved reference) counts as absent, which
//! is what switches an upstream gateway to its mock fallback.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;
use tracing::{debug, warn};

static SECRET_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$secret\{([^}]+)\}").expect("secret reference pattern is valid")
});

/// A source of secret values
#[async_trait]
pub trait SecretsProvider: Send + Sync {
    fn name(&self) -> &str;
    async fn get(&self, key: &str) -> Result<Option<String>>;
}

/// Which provider backs `$secret{...}` expansion
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SecretsProviderType {
    #[default]
    Env,
    File,
    Memory,
}

/// `[secrets]` config section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub provider: SecretsProviderType,
    #[serde(default)]
    pub secrets_dir: Option<String>,
}

/// Environment variables that `$secret{NAME}` may read. Anything else resolves
/// to nothing, so a config file cannot be used to pull arbitrary process env.
pub const ALLOWED_SECRET_ENV_VARS: &[&str] = &[
    "TANDEM_SIGNING_SECRET",
    "TANDEM_AUTH_CLIENT_ID",
    "TANDEM_AUTH_CLIENT_SECRET",
    "GOOGLE_CLIENT_ID",
    "GOOGLE_CLIENT_SECRET",
    "GOOGLE_REFRESH_TOKEN",
    "GOOGLE_ACCESS_TOKEN",
    "ANTHROPIC_API_KEY",
    "OPENAI_API_KEY",
];

/// Reads allowlisted environment variables
pub struct EnvSecretsProvider;

#[async_trait]
impl SecretsProvider for EnvSecretsProvider {
    fn name(&self) -> &str {
        "env"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if !ALLOWED_SECRET_ENV_VARS.contains(&key) {
            warn!("Refusing to resolve non-allowlisted env var '{}'", key);
            return Ok(None);
        }
        Ok(std::env::var(key).ok())
    }
}

/// Reads one file per secret from a directory (Docker/Kubernetes style)
pub struct FileSecretsProvider {
    dir: PathBuf,
}

impl FileSecretsProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SecretsProvider for FileSecretsProvider {
    fn name(&self) -> &str {
        "file"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        if key.is_empty() || key.contains(['/', '\\', '\0']) || key.contains("..") {
            return Err(anyhow!("Invalid secret name '{}'", key.escape_debug()));
        }

        match tokio::fs::read_to_string(self.dir.join(key)).await {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow!("Failed to read secret '{}': {}", key, e)),
        }
    }
}

/// Fixed in-memory secrets, for tests and embedding
#[derive(Default)]
pub struct MemorySecretsProvider {
    secrets: HashMap<String, String>,
}

impl MemorySecretsProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.secrets.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
impl SecretsProvider for MemorySecretsProvider {
    fn name(&self) -> &str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.secrets.get(key).cloned())
    }
}

/// Expands `$secret{NAME}` references
pub struct SecretsManager {
    provider: Box<dyn SecretsProvider>,
}

impl SecretsManager {
    pub fn new(provider: Box<dyn SecretsProvider>) -> Self {
        Self { provider }
    }

    pub fn from_config(config: &SecretsConfig) -> Self {
        let provider: Box<dyn SecretsProvider> = match config.provider {
            SecretsProviderType::Env => Box::new(EnvSecretsProvider),
            SecretsProviderType::File => Box::new(FileSecretsProvider::new(
                config.secrets_dir.as_deref().unwrap_or("/run/secrets"),
            )),
            SecretsProviderType::Memory => Box::new(MemorySecretsProvider::new()),
        };
        Self { provider }
    }

    /// Replace every resolvable reference in `text`. Unresolvable references
    /// are left in place.
    pub async fn expand(&self, text: &str) -> Result<String> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;

        for cap in SECRET_REF.captures_iter(text) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            out.push_str(&text[last..whole.start()]);
            match self.provider.get(name.as_str()).await? {
                Some(value) => {
                    debug!(provider = self.provider.name(), "Expanded secret {}", name.as_str());
                    out.push_str(&value);
                }
                None => {
                    warn!("Secret '{}' not found", name.as_str());
                    out.push_str(whole.as_str());
                }
            }
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Expand an optional config value. Returns `None` when the value is
    /// missing, blank, or still references an unresolved secret.
    pub async fn resolve_optional(&self, value: Option<&str>) -> Result<Option<String>> {
        let Some(raw) = value else {
            return Ok(None);
        };
        let expanded = self.expand(raw).await?;
        let trimmed = expanded.trim();
        if trimmed.is_empty() || SECRET_REF.is_match(trimmed) {
            return Ok(None);
        }
        Ok(Some(trimmed.to_string()))
    }
}
