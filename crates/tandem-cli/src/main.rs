//! tandem — run the mail agent, the calendar agent, or both

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;

use tandem_core::config::{AuthMode, TandemConfig, default_config_path};
use tandem_core::scope::ScopeSet;
use tandem_core::server::cancel_on_ctrl_c;
use tandem_core::token::SESSION_AUDIENCE;

const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

#[derive(Parser)]
#[command(name = "tandem", version, about = "Mail triage and calendar scheduling agents")]
struct Cli {
    /// Config file (defaults to ~/.tandem/config.toml)
    #[arg(long, global = true, env = "TANDEM_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a commented default config
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Run the mail agent (Agent A)
    MailAgent,
    /// Run the calendar agent (Agent B)
    CalendarAgent,
    /// Run both agents in one process
    Serve,
    /// Print a session token for local development
    MintSession {
        /// Subject the session is issued to
        #[arg(long, default_value = "dev-user")]
        subject: String,
        /// Lifetime in seconds (defaults to auth.session_ttl_secs)
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, DEFAULT_CONFIG)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn load_config(path: &Path) -> Result<TandemConfig> {
    TandemConfig::load(path)?.resolve_secrets().await
}

fn mint_session(config: &TandemConfig, subject: &str, ttl_secs: Option<u64>) -> Result<String> {
    if config.auth.mode != AuthMode::Local {
        bail!("mint-session only works with auth.mode = \"local\"");
    }
    let ttl = ttl_secs.unwrap_or(config.auth.session_ttl_secs);
    if ttl == 0 {
        bail!("--ttl-secs must be positive");
    }
    let token = config.local_issuer()?.mint(
        subject,
        SESSION_AUDIENCE,
        &ScopeSet::new(),
        chrono::Duration::seconds(ttl as i64),
        None,
    )?;
    Ok(token)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let path = cli.config.unwrap_or_else(default_config_path);

    match cli.command {
        Command::Init { force } => init_config(&path, force),
        Command::MintSession { subject, ttl_secs } => {
            let config = load_config(&path).await?;
            println!("{}", mint_session(&config, &subject, ttl_secs)?);
            Ok(())
        }
        command => {
            let config = load_config(&path).await?;
            let shutdown = CancellationToken::new();
            cancel_on_ctrl_c(shutdown.clone());
            info!("tandem v{} starting", env!("CARGO_PKG_VERSION"));

            match command {
                Command::MailAgent => tandem_mail_agent::run(&config, shutdown).await,
                Command::CalendarAgent => tandem_calendar_agent::run(&config, shutdown).await,
                _ => {
                    let result = tokio::try_join!(
                        tandem_mail_agent::run(&config, shutdown.clone()),
                        tandem_calendar_agent::run(&config, shutdown.clone()),
                    );
                    // One agent failing stops the other
                    shutdown.cancel();
                    result.map(|_| ())
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tandem_core::token::LocalIssuer;

    const SECRET: &str = "cli-test-secret-0123456789abcdefgh";

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
        let cli = Cli::try_parse_from(["tandem", "--config", "/tmp/t.toml", "mint-session", "--subject", "ana"]).unwrap();
        assert_eq!(cli.config.as_deref(), Some(Path::new("/tmp/t.toml")));
        assert!(matches!(cli.command, Command::MintSession { ref subject, .. } if subject == "ana"));
    }

    #[test]
    fn test_default_config_parses() {
        let config = TandemConfig::parse(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.mail_agent.bind, "127.0.0.1:3001");
        assert_eq!(config.auth.mode, AuthMode::Local);
    }

    #[test]
    fn test_init_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        init_config(&path, false).unwrap();
        assert!(init_config(&path, false).is_err());
        init_config(&path, true).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), DEFAULT_CONFIG);
    }

    #[test]
    fn test_mint_session_verifies_locally() {
        let mut config = TandemConfig::default();
        config.auth.signing_secret = Some(SECRET.to_string());
        let token = mint_session(&config, "ana", Some(60)).unwrap();

        let issuer = LocalIssuer::new(&config.auth.issuer, SECRET.as_bytes());
        let claims = issuer.verify(&token, Some(SESSION_AUDIENCE)).unwrap();
        assert_eq!(claims.sub, "ana");

        config.auth.mode = AuthMode::Remote;
        assert!(mint_session(&config, "ana", None).is_err());
    }
}
