//! vidprobe server
//!
//! Loads configuration, builds the run pipeline once and serves the HTTP API.

use std::path::PathBuf;

use clap::Parser;
use tracing::info;

use vidprobe_web::{logging, serve, AppConfig, AppState};

#[derive(Parser)]
#[command(name = "vidprobe-server")]
#[command(about = "Browser workflow runner with failure diagnosis")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "VIDPROBE_CONFIG", default_value = "vidprobe.toml")]
    config: PathBuf,

    /// HTTP listen address
    #[arg(short, long, env = "VIDPROBE_LISTEN")]
    listen: Option<String>,

    /// SQLite result store
    #[arg(long, env = "VIDPROBE_DB_PATH")]
    db: Option<PathBuf>,

    /// Screenshot directory
    #[arg(long, env = "VIDPROBE_EVIDENCE_DIR")]
    evidence_dir: Option<PathBuf>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    write_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

impl Cli {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(dir) = &self.evidence_dir {
            config.evidence_dir = dir.clone();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug);

    info!("vidprobe v{}", vidprobe_common::VERSION);

    let mut config = AppConfig::load(&cli.config)?;
    cli.apply(&mut config);

    if cli.write_config {
        config.save(&cli.config)?;
        info!("Configuration written to {}", cli.config.display());
        return Ok(());
    }

    // Secrets from the environment are never written back to the file
    config.apply_env(|key| std::env::var(key).ok());
    config.validate()?;

    let addr = config.listen_addr()?;
    let state = AppState::from_config(&config).await?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    serve(listener, state).await
}
