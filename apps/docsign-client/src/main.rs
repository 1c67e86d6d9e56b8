//! DocSign command-line client
//!
//! Drives one package signing session against a live backend.

mod flow;

use clap::{Args, Parser, Subcommand};
use docsign_session::ClientConfig;
use shared_types::PlacementRect;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "docsign_session=info,docsign_client=info";

#[derive(Parser, Debug)]
#[command(name = "docsign-client")]
#[command(version, about = "Sign a DocSign package from the command line")]
struct Cli {
    /// Config file (TOML); defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign every document of a package and submit the batch
    Sign(SignArgs),
}

#[derive(Args, Debug)]
struct SignArgs {
    /// Package to sign
    #[arg(short, long)]
    package: String,

    /// Drawn signature to upload (PNG)
    #[arg(
        long,
        value_name = "PNG",
        required_unless_present = "signature_url",
        conflicts_with = "signature_url"
    )]
    signature: Option<PathBuf>,

    /// Already uploaded signature image
    #[arg(long, value_name = "URL")]
    signature_url: Option<String>,

    /// Ask the backend for signature positions on each document
    #[arg(long)]
    auto_tag: bool,

    /// Print a verification QR code next to each signature
    #[arg(long)]
    display_qr_code: bool,

    #[command(flatten)]
    placement: DefaultPlacement,
}

/// Where to sign a document that has no placements yet
#[derive(Args, Debug, Clone, Copy, PartialEq)]
struct DefaultPlacement {
    /// Page for the default placement (1-based)
    #[arg(long, default_value_t = 1)]
    page: u32,

    /// Left edge, as a fraction of page width
    #[arg(long, default_value_t = 0.6)]
    x: f64,

    /// Top edge, as a fraction of page height
    #[arg(long, default_value_t = 0.85)]
    y: f64,

    #[arg(long, default_value_t = 0.3)]
    width: f64,

    #[arg(long, default_value_t = 0.08)]
    height: f64,
}

impl DefaultPlacement {
    fn rect(&self) -> PlacementRect {
        PlacementRect::new(self.x, self.y, self.width, self.height)
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ClientConfig> {
    let config = match path {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    Ok(config.with_env_overrides())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting DocSign client v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(cli.config.as_ref())?;
    tracing::info!("Backend: {}", config.base_url());

    let completed = match cli.command {
        Command::Sign(args) => flow::sign(args, config).await?,
    };

    if !completed {
        std::process::exit(1);
    }
    Ok(())
}
