mod config;
mod driver;
mod simulated;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use owo_colors::OwoColorize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{CliConfig, default_config_path};
use crate::driver::Operation;

#[derive(Parser)]
#[command(name = "sourcepack")]
#[command(about = "Load groups of data sources and report their combined status")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every source in the pack
    Load,
    /// Reload the pack's sources
    Reload {
        /// Only reload sources that are not ready
        #[arg(long)]
        non_ready_only: bool,
    },
    /// Write a sample configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .rgb_colors(miette::RgbColors::Preferred)
                .with_cause_chain()
                .color(true)
                .context_lines(5)
                .tab_width(2)
                .break_words(true)
                .build(),
        )
    }))?;
    miette::set_panic_hook();
    let cli = Cli::parse();

    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    // RUST_LOG wins over the --debug default
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.debug {
            EnvFilter::new("sourcepack_core=debug,sourcepack=debug,info")
        } else {
            EnvFilter::new("sourcepack_core=info,sourcepack=info,warn")
        }
    });

    let terminal_layer = fmt::layer()
        .with_target(cli.debug)
        .with_file(cli.debug)
        .with_line_number(cli.debug)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(terminal_layer)
        .init();

    let config_path = cli.config.unwrap_or_else(default_config_path);

    let operation = match cli.command {
        Commands::Init { force } => return init(&config_path, force).await,
        Commands::Load => Operation::Load,
        Commands::Reload { non_ready_only } => Operation::Reload { non_ready_only },
    };

    let config = CliConfig::load(&config_path).await?;
    config.pack.apply();
    info!(
        path = %config_path.display(),
        sources = config.sources.len(),
        concurrency = config.pack.concurrency,
        "Loaded configuration"
    );

    let pack = driver::build_pack(&config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    let outcome = driver::run(&pack, operation, cancel).await;
    driver::print_summary(&pack);
    pack.dispose();

    outcome?;
    Ok(())
}

async fn init(path: &std::path::Path, force: bool) -> Result<()> {
    if !force && tokio::fs::try_exists(path).await.into_diagnostic()? {
        return Err(miette::miette!(
            help = "Pass --force to overwrite it",
            "{} already exists",
            path.display()
        ));
    }

    CliConfig::sample().save(path).await?;
    println!("{} {}", "Wrote".green(), path.display().bold());
    Ok(())
}
