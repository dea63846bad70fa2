//! phenix-app-mirror binary
//!
//! Reads an experiment from stdin, runs the requested phase and writes the
//! (possibly updated) experiment to stdout. Logs go to stderr.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, error};

use phenix_app_common::{AppError, DnsResolver, Minimega};
use phenix_app_mirror::config::DEFAULT_CONFIG_PATH;
use phenix_app_mirror::{Experiment, Phase, PhaseDriver, RuntimeConfig};

/// phenix user app that mirrors experiment VLAN traffic to monitoring VMs
#[derive(Parser, Debug)]
#[command(name = "phenix-app-mirror")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Lifecycle phase (configure, post-start, cleanup); other phases pass
    /// the experiment through unchanged
    phase: String,

    /// Runtime configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// minimega binary
    #[arg(long, env = "PHENIX_MINIMEGA")]
    minimega: Option<String>,

    /// Name of the cluster host this app runs on
    #[arg(long, env = "PHENIX_HEADNODE")]
    headnode: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    log_level: Option<String>,
}

fn init_logging(log_level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match RuntimeConfig::load_or_default(&args.config) {
        Ok(config) => config.with_overrides(args.minimega, args.headnode, args.log_level),
        Err(e) => {
            eprintln!("phenix-app-mirror: {}", e);
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config.log_level);

    match run(&args.phase, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(phase: &str, config: &RuntimeConfig) -> anyhow::Result<()> {
    let mut body = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut body)
        .await
        .map_err(|source| AppError::InputRead { source })?;

    let mut stdout = tokio::io::stdout();

    let Some(phase) = Phase::from_name(phase) else {
        debug!(phase, "Phase not handled; passing experiment through");
        stdout.write_all(&body).await?;
        stdout.flush().await?;
        return Ok(());
    };

    let mut exp = Experiment::from_slice(&body)?;

    let minimega = Minimega::new(&config.minimega, &config.headnode);
    let resolver = DnsResolver;
    let driver = PhaseDriver::new(&minimega, &minimega, &resolver);

    driver
        .run(phase, &mut exp)
        .await
        .with_context(|| format!("failed to execute {} stage", phase))?;

    stdout.write_all(&exp.to_vec()?).await?;
    stdout.flush().await?;

    Ok(())
}
