use std::path::PathBuf;
use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use hostwatch::{Config, LaunchOptions, Orchestrator, Registry};
use logger::LogFormat;
use tokio::signal::unix::{SignalKind, signal};
use tracing::level_filters::LevelFilter;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "hostwatch", version)]
#[command(about = "Watch a host, alert on failures and report to other instances")]
struct Args {
    /// Configuration file (defaults to ~/.config/hostwatch/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the process id here, overriding the config
    #[arg(short, long)]
    pidfile: Option<PathBuf>,

    /// Reload the configuration whenever this file is touched
    #[arg(long)]
    hup_file: Option<PathBuf>,

    /// Run a single cycle and exit non-zero if any monitor failed
    #[arg(short = '1', long)]
    one_shot: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,

    /// Print the loaded configuration and exit
    #[arg(long)]
    dump_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = if args.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
    logger::init_tracing_with(level, LogFormat::from_env());

    let mut config = Config::from_config(args.config.as_ref()).context("Failed to load configuration")?;
    let launch = LaunchOptions {
        config_path: args.config.clone(),
        pidfile: args.pidfile.clone(),
        hup_file: args.hup_file.clone(),
    };
    launch.apply(&mut config);

    if args.dump_config {
        print!("{config}");
        return Ok(());
    }

    let mut orchestrator = Orchestrator::new(config, Registry::builtin(), launch)?;
    orchestrator.start().await?;

    if args.one_shot {
        let report = orchestrator.run_cycle().await;
        orchestrator.stop()?;
        if !report.all_ok() {
            warn!("Failing monitors: {}", report.failed.join(", "));
            std::process::exit(1);
        }
        return Ok(());
    }

    let reload = orchestrator.reload_handle();
    let mut hangups = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!(target: "hostwatch::lifecycle", "SIGHUP received, reloading at the next cycle");
            reload.store(true, Ordering::SeqCst);
        }
    });

    let mut interrupt = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;
    let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let shutdown = async move {
        tokio::select! {
            _ = interrupt.recv() => info!(target: "hostwatch::lifecycle", "SIGINT received, stopping"),
            _ = terminate.recv() => info!(target: "hostwatch::lifecycle", "SIGTERM received, stopping"),
        }
    };

    if let Err(e) = orchestrator.run(shutdown).await {
        error!(target: "hostwatch::lifecycle", "Unclean shutdown: {e}");
        return Err(e.into());
    }
    Ok(())
}
