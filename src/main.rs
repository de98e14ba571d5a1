//! latmon - network latency monitor.

use latmon::cli::Cli;
use latmon::config::MonitorConfig;
use latmon::scheduler::{MonitorError, Scheduler};
use latmon::stats::{Flusher, HtmlChart};

use clap::Parser;
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive(format!("latmon={}", cli.log_level).parse()?))
        .init();

    // Environment first, then command line
    let mut cfg = MonitorConfig::load()?;
    cli.apply(&mut cfg);
    cfg.validate()?;
    let targets = cli.parse_targets(&cfg)?;

    tracing::info!(
        "Starting latmon {}; batch_size={} interval={:?} timeout={:?} output={}",
        env!("CARGO_PKG_VERSION"),
        cfg.batch_size,
        cfg.interval,
        cfg.timeout,
        cfg.output_dir.display()
    );

    let flusher = Arc::new(Flusher::new(&cfg.output_dir, Arc::new(HtmlChart))?);
    let mut scheduler = Scheduler::new(cfg.clone(), flusher.clone())?;
    for target in targets {
        scheduler.add_target(target)?;
    }

    let outcome = tokio::select! {
        sig = shutdown_signal() => {
            tracing::info!("Caught {}; terminating", sig?);
            Ok(())
        }
        err = scheduler.fatal() => Err(MonitorError::from(err)),
    };

    scheduler.stop().await;
    if !flusher.drain(cfg.shutdown_grace).await {
        tracing::warn!("{} flushes still running after {:?}", flusher.in_flight(), cfg.shutdown_grace);
    }

    if let Err(e) = &outcome {
        tracing::error!("{}", e);
    }
    outcome?;
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<&'static str> {
    let mut term = signal(SignalKind::terminate())?;
    let mut hup = signal(SignalKind::hangup())?;
    tokio::select! {
        r = tokio::signal::ctrl_c() => r.map(|_| "SIGINT"),
        _ = term.recv() => Ok("SIGTERM"),
        _ = hup.recv() => Ok("SIGHUP"),
    }
}
