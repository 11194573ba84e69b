mod config;
mod dispatch;
mod effect;
mod mark;
mod stats;
mod supervisor;
mod transport;

use anyhow::Context;
use clap::{Parser, Subcommand};
use config::{FileConfig, LightGroup, RunConfig};
use dispatch::{Dispatcher, FanOut};
use effect::ColorGenerator;
use stats::Aggregator;
use std::path::PathBuf;
use std::sync::Arc;
use supervisor::Supervisor;
use tokio::sync::{mpsc, Semaphore};
use transport::{HttpTransport, Transport};

use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "hue-storm")]
#[command(author, version, about = "Drive Hue bridges with rapid, concurrent light updates", long_about = None)]
struct Cli {
    /// Bridge and light assignment file
    #[arg(short, long, env = "HUE_STORM_CONFIG", default_value = "hue-storm.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Mode>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Mode {
    /// Run the light storm (default)
    Run,
    /// Set every configured light to its bridge's debug hue
    Mark,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let run = RunConfig::from_env().context("Invalid environment settings")?;

    let level = if run.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    let file = FileConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command.unwrap_or(Mode::Run) {
        Mode::Run => storm(file, run).await,
        Mode::Mark => mark_lights(file, run).await,
    }
}

async fn storm(file: FileConfig, run: RunConfig) -> anyhow::Result<()> {
    let bridges = file.bridges(LightGroup::Main)?;

    if run.skip_gc {
        debug!("SKIP_GC is set; there is no collector to pause");
    }
    match run.iterations {
        Some(n) => debug!("Running for {} iterations", n),
        None => debug!("Running until stopped. Send SIGHUP for a running summary"),
    }

    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(run.connect_timeout));
    let source = Arc::new(ColorGenerator::new(run.hue, run.sat, run.bri, run.seed));
    info!(
        seed = run.seed,
        hue = %run.hue.waveform,
        sat = %run.sat.waveform,
        bri = %run.bri.waveform,
        "{}: starting",
        file.name
    );

    let aggregator = Arc::new(Aggregator::new());
    let iterations = run.iterations;
    let dispatcher = Dispatcher::new(run, bridges, transport, source, aggregator.clone())?;

    let (events_tx, events_rx) = mpsc::channel(8);
    let _signals = supervisor::spawn_signal_listener(events_tx)
        .context("Failed to install signal handlers")?;

    let outcome = Supervisor::new(aggregator, iterations)
        .supervise(dispatcher.start(), events_rx, |summary| {
            summary.print(&file.name)
        })
        .await;

    info!(
        lanes = outcome.completed,
        requests = outcome.summary.requests,
        "{}: finished",
        file.name
    );
    if outcome.faulted + outcome.panicked + outcome.abandoned > 0 {
        warn!(
            faulted = outcome.faulted,
            panicked = outcome.panicked,
            abandoned = outcome.abandoned,
            "Some lanes did not finish cleanly"
        );
    }
    Ok(())
}

async fn mark_lights(file: FileConfig, run: RunConfig) -> anyhow::Result<()> {
    let transport: Arc<dyn Transport> = Arc::new(HttpTransport::new(run.connect_timeout));
    let fanout = FanOut::new(
        transport,
        Arc::new(Semaphore::new(run.global_connections)),
        run.lane_connections,
        run.request_timeout,
    );

    for result in mark::mark_lights(&file, &fanout, &run.retry).await? {
        println!(
            "{}: {} on {}: {}/{} marked ({} hard timeouts, {} soft timeouts, {} failed)",
            file.name,
            result.group.name(),
            result.bridge,
            result.counters.successes,
            result.lights,
            result.counters.hard_timeouts,
            result.counters.soft_failures,
            result.counters.hard_failures,
        );
    }
    Ok(())
}
