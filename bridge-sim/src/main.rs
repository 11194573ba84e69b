mod behavior;
mod session;

use anyhow::Context;
use behavior::{Behavior, Rates, Reply};
use session::BridgeSession;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Simulator settings, read from `SIM_*` variables
#[derive(Debug, Clone)]
struct SimConfig {
    bind: String,
    rates: Rates,
    max_connections: usize,
    latency: Duration,
    silent_hold: Duration,
    seed: Option<u64>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".into(),
            rates: Rates::default(),
            max_connections: hue_storm_shared::limits::BRIDGE_MAX_CONNECTIONS,
            latency: Duration::ZERO,
            silent_hold: Duration::from_secs(30),
            seed: None,
        }
    }
}

impl SimConfig {
    fn from_env() -> anyhow::Result<Self> {
        fn var<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>> {
            match std::env::var(name) {
                Ok(value) => value
                    .trim()
                    .parse()
                    .map(Some)
                    .map_err(|_| anyhow::anyhow!("Invalid value for {}: {:?}", name, value)),
                Err(_) => Ok(None),
            }
        }

        let defaults = Self::default();
        let rates = Rates {
            silent: var("SIM_SILENT_RATE")?.unwrap_or(0.0),
            not_found: var("SIM_NOT_FOUND_RATE")?.unwrap_or(0.0),
            error: var("SIM_ERROR_RATE")?.unwrap_or(0.0),
        };
        for rate in [rates.silent, rates.not_found, rates.error] {
            anyhow::ensure!((0.0..=1.0).contains(&rate), "Rates must be within [0, 1]");
        }

        Ok(Self {
            bind: var("SIM_BIND")?.unwrap_or(defaults.bind),
            rates,
            max_connections: var("SIM_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections),
            latency: var::<f64>("SIM_LATENCY")?
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.latency),
            silent_hold: var::<f64>("SIM_SILENT_HOLD")?
                .map(Duration::from_secs_f64)
                .unwrap_or(defaults.silent_hold),
            seed: var("SIM_SEED")?,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let config = SimConfig::from_env()?;
    let listener = TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    info!(
        max_connections = config.max_connections,
        silent = config.rates.silent,
        not_found = config.rates.not_found,
        error = config.rates.error,
        "Bridge simulator listening on {}",
        config.bind
    );

    serve(listener, config).await
}

async fn serve(listener: TcpListener, config: SimConfig) -> anyhow::Result<()> {
    let behavior = Arc::new(Behavior::new(config.rates, config.seed));
    let slots = Arc::new(Semaphore::new(config.max_connections));

    loop {
        let (socket, addr) = listener.accept().await?;
        let slot = slots.clone().try_acquire_owned().ok();
        if slot.is_none() {
            debug!("Connection limit reached, refusing {}", addr);
        }

        let behavior = behavior.clone();
        let config = config.clone();
        tokio::spawn(async move {
            handle(socket, addr, slot, &behavior, &config).await;
        });
    }
}

async fn handle(
    socket: TcpStream,
    addr: SocketAddr,
    slot: Option<OwnedSemaphorePermit>,
    behavior: &Behavior,
    config: &SimConfig,
) {
    let mut session = BridgeSession::new(socket, addr);
    let request = match session.recv().await {
        Some(request) => request,
        None => return,
    };

    let reply = match slot {
        Some(_) => behavior.decide(&request),
        None => Reply::busy(),
    };
    debug!("{} {} {} -> {:?}", session.addr(), request.method, request.path, reply);

    if !config.latency.is_zero() {
        tokio::time::sleep(config.latency).await;
    }

    match reply {
        Reply::Respond {
            status,
            reason,
            body,
        } => {
            if let Err(e) = session.reply(status, reason, &body).await {
                warn!("Write error to {}: {}", addr, e);
            }
        }
        Reply::Silent => session.hold(config.silent_hold).await,
    }
    drop(slot);
}
