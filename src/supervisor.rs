//! Top-level run control
//!
//! This module handles:
//! - Releasing lanes together once every lane is ready
//! - Turning process signals into report/shutdown events
//! - Stopping, joining and tallying lanes, isolating panics
//! - Emitting running and final summaries

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::dispatch::{LaneControl, LaneReport, Running};
use crate::stats::{Aggregator, Summary};

/// Requests delivered to the supervisor loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Print a summary and keep going
    Report,
    /// Stop lanes, join, print the final summary
    Shutdown,
}

/// How the run ended
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub summary: Summary,
    pub completed: usize,
    pub faulted: usize,
    pub panicked: usize,
    /// Lanes still busy when the join grace ran out
    pub abandoned: usize,
}

pub struct Supervisor {
    aggregator: Arc<Aggregator>,
    iterations: Option<u64>,
}

impl Supervisor {
    pub fn new(aggregator: Arc<Aggregator>, iterations: Option<u64>) -> Self {
        Self {
            aggregator,
            iterations,
        }
    }

    async fn summary(&self) -> Summary {
        Summary::now(&self.aggregator.snapshot().await, self.iterations)
    }

    /// Drive a started dispatch to completion
    pub async fn supervise<F>(
        &self,
        mut running: Running,
        mut events: mpsc::Receiver<Event>,
        mut on_summary: F,
    ) -> RunOutcome
    where
        F: FnMut(&Summary),
    {
        let mut tally = Tally::default();

        running.ready.wait().await;
        self.aggregator.mark_started().await;
        running.control.send_replace(LaneControl::Run);
        debug!("Lanes are ready to go, releasing them");

        let mut events_open = true;
        loop {
            tokio::select! {
                joined = running.lanes.join_next() => match joined {
                    Some(joined) => tally.record(joined),
                    None => {
                        info!("All lanes finished");
                        break;
                    }
                },
                event = events.recv(), if events_open => match event {
                    Some(Event::Report) => on_summary(&self.summary().await),
                    Some(Event::Shutdown) => {
                        info!("Shutdown requested");
                        break;
                    }
                    None => events_open = false,
                },
            }
        }

        running.control.send_replace(LaneControl::Stop);

        let grace = running.join_grace;
        let drained = timeout(grace, async {
            while let Some(joined) = running.lanes.join_next().await {
                tally.record(joined);
            }
        })
        .await;
        if drained.is_err() {
            tally.abandoned = running.lanes.len();
            warn!(
                lanes = tally.abandoned,
                "Lanes did not finish within {:?}, aborting", grace
            );
            running.lanes.abort_all();
        }

        if let Some(sweep) = running.sweep.take() {
            stop_sweep(sweep, grace).await;
        }

        let summary = self.summary().await;
        on_summary(&summary);

        RunOutcome {
            summary,
            completed: tally.completed,
            faulted: tally.faulted,
            panicked: tally.panicked,
            abandoned: tally.abandoned,
        }
    }
}

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    faulted: usize,
    panicked: usize,
    abandoned: usize,
}

impl Tally {
    fn record(&mut self, joined: Result<LaneReport, JoinError>) {
        match joined {
            Ok(report) => {
                debug!(lane = report.id, rounds = report.rounds, "Lane joined");
                if report.fault.is_some() {
                    self.faulted += 1;
                } else {
                    self.completed += 1;
                }
            }
            Err(e) if e.is_panic() => {
                error!("Lane panicked: {}", e);
                self.panicked += 1;
            }
            Err(e) => warn!("Lane cancelled: {}", e),
        }
    }
}

async fn stop_sweep(sweep: JoinHandle<u64>, grace: Duration) {
    let abort = sweep.abort_handle();
    match timeout(grace, sweep).await {
        Ok(Ok(broadcasts)) => debug!(broadcasts, "Sweep stopped"),
        Ok(Err(e)) => error!("Sweep task failed: {}", e),
        Err(_) => {
            warn!("Sweep did not stop in time, aborting");
            abort.abort();
        }
    }
}

/// Forward SIGHUP as `Report` and SIGINT/SIGTERM as `Shutdown`
pub fn spawn_signal_listener(tx: mpsc::Sender<Event>) -> std::io::Result<JoinHandle<()>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup())?;
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    Ok(tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = hangup.recv() => Event::Report,
                _ = interrupt.recv() => Event::Shutdown,
                _ = terminate.recv() => Event::Shutdown,
            };
            if tx.send(event).await.is_err() || event == Event::Shutdown {
                break;
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, ConfigError, RunConfig};
    use crate::dispatch::Dispatcher;
    use crate::effect::{ChannelConfig, ColorGenerator, PayloadSource, Waveform};
    use crate::transport::mock::ScriptedTransport;
    use crate::transport::{Delivery, Outcome, Transport};
    use async_trait::async_trait;
    use hue_storm_shared::{Command, StatePayload};

    fn bridges() -> Vec<BridgeConfig> {
        vec![
            BridgeConfig {
                name: "Bridge-01".into(),
                ip: "127.0.0.1".into(),
                port: 80,
                username: "u".into(),
                debug_hue: Some(0),
                lights: vec![1, 2],
            },
            BridgeConfig {
                name: "Bridge-02".into(),
                ip: "127.0.0.1".into(),
                port: 80,
                username: "u".into(),
                debug_hue: Some(25_500),
                lights: vec![3, 4],
            },
        ]
    }

    fn run_config(iterations: Option<u64>) -> RunConfig {
        RunConfig {
            lanes: Some(2),
            iterations,
            use_sweep: false,
            between_sleep: Duration::from_millis(100),
            request_timeout: Duration::from_secs(1),
            ..RunConfig::default()
        }
    }

    fn generator() -> Arc<dyn PayloadSource> {
        Arc::new(ColorGenerator::new(
            ChannelConfig::new(Waveform::Wave, 0.2, 48_000, 51_000),
            ChannelConfig::new(Waveform::None, 1.0, 212, 254),
            ChannelConfig::new(Waveform::Perlin, 2.0, 63, 191),
            7,
        ))
    }

    async fn run(
        config: RunConfig,
        transport: Arc<dyn Transport>,
        source: Arc<dyn PayloadSource>,
        events: mpsc::Receiver<Event>,
    ) -> (RunOutcome, Vec<Summary>) {
        let aggregator = Arc::new(Aggregator::new());
        let iterations = config.iterations;
        let dispatcher =
            Dispatcher::new(config, bridges(), transport, source, aggregator.clone()).unwrap();

        let mut summaries = Vec::new();
        let outcome = Supervisor::new(aggregator, iterations)
            .supervise(dispatcher.start(), events, |s| summaries.push(s.clone()))
            .await;
        (outcome, summaries)
    }

    #[tokio::test(start_paused = true)]
    async fn test_bounded_run_counts_every_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let (_tx, rx) = mpsc::channel(4);

        let (outcome, summaries) = run(run_config(Some(3)), transport.clone(), generator(), rx).await;

        assert_eq!(outcome.summary.successes, 12);
        assert_eq!(outcome.summary.requests, 12);
        assert_eq!(outcome.completed, 2);
        assert_eq!(transport.calls(), 12);
        assert_eq!(summaries.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_error_body_counts_as_soft_timeout() {
        let transport = Arc::new(ScriptedTransport::new().with_fallback(Outcome::SoftFailure {
            reason: "[{\"error\":{\"type\":201}}]".into(),
        }));
        let (_tx, rx) = mpsc::channel(4);

        let (outcome, _) = run(run_config(Some(1)), transport, generator(), rx).await;
        assert_eq!(outcome.summary.soft_timeouts, 4);
        assert_eq!(outcome.summary.successes, 0);
        assert_eq!(outcome.summary.failure_rate(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_does_not_stop_the_run() {
        let transport = Arc::new(ScriptedTransport::new().with_latency(Duration::from_millis(10)));
        let (tx, rx) = mpsc::channel(4);

        let driver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(550)).await;
            tx.send(Event::Report).await.unwrap();
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(Event::Shutdown).await.unwrap();
        });

        let (outcome, summaries) = run(run_config(None), transport, generator(), rx).await;
        driver.await.unwrap();

        assert_eq!(summaries.len(), 2);
        let mid = &summaries[0];
        let last = &summaries[1];
        assert!(mid.requests > 0);
        assert!(last.requests > mid.requests);
        assert_eq!(last, &outcome.summary);
        assert_eq!(outcome.completed, 2);
    }

    /// Accepts every request and never answers, ignoring the deadline
    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        async fn send(&self, _: &BridgeConfig, _: &Command, _: Duration) -> Delivery {
            std::future::pending().await
        }

        fn name(&self) -> &'static str {
            "stalled"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_lanes_are_abandoned_after_grace() {
        let (tx, rx) = mpsc::channel(4);
        let driver = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            tx.send(Event::Shutdown).await.unwrap();
        });

        let started = tokio::time::Instant::now();
        let (outcome, summaries) = run(run_config(None), Arc::new(Stalled), generator(), rx).await;
        driver.await.unwrap();

        // 2 lights per lane fit one wave of 3, plus one spare deadline
        let grace = Duration::from_secs(2);
        assert!(started.elapsed() <= Duration::from_secs(1) + grace + Duration::from_millis(50));
        assert_eq!(outcome.abandoned, 2);
        assert_eq!(outcome.completed, 0);
        assert_eq!(outcome.summary.requests, 0);
        assert_eq!(summaries.len(), 1);
    }

    struct Volatile;

    impl PayloadSource for Volatile {
        fn payload(&self, index: usize) -> StatePayload {
            if index == 0 {
                panic!("generator blew up");
            }
            let mut payload = StatePayload::new();
            payload.insert("bri".into(), 100.into());
            payload
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_lane_is_isolated() {
        let transport = Arc::new(ScriptedTransport::new());
        let (_tx, rx) = mpsc::channel(4);

        let (outcome, _) = run(run_config(Some(2)), transport, Arc::new(Volatile), rx).await;
        assert_eq!(outcome.panicked, 1);
        assert_eq!(outcome.completed, 1);
        // Lane 1 owns lights 2 and 4
        assert_eq!(outcome.summary.successes, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faulted_lanes_end_the_run() {
        let transport = Arc::new(ScriptedTransport::new());
        let (_tx, rx) = mpsc::channel(4);
        let empty = Arc::new(ColorGenerator::new(
            ChannelConfig::new(Waveform::None, 0.2, 0, 1),
            ChannelConfig::new(Waveform::None, 0.2, 0, 1),
            ChannelConfig::new(Waveform::None, 0.2, 0, 1),
            7,
        ));

        let (outcome, _) = run(run_config(None), transport.clone(), empty, rx).await;
        assert_eq!(outcome.faulted, 2);
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_admission_fails_before_network() {
        let transport = Arc::new(ScriptedTransport::new());
        let config = RunConfig {
            lanes: Some(3),
            lane_connections: 3,
            global_connections: 6,
            ..RunConfig::default()
        };
        let result = Dispatcher::new(
            config,
            bridges(),
            transport.clone(),
            generator(),
            Arc::new(Aggregator::new()),
        );
        assert!(matches!(result, Err(ConfigError::ConnectionCeiling { .. })));
        assert_eq!(transport.calls(), 0);
    }
}
