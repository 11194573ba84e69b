//! Bounded concurrent delivery of command batches

use futures::stream::{self, StreamExt};
use hue_storm_shared::Command;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tracing::debug;

use super::lane::{stop_requested, LaneControl};
use super::retry::RetryPolicy;
use crate::config::BridgeConfig;
use crate::stats::LaneCounters;
use crate::transport::{Delivery, Outcome, PhaseTimings, Transport};

/// One command bound for one bridge
#[derive(Debug, Clone)]
pub struct Job {
    pub bridge: Arc<BridgeConfig>,
    pub command: Command,
}

impl Job {
    pub fn new(bridge: Arc<BridgeConfig>, command: Command) -> Self {
        Self { bridge, command }
    }
}

/// Result of a batch after the retry policy has run its course
#[derive(Debug, Default)]
pub struct RetryReport {
    /// Final outcomes plus the number of resubmissions
    pub counters: LaneCounters,
    /// Delay slept before each resubmission wave
    pub backoffs: Vec<Duration>,
    /// Jobs that ended in failure, with their last outcome
    pub failed: Vec<(Job, Outcome)>,
}

/// Sends batches under a per-batch cap and a shared global cap
#[derive(Clone)]
pub struct FanOut {
    transport: Arc<dyn Transport>,
    global: Arc<Semaphore>,
    lane_cap: usize,
    deadline: Duration,
    control: Option<watch::Receiver<LaneControl>>,
}

impl FanOut {
    pub fn new(
        transport: Arc<dyn Transport>,
        global: Arc<Semaphore>,
        lane_cap: usize,
        deadline: Duration,
    ) -> Self {
        Self {
            transport,
            global,
            lane_cap: lane_cap.max(1),
            deadline,
            control: None,
        }
    }

    /// Abandon pending resubmissions once `control` reads `Stop`
    pub fn with_control(mut self, control: watch::Receiver<LaneControl>) -> Self {
        self.control = Some(control);
        self
    }

    fn stopping(&self) -> bool {
        self.control
            .as_ref()
            .map(|rx| *rx.borrow() == LaneControl::Stop)
            .unwrap_or(false)
    }

    async fn attempt(&self, job: &Job) -> Delivery {
        let _permit = match self.global.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                let outcome = Outcome::ConnectionError {
                    cause: "connection pool closed".into(),
                };
                return Delivery::new(outcome, PhaseTimings::default());
            }
        };
        self.transport
            .send(&job.bridge, &job.command, self.deadline)
            .await
    }

    /// Send every job once; returns when all have resolved
    pub async fn perform_once(&self, jobs: Vec<Job>) -> Vec<(Job, Delivery)> {
        stream::iter(jobs)
            .map(|job| async move {
                let delivery = self.attempt(&job).await;
                (job, delivery)
            })
            .buffer_unordered(self.lane_cap)
            .collect()
            .await
    }

    /// Send every job, resubmitting failures in waves per `policy`
    ///
    /// Only final outcomes are counted: a command that fails twice and then
    /// succeeds contributes one success and two retries.
    pub async fn perform_with_retries(&self, jobs: Vec<Job>, policy: &RetryPolicy) -> RetryReport {
        let mut report = RetryReport::default();
        let mut pending = jobs;
        let mut attempt = 0u32;

        while !pending.is_empty() {
            let mut resubmit = Vec::new();
            for (job, delivery) in self.perform_once(pending).await {
                report.counters.record_timings(&delivery.timings);
                let outcome = delivery.outcome;
                if policy.should_retry(&outcome, attempt) && !self.stopping() {
                    debug!(target = %job.command.target(), attempt, %outcome, "Retrying");
                    resubmit.push((job, outcome));
                } else {
                    report.counters.record(&outcome);
                    if !outcome.is_success() {
                        report.failed.push((job, outcome));
                    }
                }
            }

            if resubmit.is_empty() {
                break;
            }

            attempt += 1;
            let delay = policy.backoff(attempt);
            report.backoffs.push(delay);
            if !self.wait_backoff(delay).await {
                // Stop arrived mid-backoff; the last outcome is final
                for (job, outcome) in resubmit {
                    report.counters.record(&outcome);
                    report.failed.push((job, outcome));
                }
                break;
            }

            report.counters.retries += resubmit.len() as u64;
            pending = resubmit.into_iter().map(|(job, _)| job).collect();
        }

        report
    }

    /// Sleep for `delay`; false if a stop was requested first
    async fn wait_backoff(&self, delay: Duration) -> bool {
        let mut control = match &self.control {
            Some(control) => control.clone(),
            None => {
                tokio::time::sleep(delay).await;
                return true;
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = stop_requested(&mut control) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{success, ScriptedTransport};
    use hue_storm_shared::Target;
    use serde_json::json;

    fn bridge() -> Arc<BridgeConfig> {
        Arc::new(BridgeConfig {
            name: "Bridge-01".into(),
            ip: "127.0.0.1".into(),
            port: 80,
            username: "u".into(),
            debug_hue: None,
            lights: vec![1, 2, 3, 4],
        })
    }

    fn jobs(lights: &[u32]) -> Vec<Job> {
        let payload = json!({"bri": 1}).as_object().cloned().unwrap();
        lights
            .iter()
            .map(|&light| {
                Job::new(
                    bridge(),
                    Command::light_update(light, payload.clone(), Some(0.0)).unwrap(),
                )
            })
            .collect()
    }

    fn fanout(transport: Arc<ScriptedTransport>, lane_cap: usize, global: usize) -> FanOut {
        FanOut::new(
            transport,
            Arc::new(Semaphore::new(global)),
            lane_cap,
            Duration::from_secs(1),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_lane_cap_bounds_concurrency() {
        let transport =
            Arc::new(ScriptedTransport::new().with_latency(Duration::from_millis(50)));
        let results = fanout(transport.clone(), 2, 6)
            .perform_once(jobs(&[1, 2, 3, 4, 5, 6, 7]))
            .await;

        assert_eq!(results.len(), 7);
        assert_eq!(transport.peak_in_flight(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_global_cap_bounds_concurrency() {
        let transport =
            Arc::new(ScriptedTransport::new().with_latency(Duration::from_millis(50)));
        let global = Arc::new(Semaphore::new(3));
        let a = FanOut::new(transport.clone(), global.clone(), 3, Duration::from_secs(1));
        let b = FanOut::new(transport.clone(), global, 3, Duration::from_secs(1));

        let (left, right) = tokio::join!(
            a.perform_once(jobs(&[1, 2, 3, 4])),
            b.perform_once(jobs(&[5, 6, 7, 8]))
        );
        assert_eq!(left.len() + right.len(), 8);
        assert_eq!(transport.peak_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fail_succeed() {
        let transport = Arc::new(ScriptedTransport::new().script(
            Target::Light(1),
            vec![
                Outcome::HardTimeout,
                Outcome::ConnectionError {
                    cause: "reset".into(),
                },
                success(),
            ],
        ));
        let policy = RetryPolicy {
            max_retries: Some(3),
            base_delay: Duration::from_millis(100),
            retry_soft_failures: true,
        };

        let report = fanout(transport.clone(), 3, 6)
            .perform_with_retries(jobs(&[1]), &policy)
            .await;

        assert_eq!(report.counters.successes, 1);
        assert_eq!(report.counters.failures(), 0);
        assert_eq!(report.counters.retries, 2);
        assert_eq!(report.backoffs.len(), 2);
        assert!(report.backoffs[0] < report.backoffs[1]);
        assert!(report.failed.is_empty());
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_count_last_outcome() {
        let transport = Arc::new(ScriptedTransport::new().script(
            Target::Light(2),
            vec![
                Outcome::HardTimeout,
                Outcome::HardTimeout,
                Outcome::Rejected {
                    status: Some(404),
                    reason: String::new(),
                },
            ],
        ));
        let policy = RetryPolicy {
            max_retries: Some(2),
            base_delay: Duration::from_millis(10),
            retry_soft_failures: true,
        };

        let report = fanout(transport.clone(), 3, 6)
            .perform_with_retries(jobs(&[1, 2]), &policy)
            .await;

        assert_eq!(report.counters.successes, 1);
        assert_eq!(report.counters.hard_failures, 1);
        assert_eq!(report.counters.hard_timeouts, 0);
        assert_eq!(report.counters.retries, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0.command.target(), Target::Light(2));
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_failures_not_retried_when_disabled() {
        let soft = Outcome::SoftFailure {
            reason: "[{\"error\":{}}]".into(),
        };
        let make = || {
            Arc::new(
                ScriptedTransport::new().script(Target::Light(1), vec![soft.clone(), success()]),
            )
        };

        let mut policy = RetryPolicy {
            max_retries: Some(1),
            base_delay: Duration::from_millis(10),
            retry_soft_failures: false,
        };
        let transport = make();
        let report = fanout(transport.clone(), 1, 1)
            .perform_with_retries(jobs(&[1]), &policy)
            .await;
        assert_eq!(report.counters.soft_failures, 1);
        assert_eq!(report.counters.retries, 0);
        assert_eq!(transport.calls(), 1);

        policy.retry_soft_failures = true;
        let transport = make();
        let report = fanout(transport.clone(), 1, 1)
            .perform_with_retries(jobs(&[1]), &policy)
            .await;
        assert_eq!(report.counters.soft_failures, 0);
        assert_eq!(report.counters.successes, 1);
        assert_eq!(report.counters.retries, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_attempt_is_timed() {
        let transport = Arc::new(
            ScriptedTransport::new()
                .script(Target::Light(1), vec![Outcome::HardTimeout, success()])
                .with_timings(PhaseTimings {
                    first_byte: Some(Duration::from_millis(4)),
                    received: Some(Duration::from_millis(12)),
                    ..Default::default()
                }),
        );
        let policy = RetryPolicy {
            max_retries: Some(1),
            base_delay: Duration::from_millis(10),
            retry_soft_failures: true,
        };

        let report = fanout(transport, 2, 2)
            .perform_with_retries(jobs(&[1, 2]), &policy)
            .await;

        assert_eq!(report.counters.successes, 2);
        assert_eq!(report.counters.timed, 3);
        assert_eq!(
            report.counters.mean_latency(),
            Some((Duration::from_millis(12), Duration::from_millis(4)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_abandons_backoff() {
        let transport = Arc::new(ScriptedTransport::new().with_fallback(Outcome::HardTimeout));
        let (tx, rx) = watch::channel(LaneControl::Run);
        let policy = RetryPolicy {
            max_retries: None,
            base_delay: Duration::from_secs(60),
            retry_soft_failures: true,
        };
        let fanout = fanout(transport.clone(), 1, 1).with_control(rx);

        let task = tokio::spawn(async move { fanout.perform_with_retries(jobs(&[1]), &policy).await });
        tokio::time::sleep(Duration::from_secs(5)).await;
        tx.send_replace(LaneControl::Stop);

        let report = task.await.unwrap();
        assert_eq!(report.counters.hard_timeouts, 1);
        assert_eq!(report.counters.retries, 0);
        assert_eq!(report.failed.len(), 1);
    }
}
