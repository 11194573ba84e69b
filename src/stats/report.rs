//! Summary report lines

use std::time::Duration;

use super::AggregateStats;

/// Totals and rates derived from an aggregate snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub elapsed: f64,
    pub requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub hard_timeouts: u64,
    pub soft_timeouts: u64,
    pub retries: u64,
    /// Mean full-response and first-byte latency, when any were measured
    pub latency: Option<(Duration, Duration)>,
    /// Per-lane iteration budget, if bounded
    pub iterations: Option<u64>,
}

impl Summary {
    pub fn new(stats: &AggregateStats, elapsed: Duration, iterations: Option<u64>) -> Self {
        let totals = &stats.totals;
        Self {
            elapsed: elapsed.as_secs_f64(),
            requests: totals.requests(),
            successes: totals.successes,
            failures: totals.hard_failures,
            hard_timeouts: totals.hard_timeouts,
            soft_timeouts: totals.soft_failures,
            retries: totals.retries,
            latency: totals.mean_latency(),
            iterations,
        }
    }

    /// Summary of a snapshot as of now
    pub fn now(stats: &AggregateStats, iterations: Option<u64>) -> Self {
        Self::new(stats, stats.started_at.elapsed(), iterations)
    }

    pub fn failure_rate(&self) -> f64 {
        ratio(
            ((self.failures + self.hard_timeouts + self.soft_timeouts) * 100) as f64,
            self.requests as f64,
        )
    }

    pub fn lines(&self) -> Vec<String> {
        let per_sec = |n: u64| ratio(n as f64, self.elapsed);
        let suffix = match self.iterations {
            Some(n) => format!(" ({:.3}/iteration)", ratio(self.elapsed, n as f64)),
            None => String::new(),
        };

        let mut lines = vec![
            format!("* {} requests ({:.3}/sec)", self.requests, per_sec(self.requests)),
            format!("* {} successful ({:.3}/sec)", self.successes, per_sec(self.successes)),
            format!("* {} failed ({:.3}/sec)", self.failures, per_sec(self.failures)),
            format!(
                "* {} hard timeouts ({:.3}/sec)",
                self.hard_timeouts,
                per_sec(self.hard_timeouts)
            ),
            format!(
                "* {} soft timeouts ({:.3}/sec)",
                self.soft_timeouts,
                per_sec(self.soft_timeouts)
            ),
            format!("* {:.3}% failure rate", self.failure_rate()),
        ];
        if let Some((response, first_byte)) = self.latency {
            lines.push(format!(
                "* {:.3}ms mean response ({:.3}ms to first byte)",
                response.as_secs_f64() * 1000.0,
                first_byte.as_secs_f64() * 1000.0
            ));
        }
        if self.retries > 0 {
            lines.push(format!("* {} retries", self.retries));
        }
        lines.push(format!("* {:.3} seconds elapsed{}", self.elapsed, suffix));
        lines
    }

    /// Print the report as program output
    pub fn print(&self, name: &str) {
        println!();
        for line in self.lines() {
            println!("{}: {}", name, line);
        }
    }
}

/// `num / denom` rounded to three places; zero when the denominator is
pub fn ratio(num: f64, denom: f64) -> f64 {
    if denom == 0.0 {
        return 0.0;
    }
    (num / denom * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::LaneCounters;
    use tokio::time::Instant;

    fn stats(totals: LaneCounters) -> AggregateStats {
        AggregateStats {
            totals,
            rounds: 3,
            started_at: Instant::now(),
        }
    }

    #[test]
    fn test_ratio() {
        assert_eq!(ratio(1.0, 3.0), 0.333);
        assert_eq!(ratio(2.0, 3.0), 0.667);
        assert_eq!(ratio(5.0, 0.0), 0.0);
    }

    #[test]
    fn test_lines() {
        let totals = LaneCounters {
            successes: 6,
            soft_failures: 1,
            hard_failures: 2,
            hard_timeouts: 1,
            ..Default::default()
        };
        let summary = Summary::new(&stats(totals), Duration::from_secs(2), Some(4));

        assert_eq!(summary.requests, 10);
        assert_eq!(summary.failure_rate(), 40.0);
        assert_eq!(
            summary.lines(),
            vec![
                "* 10 requests (5.000/sec)",
                "* 6 successful (3.000/sec)",
                "* 2 failed (1.000/sec)",
                "* 1 hard timeouts (0.500/sec)",
                "* 1 soft timeouts (0.500/sec)",
                "* 40.000% failure rate",
                "* 2.000 seconds elapsed (0.500/iteration)",
            ]
        );
    }

    #[test]
    fn test_unbounded_run_has_no_iteration_suffix() {
        let totals = LaneCounters {
            successes: 1,
            retries: 2,
            ..Default::default()
        };
        let summary = Summary::new(&stats(totals), Duration::from_millis(500), None);
        let lines = summary.lines();
        assert_eq!(lines[lines.len() - 2], "* 2 retries");
        assert_eq!(lines[lines.len() - 1], "* 0.500 seconds elapsed");
    }

    #[test]
    fn test_latency_line() {
        let totals = LaneCounters {
            successes: 2,
            timed: 2,
            first_byte_total: Duration::from_millis(5),
            response_total: Duration::from_millis(25),
            ..Default::default()
        };
        let summary = Summary::new(&stats(totals), Duration::from_secs(1), None);
        assert!(summary
            .lines()
            .contains(&"* 12.500ms mean response (2.500ms to first byte)".to_string()));
    }

    #[test]
    fn test_empty_run() {
        let summary = Summary::new(&stats(LaneCounters::default()), Duration::ZERO, None);
        assert_eq!(summary.failure_rate(), 0.0);
        assert_eq!(summary.lines()[0], "* 0 requests (0.000/sec)");
    }
}
