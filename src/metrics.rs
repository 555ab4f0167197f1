use serde::{Deserialize, Serialize};

use crate::terminal::ActionOutcome;

/// Daemon counters reported by `status`
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Metrics {
    pub requests_total: u64,
    pub requests_failed: u64,
    pub cycles_run: u64,
    pub cycles_idle: u64,
    pub brain_failures: u64,
    pub commands_executed: u64,
    pub commands_denied: u64,
    pub commands_timed_out: u64,
    pub commands_failed: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request that produced a normal response
    pub fn record_success(&mut self) {
        self.requests_total += 1;
    }

    /// Record a request that produced an error response
    pub fn record_failure(&mut self) {
        self.requests_total += 1;
        self.requests_failed += 1;
    }

    pub fn record_outcome(&mut self, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Exited { .. } => self.commands_executed += 1,
            ActionOutcome::Denied { .. } => self.commands_denied += 1,
            ActionOutcome::TimedOut { .. } => self.commands_timed_out += 1,
            ActionOutcome::Failed { .. } => self.commands_failed += 1,
        }
    }

    /// Request success rate as percentage
    pub fn success_rate(&self) -> f64 {
        if self.requests_total == 0 {
            return 100.0;
        }
        ((self.requests_total - self.requests_failed) as f64 / self.requests_total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.requests_total, 0);
        assert_eq!(metrics.commands_executed, 0);
        assert_eq!(metrics.success_rate(), 100.0);
    }

    #[test]
    fn test_record_mixed() {
        let mut metrics = Metrics::new();
        metrics.record_success();
        metrics.record_success();
        metrics.record_success();
        metrics.record_failure();
        assert_eq!(metrics.requests_total, 4);
        assert_eq!(metrics.requests_failed, 1);
        assert_eq!(metrics.success_rate(), 75.0);
    }

    #[test]
    fn test_record_outcome() {
        let mut metrics = Metrics::new();
        metrics.record_outcome(&ActionOutcome::Exited { exit_code: Some(2) });
        metrics.record_outcome(&ActionOutcome::Denied { pattern: "mkfs".into() });
        metrics.record_outcome(&ActionOutcome::TimedOut { after_secs: 30 });
        metrics.record_outcome(&ActionOutcome::Failed { error: "spawn".into() });
        assert_eq!(metrics.commands_executed, 1);
        assert_eq!(metrics.commands_denied, 1);
        assert_eq!(metrics.commands_timed_out, 1);
        assert_eq!(metrics.commands_failed, 1);
    }
}
