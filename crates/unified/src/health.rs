use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdapterStatus {
    Connected,
    Disconnected,
    Error,
}

/// A point-in-time health sample for one adapter.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AdapterHealth {
    pub healthy: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    pub error_rate: f64,
    pub last_check: DateTime<Utc>,
}

impl AdapterHealth {
    #[must_use]
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            issues: Vec::new(),
            response_time_ms: None,
            error_rate: 0.0,
            last_check: Utc::now(),
        }
    }

    #[must_use]
    pub fn unhealthy(issue: impl Into<String>) -> Self {
        Self {
            healthy: false,
            issues: vec![issue.into()],
            response_time_ms: None,
            error_rate: 0.0,
            last_check: Utc::now(),
        }
    }
}

/// Running counters an adapter maintains over its lifetime.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AdapterMetrics {
    pub entities_managed: usize,
    pub actions_executed: u64,
    pub actions_succeeded: u64,
    pub actions_failed: u64,
    pub avg_response_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    pub sync_errors: u64,
    pub started_at: DateTime<Utc>,
}

impl Default for AdapterMetrics {
    fn default() -> Self {
        Self {
            entities_managed: 0,
            actions_executed: 0,
            actions_succeeded: 0,
            actions_failed: 0,
            avg_response_ms: 0.0,
            last_sync: None,
            sync_errors: 0,
            started_at: Utc::now(),
        }
    }
}

impl AdapterMetrics {
    /// Record one action execution, folding the response time into the
    /// running average.
    pub fn record_action(&mut self, success: bool, response_ms: u64) {
        self.actions_executed += 1;
        if success {
            self.actions_succeeded += 1;
        } else {
            self.actions_failed += 1;
        }
        let n = self.actions_executed as f64;
        self.avg_response_ms = (self.avg_response_ms * (n - 1.0) + response_ms as f64) / n;
    }
}
