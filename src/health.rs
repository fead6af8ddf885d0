//! Device connectivity health checks
//!
//! Controllers report pass/fail through `CheckRegistry`; the bundled
//! `HealthRegistry` keeps the latest state per label using a DashMap so
//! every controller can report without a shared lock.

use dashmap::DashMap;
use std::time::Instant;
use tracing::{info, warn};

/// One health check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub label: String,
    pub message: String,
}

impl Check {
    /// Connectivity check of one device: `DEVICE_DISCONNECTED_<name>`
    pub fn device_disconnected(device: &str, message: impl Into<String>) -> Self {
        Self {
            label: format!("DEVICE_DISCONNECTED_{}", device),
            message: message.into(),
        }
    }
}

/// Sink for health check results
pub trait CheckRegistry: Send + Sync {
    fn register_fail(&self, check: Check);
    fn register_success(&self, check: Check);
}

/// Latest state of one check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckState {
    pub failing: bool,
    pub message: String,
    pub since: Instant,
}

/// In-memory registry, logging transitions only
#[derive(Debug, Default)]
pub struct HealthRegistry {
    checks: DashMap<String, CheckState>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_failing(&self, label: &str) -> bool {
        self.checks
            .get(label)
            .map(|entry| entry.value().failing)
            .unwrap_or(false)
    }

    /// Copy of every known check, sorted by label
    pub fn snapshot(&self) -> Vec<(String, CheckState)> {
        let mut checks: Vec<_> = self
            .checks
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        checks.sort_by(|a, b| a.0.cmp(&b.0));
        checks
    }

    fn record(&self, check: Check, failing: bool) {
        let changed = self
            .checks
            .get(&check.label)
            .map(|entry| entry.value().failing != failing)
            .unwrap_or(failing);

        if changed {
            if failing {
                warn!(check = %check.label, "Health check failing: {}", check.message);
            } else {
                info!(check = %check.label, "Health check passing again");
            }
        }

        let since = match self.checks.get(&check.label) {
            Some(entry) if !changed => entry.value().since,
            _ => Instant::now(),
        };

        self.checks.insert(
            check.label,
            CheckState {
                failing,
                message: check.message,
                since,
            },
        );
    }
}

impl CheckRegistry for HealthRegistry {
    fn register_fail(&self, check: Check) {
        self.record(check, true);
    }

    fn register_success(&self, check: Check) {
        self.record(check, false);
    }
}
