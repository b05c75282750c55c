//! Manager configuration

use std::time::Duration;

use crate::error::{Error, Result};
use crate::health::BackoffPolicy;

/// Stream lifecycle manager configuration options
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// How long an endpoint with no subscribers survives before teardown
    pub grace_period: Duration,

    /// Health monitor tick interval
    pub health_interval: Duration,

    /// Bound on each upstream probe and relay state query
    pub probe_timeout: Duration,

    /// Bound on each relay create/destroy call
    pub relay_timeout: Duration,

    /// Consecutive failures before an endpoint is declared FAILED
    pub max_consecutive_failures: u32,

    /// Maximum number of devices checked concurrently per tick
    pub max_concurrent_checks: usize,

    /// Backoff between recovery attempts
    pub backoff: BackoffPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(30),
            health_interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            relay_timeout: Duration::from_secs(10),
            max_consecutive_failures: 6,
            max_concurrent_checks: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ManagerConfig {
    /// Set the teardown grace period
    pub fn grace_period(mut self, period: Duration) -> Self {
        self.grace_period = period;
        self
    }

    /// Set the health monitor interval
    pub fn health_interval(mut self, interval: Duration) -> Self {
        self.health_interval = interval;
        self
    }

    /// Set the probe timeout
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the relay call timeout
    pub fn relay_timeout(mut self, timeout: Duration) -> Self {
        self.relay_timeout = timeout;
        self
    }

    /// Set the failure budget
    pub fn max_consecutive_failures(mut self, max: u32) -> Self {
        self.max_consecutive_failures = max;
        self
    }

    /// Set the per-tick check concurrency
    pub fn max_concurrent_checks(mut self, max: usize) -> Self {
        self.max_concurrent_checks = max;
        self
    }

    /// Set the recovery backoff policy
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Reject configurations the monitor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.health_interval.is_zero() {
            return Err(Error::Config("health_interval must be non-zero".into()));
        }
        if self.probe_timeout.is_zero() || self.relay_timeout.is_zero() {
            return Err(Error::Config("timeouts must be non-zero".into()));
        }
        if self.max_consecutive_failures == 0 {
            return Err(Error::Config(
                "max_consecutive_failures must be at least 1".into(),
            ));
        }
        if self.max_concurrent_checks == 0 {
            return Err(Error::Config(
                "max_concurrent_checks must be at least 1".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.backoff.jitter_fraction) {
            return Err(Error::Config("jitter_fraction must be in [0, 1)".into()));
        }
        if self.backoff.base > self.backoff.cap {
            return Err(Error::Config("backoff base exceeds cap".into()));
        }
        Ok(())
    }
}
