//! Engine configuration.

use std::time::Duration;

use db::DbConfig;
use queue_core::{QueueConfig, QueueError, QueueResult};

pub const ENV_POLL_INTERVAL_MS: &str = "JOBQ_POLL_INTERVAL_MS";
pub const ENV_LEASE_MS: &str = "JOBQ_LEASE_MS";
pub const ENV_MAX_ATTEMPTS: &str = "JOBQ_MAX_ATTEMPTS";
pub const ENV_DB_ENDPOINT: &str = "JOBQ_DB_ENDPOINT";

/// Configuration for an [`Engine`](crate::Engine).
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Period of the timer wheel. A delayed job becomes claimable at most
    /// this long after its ready time.
    pub poll_interval: Duration,
    /// Deadline for request/reply calls between actors.
    pub rpc_timeout: Duration,
    /// Configuration for queues opened without an explicit one.
    pub queue: QueueConfig,
    /// Durable store. `None` keeps everything in memory.
    pub db: Option<DbConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            rpc_timeout: Duration::from_secs(5),
            queue: QueueConfig::default(),
            db: None,
        }
    }
}

impl EngineConfig {
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_rpc_timeout(mut self, rpc_timeout: Duration) -> Self {
        self.rpc_timeout = rpc_timeout;
        self
    }

    pub fn with_queue_config(mut self, queue: QueueConfig) -> Self {
        self.queue = queue;
        self
    }

    pub fn with_db(mut self, db: DbConfig) -> Self {
        self.db = Some(db);
        self
    }

    /// Reject settings the timer wheel or the queues cannot run with.
    pub fn validate(&self) -> QueueResult<()> {
        if self.poll_interval.is_zero() {
            return Err(QueueError::InvalidArgument(
                "poll_interval must be positive".into(),
            ));
        }
        if self.rpc_timeout.is_zero() {
            return Err(QueueError::InvalidArgument(
                "rpc_timeout must be positive".into(),
            ));
        }
        self.queue.validate()
    }

    /// Build a configuration from `JOBQ_*` environment variables, falling
    /// back to the defaults for unset ones.
    pub fn from_env() -> QueueResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> QueueResult<Self> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, ENV_LEASE_MS)? {
            config.queue.lease_ms = ms;
        }
        if let Some(attempts) = parse_var::<u32>(&lookup, ENV_MAX_ATTEMPTS)? {
            config.queue.default_max_attempts = attempts;
        }
        if let Some(endpoint) = lookup(ENV_DB_ENDPOINT).filter(|v| !v.trim().is_empty()) {
            config.db = Some(DbConfig::endpoint(endpoint.trim()));
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> QueueResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| QueueError::InvalidArgument(format!("{}: invalid value '{}'", key, raw))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn unset_variables_keep_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn variables_override_defaults() {
        let config = EngineConfig::from_lookup(lookup_from(&[
            (ENV_POLL_INTERVAL_MS, "250"),
            (ENV_LEASE_MS, "1000"),
            (ENV_MAX_ATTEMPTS, "3"),
            (ENV_DB_ENDPOINT, "mem://"),
        ]))
        .unwrap();

        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.queue.lease_ms, 1000);
        assert_eq!(config.queue.default_max_attempts, 3);
        assert_eq!(config.db, Some(DbConfig::endpoint("mem://")));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for vars in [
            [(ENV_POLL_INTERVAL_MS, "soon")],
            [(ENV_POLL_INTERVAL_MS, "0")],
            [(ENV_MAX_ATTEMPTS, "0")],
            [(ENV_LEASE_MS, "-5")],
            [(ENV_LEASE_MS, "0")],
            [(ENV_LEASE_MS, "18446744073709551615")],
        ] {
            let result = EngineConfig::from_lookup(lookup_from(&vars));
            assert!(matches!(result, Err(QueueError::InvalidArgument(_))));
        }
    }

    #[test]
    fn validate_rejects_zero_intervals_and_bad_queue_config() {
        assert!(EngineConfig::default().validate().is_ok());

        let zero_poll = EngineConfig::default().with_poll_interval(Duration::ZERO);
        assert!(matches!(zero_poll.validate(), Err(QueueError::InvalidArgument(_))));

        let zero_rpc = EngineConfig::default().with_rpc_timeout(Duration::ZERO);
        assert!(matches!(zero_rpc.validate(), Err(QueueError::InvalidArgument(_))));

        for queue in [
            QueueConfig::default().with_lease_ms(0),
            QueueConfig::default().with_lease_ms(u64::MAX),
            QueueConfig::default().with_default_max_attempts(0),
            QueueConfig::default().with_retention(u64::MAX, 10),
        ] {
            let config = EngineConfig::default().with_queue_config(queue);
            assert!(matches!(config.validate(), Err(QueueError::InvalidArgument(_))));
        }
    }
}
