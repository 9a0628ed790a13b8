use core::num::NonZeroU32;
use std::time::Duration;

use crate::{Error, Result, retry::Backoff};

/// Settings for claiming and renewing a node ID through a coordination store.
///
/// By default a claim gives up after 10 failed attempts with
/// [`Error::RetriesExhausted`], so an unreachable store fails node
/// construction instead of blocking it forever. Set `claim_max_attempts` to
/// `None` to keep retrying until the store answers. Renewal never gives up.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoordinationConfig {
    /// Store endpoints handed to [`CoordinationStore::connect`].
    ///
    /// [`CoordinationStore::connect`]: crate::CoordinationStore::connect
    pub endpoints: Vec<String>,
    /// Namespace prefix; registrations are written as `prefix + node_id`.
    pub prefix: String,
    /// Deadline for one claim attempt or renewal cycle, also used as the dial
    /// timeout.
    pub timeout: Duration,
    /// TTL of each granted lease, in whole seconds (at least one).
    pub lease_ttl: Duration,
    /// Pause between successful renewals. Must be shorter than `lease_ttl`.
    pub renew_interval: Duration,
    /// Delay schedule between failed claim attempts.
    pub claim_backoff: Backoff,
    /// Number of claim attempts before giving up (default 10). `None`
    /// retries forever.
    pub claim_max_attempts: Option<NonZeroU32>,
    /// Delay schedule between failed renewals. Renewal never gives up.
    pub renew_backoff: Backoff,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            endpoints: vec!["127.0.0.1:2379".to_owned()],
            prefix: "/leaseflake/nodes/".to_owned(),
            timeout: Duration::from_secs(5),
            lease_ttl: Duration::from_secs(10),
            renew_interval: Duration::from_secs(3),
            claim_backoff: Backoff::default(),
            claim_max_attempts: NonZeroU32::new(10),
            renew_backoff: Backoff::default(),
        }
    }
}

impl CoordinationConfig {
    /// Splits a comma-separated address list into endpoints.
    pub fn with_endpoints(mut self, addrs: &str) -> Self {
        self.endpoints = addrs
            .split(',')
            .map(str::trim)
            .filter(|addr| !addr.is_empty())
            .map(str::to_owned)
            .collect();
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Checks the settings for values that could never work.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when there are no endpoints, the
    /// prefix is empty, the timeout or renewal interval is zero, the lease is
    /// shorter than a second, or renewals would not happen before the lease
    /// expires.
    pub fn validate(&self) -> Result<()> {
        if self.endpoints.is_empty() {
            return Err(Error::invalid_config("at least one endpoint is required"));
        }
        if self.prefix.is_empty() {
            return Err(Error::invalid_config("prefix must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(Error::invalid_config("timeout must be non-zero"));
        }
        if self.lease_ttl < Duration::from_secs(1) {
            return Err(Error::invalid_config("lease TTL must be at least one second"));
        }
        if self.renew_interval.is_zero() || self.renew_interval >= self.lease_ttl {
            return Err(Error::invalid_config(format!(
                "renew interval ({:?}) must be non-zero and shorter than the lease TTL ({:?})",
                self.renew_interval, self.lease_ttl
            )));
        }
        Ok(())
    }

    pub(crate) fn lease_ttl_secs(&self) -> u64 {
        self.lease_ttl.as_secs().max(1)
    }

    /// Registration key for `node_id`.
    pub fn key_for(&self, node_id: u64) -> String {
        format!("{}{node_id}", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        CoordinationConfig::default().validate().unwrap();
    }

    #[test]
    fn endpoints_are_split_on_commas() {
        let config = CoordinationConfig::default().with_endpoints("a:2379, b:2379,,c:2379");
        assert_eq!(config.endpoints, ["a:2379", "b:2379", "c:2379"]);
    }

    #[test]
    fn renewal_must_beat_lease_expiry() {
        let config = CoordinationConfig {
            lease_ttl: Duration::from_secs(3),
            renew_interval: Duration::from_secs(3),
            ..CoordinationConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn sub_second_leases_are_rejected() {
        let config = CoordinationConfig {
            lease_ttl: Duration::from_millis(500),
            renew_interval: Duration::from_millis(100),
            ..CoordinationConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn keys_are_prefix_plus_decimal_id() {
        let config = CoordinationConfig::default().with_prefix("/nodes/");
        assert_eq!(config.key_for(42), "/nodes/42");
    }
}
