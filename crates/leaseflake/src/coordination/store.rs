use core::{fmt, future::Future};
use std::time::Duration;

use crate::StoreError;

/// Identifier of a lease granted by a coordination store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A key and its value as returned by a prefix read.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A strongly consistent key-value service with prefix reads and
/// lease-bound keys, used to register node IDs.
///
/// Every claim attempt and renewal cycle opens its own connection through
/// [`CoordinationStore::connect`] and closes it afterwards; connections are
/// never shared between attempts.
pub trait CoordinationStore: Send + Sync + 'static {
    type Connection: StoreConnection + 'static;

    /// Opens a connection to any of `endpoints`, giving up after
    /// `dial_timeout`.
    fn connect(
        &self,
        endpoints: &[String],
        dial_timeout: Duration,
    ) -> impl Future<Output = Result<Self::Connection, StoreError>> + Send;
}

/// An open connection to a [`CoordinationStore`].
pub trait StoreConnection: Send {
    /// Returns every key starting with `prefix`.
    fn get_by_prefix(
        &mut self,
        prefix: &str,
    ) -> impl Future<Output = Result<Vec<KeyValue>, StoreError>> + Send;

    /// Grants a lease that expires `ttl_secs` seconds from now unless its keys
    /// are re-registered under a newer lease.
    fn grant_lease(&mut self, ttl_secs: u64)
    -> impl Future<Output = Result<LeaseId, StoreError>> + Send;

    /// Writes `key = value`, bound to `lease`. The key disappears when the
    /// lease expires.
    fn put(
        &mut self,
        key: &str,
        value: &str,
        lease: LeaseId,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Releases the connection.
    fn close(self) -> impl Future<Output = ()> + Send;
}
