use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{
    StoreError,
    coordination::{CoordinationStore, KeyValue, LeaseId, StoreConnection},
};

/// An in-process [`CoordinationStore`] with real lease expiry.
///
/// Leases are timed with tokio's clock, so tests running with a paused
/// runtime can expire them by advancing time. Faults (unavailability, failed
/// requests, panics, latency) can be injected to exercise the allocator's
/// retry paths.
///
/// Clones share the same underlying state.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    faults: Mutex<Faults>,
}

#[derive(Debug, Default)]
struct State {
    keys: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Instant>,
    next_lease: i64,
    connects: u64,
    open: u64,
}

#[derive(Debug)]
struct Entry {
    value: String,
    lease: LeaseId,
}

#[derive(Debug, Default)]
struct Faults {
    unavailable: bool,
    failing_requests: u32,
    panicking_requests: u32,
    latency: Duration,
}

impl State {
    /// Drops expired leases and every key bound to them.
    fn purge_expired(&mut self, now: Instant) {
        self.leases.retain(|_, expires_at| *expires_at > now);
        let leases = &self.leases;
        self.keys.retain(|_, entry| leases.contains_key(&entry.lease));
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes new connections fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.faults.lock().unavailable = unavailable;
    }

    /// Fails the next `count` requests on any connection.
    pub fn fail_next_requests(&self, count: u32) {
        self.inner.faults.lock().failing_requests = count;
    }

    /// Panics inside the next `count` requests on any connection.
    pub fn panic_next_requests(&self, count: u32) {
        self.inner.faults.lock().panicking_requests = count;
    }

    /// Delays every request by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.inner.faults.lock().latency = latency;
    }

    /// Live keys under `prefix`, in key order.
    pub fn entries(&self, prefix: &str) -> Vec<KeyValue> {
        let mut state = self.inner.state.lock();
        state.purge_expired(Instant::now());
        state
            .keys
            .range(prefix.to_owned()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, entry)| KeyValue::new(key.clone(), entry.value.clone()))
            .collect()
    }

    /// Writes a key bound to a fresh lease, as another process would.
    pub fn insert_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> LeaseId {
        let mut state = self.inner.state.lock();
        let lease = Self::grant(&mut state, ttl);
        state.keys.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                lease,
            },
        );
        lease
    }

    /// Expires `lease` immediately, removing its keys.
    pub fn revoke(&self, lease: LeaseId) {
        let mut state = self.inner.state.lock();
        state.leases.remove(&lease);
        state.purge_expired(Instant::now());
    }

    /// Total connections opened so far.
    pub fn connect_count(&self) -> u64 {
        self.inner.state.lock().connects
    }

    /// Connections opened and not yet closed.
    pub fn open_connections(&self) -> u64 {
        self.inner.state.lock().open
    }

    fn grant(state: &mut State, ttl: Duration) -> LeaseId {
        state.next_lease += 1;
        let lease = LeaseId(state.next_lease);
        state.leases.insert(lease, Instant::now() + ttl);
        lease
    }

    /// Applies injected latency and faults before a request.
    async fn before_request(&self, op: &str) -> Result<(), StoreError> {
        let latency = self.inner.faults.lock().latency;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        let (fail, panic) = {
            let mut faults = self.inner.faults.lock();
            let panic = faults.panicking_requests > 0;
            if panic {
                faults.panicking_requests -= 1;
            }
            let fail = !panic && faults.failing_requests > 0;
            if fail {
                faults.failing_requests -= 1;
            }
            (fail, panic)
        };
        if panic {
            panic!("injected panic during {op}");
        }
        if fail {
            return Err(StoreError::Request(format!("injected failure during {op}")));
        }
        Ok(())
    }
}

impl CoordinationStore for MemoryStore {
    type Connection = MemoryConnection;

    async fn connect(
        &self,
        _endpoints: &[String],
        _dial_timeout: Duration,
    ) -> Result<MemoryConnection, StoreError> {
        if self.inner.faults.lock().unavailable {
            return Err(StoreError::Connection("store unavailable".to_owned()));
        }
        let mut state = self.inner.state.lock();
        state.connects += 1;
        state.open += 1;
        Ok(MemoryConnection {
            store: self.clone(),
        })
    }
}

/// A connection to a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    store: MemoryStore,
}

impl StoreConnection for MemoryConnection {
    async fn get_by_prefix(&mut self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        self.store.before_request("get").await?;
        Ok(self.store.entries(prefix))
    }

    async fn grant_lease(&mut self, ttl_secs: u64) -> Result<LeaseId, StoreError> {
        self.store.before_request("grant").await?;
        let mut state = self.store.inner.state.lock();
        Ok(MemoryStore::grant(&mut state, Duration::from_secs(ttl_secs)))
    }

    async fn put(&mut self, key: &str, value: &str, lease: LeaseId) -> Result<(), StoreError> {
        self.store.before_request("put").await?;
        let mut state = self.store.inner.state.lock();
        state.purge_expired(Instant::now());
        if !state.leases.contains_key(&lease) {
            return Err(StoreError::LeaseNotFound(lease.0));
        }
        state.keys.insert(
            key.to_owned(),
            Entry {
                value: value.to_owned(),
                lease,
            },
        );
        Ok(())
    }

    async fn close(self) {
        let mut state = self.store.inner.state.lock();
        state.open = state.open.saturating_sub(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn connect(store: &MemoryStore) -> MemoryConnection {
        store.connect(&[], Duration::from_secs(1)).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn keys_expire_with_their_lease() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        let lease = conn.grant_lease(2).await.unwrap();
        conn.put("/nodes/4", "4", lease).await.unwrap();
        assert_eq!(
            conn.get_by_prefix("/nodes/").await.unwrap(),
            vec![KeyValue::new("/nodes/4", "4")]
        );

        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(conn.get_by_prefix("/nodes/").await.unwrap().is_empty());
        conn.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn rebinding_to_a_new_lease_outlives_the_old_one() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        let first = conn.grant_lease(2).await.unwrap();
        conn.put("/nodes/1", "1", first).await.unwrap();
        tokio::time::advance(Duration::from_secs(1)).await;
        let second = conn.grant_lease(2).await.unwrap();
        conn.put("/nodes/1", "1", second).await.unwrap();

        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert_eq!(store.entries("/nodes/").len(), 1);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(store.entries("/nodes/").is_empty());
    }

    #[tokio::test]
    async fn prefix_reads_skip_other_namespaces() {
        let store = MemoryStore::new();
        store.insert_with_ttl("/a/1", "1", Duration::from_secs(10));
        store.insert_with_ttl("/b/2", "2", Duration::from_secs(10));
        store.insert_with_ttl("/a/3", "3", Duration::from_secs(10));
        let keys: Vec<_> = store.entries("/a/").into_iter().map(|kv| kv.key).collect();
        assert_eq!(keys, ["/a/1", "/a/3"]);
    }

    #[tokio::test]
    async fn put_requires_live_lease() {
        let store = MemoryStore::new();
        let mut conn = connect(&store).await;
        let lease = conn.grant_lease(5).await.unwrap();
        store.revoke(lease);
        let err = conn.put("/nodes/0", "0", lease).await.unwrap_err();
        assert_eq!(err, StoreError::LeaseNotFound(lease.0));
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(store.connect(&[], Duration::from_secs(1)).await.is_err());
        store.set_unavailable(false);

        let mut conn = connect(&store).await;
        store.fail_next_requests(1);
        assert!(conn.get_by_prefix("/").await.is_err());
        assert!(conn.get_by_prefix("/").await.is_ok());
        assert_eq!(store.open_connections(), 1);
        conn.close().await;
        assert_eq!(store.open_connections(), 0);
        assert_eq!(store.connect_count(), 1);
    }
}
