use std::{collections::BTreeSet, sync::Arc};

use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{
    Error, Result,
    coordination::{
        CoordinationConfig, CoordinationStore, ErrorSink, KeyValue, Phase, StoreConnection,
        TracingSink,
    },
    retry::{retry, run_guarded, run_with_timeout, until_cancelled},
};

/// Claims a free node ID in a coordination store and keeps it leased.
///
/// Claiming scans the registrations under the configured prefix, picks the
/// lowest unregistered ID in `0..=node_max`, and writes `prefix + id -> id`
/// bound to a fresh lease. Renewal re-registers the same key under a new
/// lease every `renew_interval` for as long as the returned
/// [`RenewalHandle`] lives.
///
/// Each attempt opens and closes its own connection, and each runs under the
/// configured timeout through [`run_with_timeout`].
///
/// Two allocators racing on the same prefix can both observe the same free
/// ID; exclusivity relies on the store's consistency, not on this type.
pub struct Allocator<S> {
    store: Arc<S>,
    config: Arc<CoordinationConfig>,
    node_max: u64,
    sink: Arc<dyn ErrorSink>,
}

impl<S> Clone for Allocator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            node_max: self.node_max,
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<S: CoordinationStore> Allocator<S> {
    /// Creates an allocator handing out IDs in `0..=node_max`. Errors are
    /// reported to [`TracingSink`] until [`Allocator::with_sink`] replaces it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` fails validation.
    pub fn new(store: S, config: CoordinationConfig, node_max: u64) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store: Arc::new(store),
            config: Arc::new(config),
            node_max,
            sink: Arc::new(TracingSink),
        })
    }

    /// Routes non-fatal errors to `sink`.
    pub fn with_sink(mut self, sink: impl ErrorSink) -> Self {
        self.sink = Arc::new(sink);
        self
    }

    pub fn node_max(&self) -> u64 {
        self.node_max
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.config
    }

    /// Claims a node ID, retrying failed attempts with backoff.
    ///
    /// Every failure is reported to the sink before the next attempt.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RetriesExhausted`] carrying the last failure once
    /// `claim_max_attempts` attempts have failed. With no ceiling configured
    /// this never returns an error.
    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self), fields(prefix = %self.config.prefix)))]
    pub async fn claim(&self) -> Result<u64> {
        let node_id = retry(
            &self.config.claim_backoff,
            self.config.claim_max_attempts,
            |err| self.sink.report(Phase::Claim, err),
            move || self.try_claim(),
        )
        .await?;
        #[cfg(feature = "tracing")]
        tracing::info!(node_id, "claimed node id");
        Ok(node_id)
    }

    /// Makes a single claim attempt under the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns the store, exhaustion, deadline or panic error of the attempt.
    pub async fn try_claim(&self) -> Result<u64> {
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let node_max = self.node_max;
        run_with_timeout(self.config.timeout, move |token| async move {
            let mut conn =
                until_cancelled(&token, store.connect(&config.endpoints, config.timeout)).await?;
            // A panicking store call must not skip the close below.
            let claimed = run_guarded(claim_free_id(&mut conn, &config, node_max, &token)).await;
            conn.close().await;
            claimed
        })
        .await
    }

    /// Re-registers `node_id` under a fresh lease, once, under the configured
    /// timeout.
    ///
    /// # Errors
    ///
    /// Returns the store, deadline or panic error of the cycle.
    pub async fn renew(&self, node_id: u64) -> Result<()> {
        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        run_with_timeout(self.config.timeout, move |token| async move {
            let mut conn =
                until_cancelled(&token, store.connect(&config.endpoints, config.timeout)).await?;
            let registered = run_guarded(register(&mut conn, &config, node_id, &token)).await;
            conn.close().await;
            registered
        })
        .await
    }

    /// Starts the background renewal loop for `node_id` on the current tokio
    /// runtime.
    ///
    /// The loop renews every `renew_interval`; failures go to the sink and are
    /// retried after `renew_backoff` without limit. It runs until the handle
    /// is stopped or dropped.
    pub fn spawn_renewal(&self, node_id: u64) -> RenewalHandle {
        let token = CancellationToken::new();
        let allocator = self.clone();
        let task = tokio::spawn(allocator.renewal_loop(node_id, token.clone()));
        RenewalHandle {
            node_id,
            guard: token.drop_guard(),
            task,
        }
    }

    #[cfg_attr(feature = "tracing", instrument(level = "debug", skip(self, token)))]
    async fn renewal_loop(self, node_id: u64, token: CancellationToken) {
        let mut failures = 0u32;
        loop {
            let outcome = tokio::select! {
                biased;
                () = token.cancelled() => break,
                outcome = self.renew(node_id) => outcome,
            };
            let pause = match outcome {
                Ok(()) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(node_id, "lease renewed");
                    failures = 0;
                    self.config.renew_interval
                }
                Err(err) => {
                    self.sink.report(Phase::Renewal, &err);
                    let delay = self.config.renew_backoff.delay(failures);
                    failures = failures.saturating_add(1);
                    delay
                }
            };
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                () = tokio::time::sleep(pause) => {}
            }
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(node_id, "renewal stopped");
    }
}

async fn claim_free_id<C: StoreConnection>(
    conn: &mut C,
    config: &CoordinationConfig,
    node_max: u64,
    token: &CancellationToken,
) -> Result<u64> {
    let entries = until_cancelled(token, conn.get_by_prefix(&config.prefix)).await?;
    let claimed = claimed_ids(&config.prefix, &entries);
    let node_id = first_free(&claimed, node_max).ok_or_else(|| Error::NodeIdExhausted {
        prefix: config.prefix.clone(),
        max: node_max,
    })?;
    register(conn, config, node_id, token).await?;
    Ok(node_id)
}

async fn register<C: StoreConnection>(
    conn: &mut C,
    config: &CoordinationConfig,
    node_id: u64,
    token: &CancellationToken,
) -> Result<()> {
    let lease = until_cancelled(token, conn.grant_lease(config.lease_ttl_secs())).await?;
    let key = config.key_for(node_id);
    let value = node_id.to_string();
    until_cancelled(token, conn.put(&key, &value, lease)).await
}

/// Node IDs registered under `prefix`. The value is authoritative; the key
/// suffix is a fallback. Entries with neither parseable are ignored.
fn claimed_ids(prefix: &str, entries: &[KeyValue]) -> BTreeSet<u64> {
    entries
        .iter()
        .filter_map(|kv| {
            let parsed = kv.value.trim().parse::<u64>().ok().or_else(|| {
                kv.key
                    .strip_prefix(prefix)
                    .and_then(|suffix| suffix.parse().ok())
            });
            #[cfg(feature = "tracing")]
            if parsed.is_none() {
                tracing::warn!(key = %kv.key, value = %kv.value, "ignoring unparsable registration");
            }
            parsed
        })
        .collect()
}

fn first_free(claimed: &BTreeSet<u64>, node_max: u64) -> Option<u64> {
    (0..=node_max).find(|id| !claimed.contains(id))
}

/// Keeps a node ID's lease renewed in the background.
///
/// Dropping the handle stops renewal; the registration then disappears when
/// its last lease expires.
#[derive(Debug)]
pub struct RenewalHandle {
    node_id: u64,
    guard: DropGuard,
    task: JoinHandle<()>,
}

impl RenewalHandle {
    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Whether the renewal loop has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops renewal and waits for the loop to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskFailed`] if the renewal task panicked or was
    /// aborted by the runtime.
    pub async fn shutdown(self) -> Result<()> {
        let Self { guard, task, .. } = self;
        drop(guard);
        task.await.map_err(|err| Error::TaskFailed {
            reason: err.to_string(),
        })
    }
}
