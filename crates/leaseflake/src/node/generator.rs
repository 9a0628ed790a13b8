use std::{hint, sync::Arc, thread};

use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::{Error, Pattern, RenewalHandle, Result, SystemClock, TimeSource};

/// How a node blocks while waiting for the clock to reach a tick.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum WaitMethod {
    /// Sleep for one tick before checking the clock again.
    #[default]
    Sleep,
    /// Re-check the clock in a tight loop.
    Spin,
}

/// Mutable generation state, guarded by the node's lock.
#[derive(Debug, Default)]
struct State {
    last_tick: u64,
    sequence: u64,
}

/// A single ID generation unit with a unique node ID.
///
/// `Node` is `Send + Sync`; calls to [`Node::generate`] from many threads are
/// serialized by an internal [`parking_lot::Mutex`], so IDs from one node are
/// strictly increasing as long as the clock does not run backwards while
/// `safe` is off.
///
/// A node whose ID was claimed through a coordination store also owns the
/// [`RenewalHandle`] keeping that claim alive; dropping the node stops
/// renewal.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use leaseflake::Pattern;
///
/// let pattern = Arc::new(Pattern::default());
/// let node = pattern.node_builder().node_id(5).build().unwrap();
///
/// let a = node.generate().unwrap();
/// let b = node.generate().unwrap();
/// assert!(a < b);
/// assert_eq!(pattern.decompose(a).node_id, 5);
/// ```
pub struct Node<T = SystemClock>
where
    T: TimeSource,
{
    pattern: Arc<Pattern>,
    node_id: u64,
    safe: bool,
    wait: WaitMethod,
    clock: T,
    state: Mutex<State>,
    renewal: Option<RenewalHandle>,
}

impl<T: TimeSource> Node<T> {
    pub(crate) fn from_parts(
        pattern: Arc<Pattern>,
        node_id: u64,
        safe: bool,
        wait: WaitMethod,
        clock: T,
        renewal: Option<RenewalHandle>,
    ) -> Self {
        Self {
            pattern,
            node_id,
            safe,
            wait,
            clock,
            state: Mutex::new(State::default()),
            renewal,
        }
    }

    /// Mints the next identifier.
    ///
    /// Within one tick the sequence increments; when it is exhausted the call
    /// blocks until the next tick. If the clock is behind the last tick used,
    /// a `safe` node blocks until the clock catches up while an unsafe node
    /// keeps using the last tick.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeOverflow`] once the elapsed tick count no longer
    /// fits the pattern's time field.
    #[cfg_attr(feature = "tracing", instrument(level = "trace", skip(self), fields(node_id = self.node_id)))]
    pub fn generate(&self) -> Result<i64> {
        let mut state = self.state.lock();

        let mut tick = self.current_tick();
        if tick < state.last_tick {
            tick = if self.safe {
                self.cold_clock_behind(state.last_tick)
            } else {
                state.last_tick
            };
        }

        let sequence = if tick == state.last_tick {
            let next = state.sequence + 1;
            if next > self.pattern.max_sequence() {
                tick = self.wait_for_tick(state.last_tick.saturating_add(1));
                0
            } else {
                next
            }
        } else {
            0
        };

        let max_tick = self.pattern.max_tick();
        if tick > max_tick {
            return Err(Error::TimeOverflow {
                tick,
                max: max_tick,
            });
        }

        state.last_tick = tick;
        state.sequence = sequence;
        Ok(self.pattern.compose(tick, self.node_id, sequence))
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind(&self, last_tick: u64) -> u64 {
        #[cfg(feature = "tracing")]
        tracing::debug!(
            node_id = self.node_id,
            last_tick,
            "clock moved backwards, waiting"
        );
        self.wait_for_tick(last_tick)
    }

    /// Blocks until the clock reaches `target` and returns the tick observed.
    fn wait_for_tick(&self, target: u64) -> u64 {
        loop {
            let tick = self.current_tick();
            if tick >= target {
                return tick;
            }
            match self.wait {
                WaitMethod::Sleep => thread::sleep(self.pattern.tick()),
                WaitMethod::Spin => hint::spin_loop(),
            }
        }
    }

    fn current_tick(&self) -> u64 {
        self.pattern.tick_at(self.clock.now())
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    pub fn pattern(&self) -> &Arc<Pattern> {
        &self.pattern
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    pub fn wait_method(&self) -> WaitMethod {
        self.wait
    }

    /// Whether the node ID is held through a coordination store lease.
    pub fn is_coordinated(&self) -> bool {
        self.renewal.is_some()
    }

    /// Stops renewing the node's lease and waits for the renewal loop to
    /// exit. Does nothing for manually assigned IDs.
    ///
    /// Generation keeps working afterwards, but once the lease expires
    /// another process may claim the same node ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TaskFailed`] if the renewal task did not exit cleanly.
    pub async fn stop_renewal(&mut self) -> Result<()> {
        match self.renewal.take() {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        }
    }
}

impl<T: TimeSource> core::fmt::Debug for Node<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Node")
            .field("node_id", &self.node_id)
            .field("safe", &self.safe)
            .field("wait", &self.wait)
            .field("coordinated", &self.is_coordinated())
            .finish_non_exhaustive()
    }
}
