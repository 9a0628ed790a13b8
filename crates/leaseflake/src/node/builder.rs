use std::sync::Arc;

use crate::{
    Allocator, CoordinationConfig, CoordinationStore, Error, Node, Pattern, Result, SystemClock,
    TimeSource, WaitMethod,
};

/// Configures and builds a [`Node`].
///
/// Defaults: node ID 0, `safe` on, [`WaitMethod::Sleep`], the system wall
/// clock. The node ID comes either from [`NodeBuilder::node_id`] and
/// [`NodeBuilder::build`], or from a coordination store through
/// [`NodeBuilder::build_coordinated`]; the two are mutually exclusive.
pub struct NodeBuilder<T = SystemClock> {
    pattern: Arc<Pattern>,
    node_id: Option<u64>,
    safe: bool,
    wait: WaitMethod,
    clock: T,
}

impl NodeBuilder {
    pub fn new(pattern: Arc<Pattern>) -> Self {
        Self {
            pattern,
            node_id: None,
            safe: true,
            wait: WaitMethod::default(),
            clock: SystemClock,
        }
    }
}

impl<T: TimeSource> NodeBuilder<T> {
    /// Assigns the node ID manually.
    pub fn node_id(mut self, node_id: u64) -> Self {
        self.node_id = Some(node_id);
        self
    }

    /// With `safe` on (the default), a clock running backwards blocks
    /// generation until it catches up; with it off the last tick is reused.
    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = safe;
        self
    }

    pub fn wait_method(mut self, wait: WaitMethod) -> Self {
        self.wait = wait;
        self
    }

    /// Replaces the time source.
    pub fn clock<U: TimeSource>(self, clock: U) -> NodeBuilder<U> {
        NodeBuilder {
            pattern: self.pattern,
            node_id: self.node_id,
            safe: self.safe,
            wait: self.wait,
            clock,
        }
    }

    /// Builds a node with the manually assigned ID (0 if none was set).
    ///
    /// # Errors
    ///
    /// Returns [`Error::NodeIdOutOfRange`] if the ID does not fit the
    /// pattern's node field.
    pub fn build(self) -> Result<Node<T>> {
        let node_id = self.node_id.unwrap_or(0);
        let max = self.pattern.max_node_id();
        if node_id > max {
            return Err(Error::NodeIdOutOfRange { node_id, max });
        }
        Ok(Node::from_parts(
            self.pattern,
            node_id,
            self.safe,
            self.wait,
            self.clock,
            None,
        ))
    }

    /// Claims a node ID from `store` and builds a node that keeps the claim
    /// renewed in the background. Must run inside a tokio runtime.
    ///
    /// Resolves once an ID is claimed; claim failures are logged and retried
    /// as configured in `config`.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidConfig`] if a manual node ID was also set or `config`
    ///   is invalid
    /// - [`Error::RetriesExhausted`] if the claim ceiling was reached
    pub async fn build_coordinated<S>(self, store: S, config: CoordinationConfig) -> Result<Node<T>>
    where
        S: CoordinationStore,
    {
        let allocator = Allocator::new(store, config, self.pattern.max_node_id())?;
        self.build_with_allocator(&allocator).await
    }

    /// Like [`NodeBuilder::build_coordinated`], with a prepared
    /// [`Allocator`] (for example one with a custom error sink).
    ///
    /// # Errors
    ///
    /// Same as [`NodeBuilder::build_coordinated`]; additionally
    /// [`Error::InvalidConfig`] if the allocator can hand out IDs wider than
    /// the pattern's node field.
    pub async fn build_with_allocator<S>(self, allocator: &Allocator<S>) -> Result<Node<T>>
    where
        S: CoordinationStore,
    {
        if let Some(node_id) = self.node_id {
            return Err(Error::invalid_config(format!(
                "manual node id {node_id} cannot be combined with coordinated allocation"
            )));
        }
        let max = self.pattern.max_node_id();
        if allocator.node_max() > max {
            return Err(Error::invalid_config(format!(
                "allocator range 0..={} exceeds the node field (max = {max})",
                allocator.node_max()
            )));
        }

        let node_id = allocator.claim().await?;
        let renewal = allocator.spawn_renewal(node_id);
        Ok(Node::from_parts(
            self.pattern,
            node_id,
            self.safe,
            self.wait,
            self.clock,
            Some(renewal),
        ))
    }
}
