//! # leaseflake
//!
//! Snowflake-style 64-bit identifiers with a configurable bit layout and
//! optional node ID allocation through a leased key-value coordination store.
//!
//! An identifier packs the ticks elapsed since an epoch, a node ID and a
//! per-tick sequence into the low 63 bits of an `i64`. A [`Pattern`] fixes
//! that layout; a [`Node`] mints identifiers against it.
//!
//! ## Manual node IDs
//!
//! ```
//! use std::sync::Arc;
//! use leaseflake::{Pattern, WaitMethod};
//!
//! let pattern = Arc::new(Pattern::default());
//! let node = pattern
//!     .node_builder()
//!     .node_id(7)
//!     .wait_method(WaitMethod::Spin)
//!     .build()
//!     .unwrap();
//!
//! let id = node.generate().unwrap();
//! assert_eq!(pattern.decompose(id).node_id, 7);
//! ```
//!
//! ## Coordinated node IDs
//!
//! With a [`CoordinationStore`], the node claims the lowest free ID under a
//! key prefix, registers it under a lease, and renews that lease in the
//! background for as long as the node lives:
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> leaseflake::Result<()> {
//! use std::sync::Arc;
//! use leaseflake::{CoordinationConfig, MemoryStore, Pattern};
//!
//! let store = MemoryStore::new();
//! let pattern = Arc::new(Pattern::default());
//! let config = CoordinationConfig::default().with_prefix("/ids/nodes/");
//!
//! let node = pattern
//!     .node_builder()
//!     .build_coordinated(store.clone(), config)
//!     .await?;
//!
//! assert_eq!(node.node_id(), 0);
//! assert_eq!(store.entries("/ids/nodes/").len(), 1);
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - `tracing` (default): log claim, renewal and clock events through
//!   `tracing`; the default [`ErrorSink`] emits warnings.
//! - `serde`: (de)serialize [`Pattern`], [`BitRange`] and [`WaitMethod`].

mod coordination;
mod error;
mod node;
mod pattern;
pub mod retry;
mod time;

pub use crate::coordination::*;
pub use crate::error::*;
pub use crate::node::*;
pub use crate::pattern::*;
pub use crate::retry::Backoff;
pub use crate::time::*;
