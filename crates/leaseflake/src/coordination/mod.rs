mod allocator;
mod config;
mod memory;
mod sink;
mod store;

pub use allocator::*;
pub use config::*;
pub use memory::*;
pub use sink::*;
pub use store::*;
