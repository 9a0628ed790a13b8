mod builder;
mod generator;

pub use builder::*;
pub use generator::*;
