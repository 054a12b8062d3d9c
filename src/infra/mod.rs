//! Concrete implementations of the pool's injected contracts.

pub mod local_group;

pub use local_group::{LocalGroup, LocalGroupFactory};
