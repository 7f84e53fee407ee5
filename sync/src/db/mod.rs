//! Database module for SQLite replicas.

pub mod metadata;
mod pool;
mod replica;

pub use pool::*;
pub use replica::*;
