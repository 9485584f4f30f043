//! Per-node power sampling: read every physical source feeding a node, sum
//! them per second, align onto a dense grid and forward to a sink.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod grid;
pub mod metadata;
pub mod model;
pub mod observe;
pub mod scheduler;
pub mod sink;
pub mod source;

#[cfg(test)]
mod test_support;
