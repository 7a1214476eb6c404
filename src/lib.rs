//! Dependency-graph test scheduling.
//!
//! Test units declare method and group dependencies; the runner builds a
//! graph from them, brackets execution with configuration methods and drains
//! the graph sequentially or on a bounded thread pool.

pub mod cli;
pub mod emit;
pub mod graph;
pub mod manifest;
pub mod plan;
pub mod runner;
pub mod unit;
