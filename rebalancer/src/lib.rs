//! cube-rebalancer: command-line driver for the cube allocation solver.
//!
//! Reads a cube snapshot (balances, target allocations, trading pairs) from
//! JSON, solves the allocation, plans transfers and orders, and writes the
//! result back with a JSONL audit trail.

pub mod audit;
pub mod config;
pub mod drift;
pub mod error;
pub mod execution;
pub mod snapshot;
