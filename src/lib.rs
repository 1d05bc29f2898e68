//! # cube-rebalance
//!
//! Allocation solver and order generator for multi-exchange crypto portfolios
//! ("cubes").
//!
//! A cube holds balances of several currencies spread over several exchanges.
//! Given a target percentage per currency, this crate decides how much value
//! each (currency, exchange) position should hold and turns that decision
//! into limit orders.
//!
//! ## Pipeline
//!
//! 1. [`prepare`]: validate the allocation table, price balances in the
//!    reference currency and aggregate them per currency.
//! 2. [`allocate`]: solve the allocation model exactly with an interior-point
//!    solver, fall back to a non-negative least-squares regression, and
//!    escalate from exchange-preserving to pool-wide when nothing verifies.
//! 3. [`transfer`]: for pool-wide allocations, plan the inter-exchange
//!    transfers that move value where the solution needs it.
//! 4. [`orders`]: generate exchange-ready orders, netting secondary pairs
//!    before trading the rest against the reference currency.
//!
//! ## Quick Start
//!
//! ```
//! use cube_rebalance::{
//!     Allocations, AssetPosition, ObjectiveMode, SolverOptions, UseRegression, aggregate,
//!     solve_allocations,
//! };
//!
//! let positions = vec![
//!     AssetPosition::new("BTC".into(), "Kraken".into(), 0.6, 1.0),
//!     AssetPosition::new("ETH".into(), "Kraken".into(), 8.0, 0.05),
//! ];
//! let mut allocations = Allocations::default();
//! allocations.insert("BTC".into(), 0.5);
//! allocations.insert("ETH".into(), 0.5);
//!
//! let aggregates = aggregate(&positions, &allocations).unwrap();
//! let allocation = solve_allocations(
//!     &positions,
//!     &aggregates,
//!     &"BTC".into(),
//!     ObjectiveMode::ExchangePreserving,
//!     UseRegression::Fallback,
//!     &SolverOptions::default(),
//! )
//! .unwrap();
//!
//! let btc = allocation.solution.value(&"BTC".into(), &"Kraken".into()).unwrap();
//! assert!((btc - 0.5).abs() < 1e-3);
//! ```
//!
//! ## Features
//!
//! - `serde`: `Serialize`/`Deserialize` on the public data types
//! - `parallel`: [`solve_many`] solves independent cubes on a rayon pool

pub mod allocate;
pub mod catalog;
mod error;
pub mod exact;
pub mod model;
pub mod nnls;
pub mod orders;
pub mod position;
pub mod prepare;
pub mod regression;
mod side;
pub mod solution;
pub mod transfer;
mod types;

// Re-export public API
pub use allocate::{
    Allocation, Method, ObjectiveMode, UseRegression, commit_targets, solve_allocations,
};
#[cfg(feature = "parallel")]
pub use allocate::{CubeInput, solve_many};
pub use catalog::{
    ConstraintLookup, NoConstraints, PairCatalog, PairListing, StaticCatalog, TradeConstraints,
    TradingPair,
};
pub use error::{Error, Result};
pub use exact::{Attempt, SolverOptions, SolverReport};
pub use model::{AllocationModel, Regime};
pub use orders::{ClearReason, ClearedTarget, OrderBatch, OrderIntent, generate_orders};
pub use position::{AggregateCurrency, AssetPosition};
pub use prepare::{Allocations, RawBalance, aggregate, build_positions, sanity_check};
pub use side::Side;
pub use solution::{Solution, verify_solution};
pub use transfer::{Transfer, TransferLeg, TransferPlan, plan_transfers};
pub use types::{
    ABS_TOL, Asset, CURRENCY_RTOL, DUST_AMOUNT, ExchangeId, NON_TRADEABLE_VENUES, PairId,
    PositionKey, currency_tolerance,
};
