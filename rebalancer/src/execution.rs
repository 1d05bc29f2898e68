//! Execution orchestrator: prepare → solve → commit → transfers → orders → write.
//!
//! This is the main workflow that ties together all components.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use cube_rebalance::{
    AggregateCurrency, Allocation, AllocationModel, AssetPosition, ClearedTarget, Method,
    OrderBatch, OrderIntent, Regime, TransferPlan, aggregate, build_positions, commit_targets,
    generate_orders, plan_transfers, sanity_check, solve_allocations,
};
use log::{info, warn};
use serde::Serialize;

use crate::audit::{self, AuditLog};
use crate::config::Config;
use crate::drift;
use crate::error::{Error, Result};
use crate::snapshot::CubeSnapshot;

/// Options for a rebalance run.
pub struct RunOptions {
    pub dry_run: bool,
    pub force: bool,
    pub snapshot_file: String,
    /// Where the committed snapshot and orders are written
    pub out: PathBuf,
}

/// Default output path: `cube.json` → `cube.plan.json`.
pub fn default_output_path(snapshot: &Path) -> PathBuf {
    snapshot.with_extension("plan.json")
}

/// Priced position table and per-currency aggregates for one snapshot.
#[derive(Debug, Clone)]
pub struct Prepared {
    pub positions: Vec<AssetPosition>,
    pub aggregates: Vec<AggregateCurrency>,
}

/// Everything a run decides, before anything is written.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Positions after commit and order generation
    pub positions: Vec<AssetPosition>,
    pub allocation: Allocation,
    /// Present for pool-wide allocations
    pub transfers: Option<TransferPlan>,
    pub batch: OrderBatch,
    /// Positions that received a target
    pub committed: usize,
    /// Orders cut by `max_orders_per_run`
    pub deferred: usize,
}

/// Sanity-check the allocations, price the balances and aggregate them.
pub fn prepare(snapshot: &CubeSnapshot) -> Result<Prepared> {
    let mut allocations = snapshot.allocations();
    let balances = snapshot.raw_balances();
    sanity_check(&mut allocations, &balances)?;

    let catalog = snapshot.catalog();
    let positions = build_positions(&balances, &allocations, &snapshot.reference(), &catalog);
    if positions.is_empty() {
        return Err(Error::Snapshot("no priced balances".into()));
    }
    let aggregates = aggregate(&positions, &allocations)?;
    Ok(Prepared {
        positions,
        aggregates,
    })
}

/// Solve the allocation for `prepared`.
pub fn solve(config: &Config, snapshot: &CubeSnapshot, prepared: &Prepared) -> Result<Allocation> {
    let allocation = solve_allocations(
        &prepared.positions,
        &prepared.aggregates,
        &snapshot.reference(),
        config.allocation.objective,
        config.allocation.use_regression,
        &config.solver_options(),
    )?;
    Ok(allocation)
}

/// Solve, commit targets on a copy of the position table, plan transfers
/// and generate orders.
pub fn plan(config: &Config, snapshot: &CubeSnapshot) -> Result<Plan> {
    let prepared = prepare(snapshot)?;
    let allocation = solve(config, snapshot, &prepared)?;

    let mut positions = prepared.positions;
    let committed = commit_targets(&mut positions, &allocation);
    let transfers = allocation
        .requires_transfer()
        .then(|| plan_transfers(&positions, &allocation.solution));

    let catalog = snapshot.catalog();
    let threshold = snapshot.threshold_pct(config.orders.threshold_pct);
    let mut batch = generate_orders(
        &mut positions,
        &snapshot.reference(),
        &catalog,
        &catalog,
        threshold,
    );
    let deferred = enforce_max_orders_per_run(&mut batch.orders, config.orders.max_orders_per_run);

    Ok(Plan {
        positions,
        allocation,
        transfers,
        batch,
        committed,
        deferred,
    })
}

/// Keep at most `max` orders. Returns how many were cut.
pub fn enforce_max_orders_per_run(orders: &mut Vec<OrderIntent>, max: usize) -> usize {
    if orders.len() <= max {
        return 0;
    }
    let cut = orders.len() - max;
    warn!("{cut} orders over the per-run limit of {max}, deferring them");
    orders.truncate(max);
    cut
}

/// The file a committed run writes.
#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub generated_at: DateTime<Utc>,
    pub regime: Regime,
    pub method: Method,
    pub snapshot: CubeSnapshot,
    pub aggregates: Vec<AggregateCurrency>,
    pub orders: Vec<OrderIntent>,
    pub cleared: Vec<ClearedTarget>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfers: Option<TransferPlan>,
    pub balanced: bool,
}

impl RunOutput {
    /// Snapshot with the plan's targets applied, plus the plan itself.
    pub fn new(snapshot: &CubeSnapshot, plan: &Plan) -> Self {
        let mut snapshot = snapshot.clone();
        snapshot.apply_targets(&plan.positions);
        Self {
            generated_at: Utc::now(),
            regime: plan.allocation.regime,
            method: plan.allocation.method,
            snapshot,
            aggregates: plan.allocation.aggregates.clone(),
            orders: plan.batch.orders.clone(),
            cleared: plan.batch.cleared.clone(),
            transfers: plan.transfers.clone(),
            balanced: plan.batch.balanced,
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| Error::OutputWrite {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).map_err(|e| Error::OutputWrite {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

/// Execute a full rebalance run.
pub fn run(config: &Config, snapshot: &CubeSnapshot, opts: &RunOptions) -> Result<()> {
    let mut audit = AuditLog::open(&config.audit_path())?;
    audit::log_run_started(&mut audit, &opts.snapshot_file, snapshot.cube_id)?;

    let plan = match plan(config, snapshot) {
        Ok(p) => p,
        Err(e) => {
            if e.is_no_solution() {
                warn!("cube {} left unbalanced: {e}", snapshot.cube_id);
                audit::log_no_solution(&mut audit, snapshot.cube_id, &e.to_string())?;
            }
            return Err(e);
        }
    };

    audit::log_allocation_solved(&mut audit, &plan.allocation)?;
    if let Some(transfers) = &plan.transfers {
        audit::log_transfers_planned(&mut audit, transfers)?;
    }
    audit::log_orders_generated(&mut audit, &plan.batch)?;

    println!(
        "Cube {} ({} reference)",
        snapshot.cube_id, snapshot.reference_currency
    );
    display_allocation(&plan.allocation);
    if let Some(transfers) = &plan.transfers {
        display_transfers(transfers);
    }
    display_orders(&plan.batch, plan.deferred);
    println!();

    if opts.dry_run {
        println!("[DRY RUN] Targets not committed.");
        return Ok(());
    }

    if !opts.force {
        let confirmed = dialoguer::Confirm::new()
            .with_prompt("Commit targets?")
            .default(false)
            .interact()
            .map_err(|e| Error::Aborted(format!("confirmation prompt failed: {e}")))?;

        if !confirmed {
            println!("Aborted.");
            audit.log("user_confirmed", serde_json::json!({"approved": false}))?;
            return Ok(());
        }

        audit.log("user_confirmed", serde_json::json!({"approved": true}))?;
    }

    RunOutput::new(snapshot, &plan).save(&opts.out)?;
    audit::log_targets_committed(&mut audit, plan.committed, &opts.out)?;

    let transfers = plan.transfers.as_ref().map_or(0, |t| t.transfers.len());
    audit::log_run_completed(&mut audit, plan.batch.orders.len(), transfers, plan.batch.balanced)?;
    info!("cube {} committed to {}", snapshot.cube_id, opts.out.display());
    println!(
        "{} orders, {transfers} transfers written to {}. Audit logged to {}",
        plan.batch.orders.len(),
        opts.out.display(),
        config.audit_path().display()
    );
    Ok(())
}

/// Solve and display the allocation without generating or writing anything.
pub fn show_solution(config: &Config, snapshot: &CubeSnapshot) -> Result<()> {
    let prepared = prepare(snapshot)?;
    let allocation = solve(config, snapshot, &prepared)?;
    display_allocation(&allocation);
    if allocation.requires_transfer() {
        display_transfers(&plan_transfers(&prepared.positions, &allocation.solution));
    }
    Ok(())
}

/// Check that the snapshot prices cleanly and which regimes are feasible.
pub fn check(snapshot: &CubeSnapshot) -> Result<()> {
    let prepared = prepare(snapshot)?;
    println!(
        "Cube {}: {} positions, {} currencies",
        snapshot.cube_id,
        prepared.positions.len(),
        prepared.aggregates.len()
    );
    for regime in [Regime::ExchangePreserving, Regime::PoolWide] {
        match AllocationModel::build(&prepared.positions, &prepared.aggregates, regime) {
            Ok(model) => println!(
                "  {regime:20} OK ({} variables, {} constraint groups)",
                model.len(),
                model.groups().len()
            ),
            Err(e) => println!("  {regime:20} {e}"),
        }
    }
    Ok(())
}

/// Print current weights against the target allocation.
pub fn show_drift(config: &Config, snapshot: &CubeSnapshot) -> Result<()> {
    let prepared = prepare(snapshot)?;
    let report = drift::drift(&prepared.aggregates);
    print!("{report}");

    let threshold = snapshot.threshold_pct(config.orders.threshold_pct);
    if report.exceeds(threshold) {
        println!("  Rebalance needed (threshold {threshold:.2}%)");
    } else {
        println!("  Within threshold ({threshold:.2}%)");
    }
    Ok(())
}

// === Helpers ===

fn display_allocation(allocation: &Allocation) {
    println!(
        "\nALLOCATION ({}, {}):",
        allocation.regime, allocation.method
    );
    println!(
        "  {:8} {:>10} {:>14} {:>14} {:>10}",
        "Currency", "Target%", "TargetValue", "SolvedValue", "Solved%"
    );
    for a in &allocation.aggregates {
        println!(
            "  {:8} {:>9.2}% {:>14.8} {:>14.8} {:>9.2}%",
            a.currency,
            a.target_pct * 100.0,
            a.target_value,
            a.solved_value.unwrap_or(0.0),
            a.solved_pct.unwrap_or(0.0) * 100.0,
        );
    }
    if let Some(r) = &allocation.report {
        println!(
            "  solver: {} after {} iterations ({:.3}s, {:?})",
            r.status, r.iterations, r.solve_time, r.attempt
        );
    }
}

fn display_transfers(plan: &TransferPlan) {
    if plan.is_empty() {
        println!("\nNo transfers needed.");
        return;
    }
    println!("\nTRANSFERS:");
    for t in &plan.transfers {
        println!(
            "  {:12} -> {:12} {:>14.8}",
            t.source.as_str(),
            t.destination.as_str(),
            t.amount
        );
    }
    for leg in &plan.sells {
        println!(
            "  sell {:>14.8} {:6} on {}",
            leg.balance, leg.currency, leg.exchange
        );
    }
    for leg in &plan.buys {
        println!(
            "  buy  {:>14.8} {:6} on {}",
            leg.balance, leg.currency, leg.exchange
        );
    }
}

fn display_orders(batch: &OrderBatch, deferred: usize) {
    if batch.orders.is_empty() {
        println!("\nNo orders needed.");
    } else {
        println!("\nORDERS:");
        println!(
            "  {:>3}  {:6} {:>6} {:>18} {:>18}",
            "#", "Side", "Pair", "Amount", "Price"
        );
        for (i, o) in batch.orders.iter().enumerate() {
            println!(
                "  {:>3}  {:6} {:>6} {:>18} {:>18}",
                i + 1,
                o.side.to_string(),
                o.pair.to_string(),
                o.amount,
                o.price
            );
        }
    }
    if deferred > 0 {
        println!("  ({deferred} more deferred to the next run)");
    }
    if batch.balanced {
        println!("  Cube balanced.");
    }
}
