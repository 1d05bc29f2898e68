//! JSONL audit trail logging.
//!
//! Each rebalancer run appends events to an audit.jsonl file,
//! one JSON object per line.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use cube_rebalance::{Allocation, OrderBatch, TransferPlan};
use serde::Serialize;

use crate::error::Result;

/// An audit event written to the JSONL trail.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event: &'static str,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub data: serde_json::Value,
}

/// Append-only audit logger.
pub struct AuditLog {
    writer: BufWriter<std::fs::File>,
}

impl AuditLog {
    /// Open (or create) the audit log file for appending.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            writer: BufWriter::new(file),
        })
    }

    /// Log an event with arbitrary JSON data.
    pub fn log(&mut self, event: &'static str, data: serde_json::Value) -> Result<()> {
        let entry = AuditEvent {
            event,
            ts: Utc::now(),
            data,
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(self.writer, "{json}")?;
        self.writer.flush()?;
        Ok(())
    }
}

pub fn log_run_started(audit: &mut AuditLog, snapshot_file: &str, cube_id: u64) -> Result<()> {
    audit.log(
        "run_started",
        serde_json::json!({
            "snapshot_file": snapshot_file,
            "cube": cube_id,
        }),
    )
}

pub fn log_allocation_solved(audit: &mut AuditLog, allocation: &Allocation) -> Result<()> {
    let currencies: Vec<_> = allocation
        .aggregates
        .iter()
        .map(|a| {
            serde_json::json!({
                "currency": a.currency.as_str(),
                "target_pct": a.target_pct,
                "target_value": a.target_value,
                "solved_value": a.solved_value,
                "solved_pct": a.solved_pct,
            })
        })
        .collect();

    audit.log(
        "allocation_solved",
        serde_json::json!({
            "regime": allocation.regime.to_string(),
            "method": allocation.method.to_string(),
            "positions": allocation.solution.len(),
            "currencies": currencies,
            "solver": allocation.report.as_ref().map(|r| serde_json::json!({
                "status": r.status,
                "iterations": r.iterations,
                "solve_time": r.solve_time,
                "objective": r.objective,
            })),
        }),
    )
}

pub fn log_no_solution(audit: &mut AuditLog, cube_id: u64, reason: &str) -> Result<()> {
    audit.log(
        "no_solution",
        serde_json::json!({
            "cube": cube_id,
            "reason": reason,
        }),
    )
}

pub fn log_transfers_planned(audit: &mut AuditLog, plan: &TransferPlan) -> Result<()> {
    let transfers: Vec<_> = plan
        .transfers
        .iter()
        .map(|t| {
            serde_json::json!({
                "source": t.source.as_str(),
                "destination": t.destination.as_str(),
                "amount": t.amount,
            })
        })
        .collect();

    audit.log(
        "transfers_planned",
        serde_json::json!({
            "transfers": transfers,
            "total": plan.total(),
            "sell_legs": plan.sells.len(),
            "buy_legs": plan.buys.len(),
        }),
    )
}

pub fn log_orders_generated(audit: &mut AuditLog, batch: &OrderBatch) -> Result<()> {
    let orders: Vec<_> = batch
        .orders
        .iter()
        .map(|o| {
            serde_json::json!({
                "pair": o.pair.0,
                "side": o.side.to_string(),
                "amount": o.amount.to_string(),
                "price": o.price.to_string(),
            })
        })
        .collect();

    audit.log(
        "orders_generated",
        serde_json::json!({
            "orders": orders,
            "cleared": batch.cleared.len(),
            "balanced": batch.balanced,
        }),
    )
}

pub fn log_targets_committed(audit: &mut AuditLog, committed: usize, output: &Path) -> Result<()> {
    audit.log(
        "targets_committed",
        serde_json::json!({
            "positions": committed,
            "output": output.display().to_string(),
        }),
    )
}

pub fn log_run_completed(
    audit: &mut AuditLog,
    orders: usize,
    transfers: usize,
    balanced: bool,
) -> Result<()> {
    audit.log(
        "run_completed",
        serde_json::json!({
            "orders": orders,
            "transfers": transfers,
            "balanced": balanced,
        }),
    )
}
