//! Drift report: current currency weights against the target allocation.

use cube_rebalance::AggregateCurrency;
use serde::Serialize;

/// Current vs target weights for one cube.
#[derive(Debug, Clone, Serialize)]
pub struct DriftReport {
    pub entries: Vec<DriftEntry>,
    /// Root-mean-square weight deviation, in percent
    pub tracking_error_pct: f64,
    /// Largest absolute weight deviation, in percent
    pub max_drift_pct: f64,
}

/// One currency's drift entry.
#[derive(Debug, Clone, Serialize)]
pub struct DriftEntry {
    pub currency: String,
    pub target_weight: f64,
    pub actual_weight: f64,
    pub diff_weight: f64,
    pub target_value: f64,
    pub actual_value: f64,
}

/// Compare aggregated holdings against their target weights.
pub fn drift(aggregates: &[AggregateCurrency]) -> DriftReport {
    let total: f64 = aggregates.iter().map(|a| a.value).sum();
    let mut entries = Vec::with_capacity(aggregates.len());
    let mut sum_sq_diff = 0.0_f64;
    let mut max_drift = 0.0_f64;

    for a in aggregates {
        let actual_weight = if total > 0.0 { a.value / total } else { 0.0 };
        let diff_weight = actual_weight - a.target_pct;
        sum_sq_diff += diff_weight * diff_weight;
        max_drift = max_drift.max(diff_weight.abs());

        entries.push(DriftEntry {
            currency: a.currency.to_string(),
            target_weight: a.target_pct,
            actual_weight,
            diff_weight,
            target_value: a.target_value,
            actual_value: a.value,
        });
    }

    let tracking_error_pct = (sum_sq_diff / entries.len().max(1) as f64).sqrt() * 100.0;
    DriftReport {
        entries,
        tracking_error_pct,
        max_drift_pct: max_drift * 100.0,
    }
}

impl DriftReport {
    /// Some currency deviates by at least `threshold_pct` percent.
    pub fn exceeds(&self, threshold_pct: f64) -> bool {
        self.max_drift_pct >= threshold_pct
    }
}

impl std::fmt::Display for DriftReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "DRIFT:")?;
        writeln!(
            f,
            "  {:8} {:>10} {:>10} {:>10} {:>14} {:>14}",
            "Currency", "Target%", "Actual%", "Diff%", "TargetValue", "ActualValue"
        )?;
        for e in &self.entries {
            writeln!(
                f,
                "  {:8} {:>9.2}% {:>9.2}% {:>+9.2}% {:>14.8} {:>14.8}",
                e.currency,
                e.target_weight * 100.0,
                e.actual_weight * 100.0,
                e.diff_weight * 100.0,
                e.target_value,
                e.actual_value,
            )?;
        }
        writeln!(
            f,
            "\n  Tracking error: {:.3}%  (max drift {:.3}%)",
            self.tracking_error_pct, self.max_drift_pct
        )?;
        Ok(())
    }
}
