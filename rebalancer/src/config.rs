//! TOML configuration loading and validation.

use std::path::Path;

use cube_rebalance::{ObjectiveMode, SolverOptions, UseRegression};
use serde::Deserialize;

use crate::error::{Error, Result};

/// Top-level configuration. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub solver: SolverConfig,
    #[serde(default)]
    pub allocation: AllocationConfig,
    #[serde(default)]
    pub orders: OrdersConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SolverConfig {
    #[serde(default = "default_time_limit")]
    pub time_limit_secs: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_tolerance")]
    pub tol_feas: f64,
    #[serde(default = "default_tolerance")]
    pub tol_gap_abs: f64,
    #[serde(default = "default_tolerance")]
    pub tol_gap_rel: f64,
    #[serde(default)]
    pub verbose: bool,
}

fn default_time_limit() -> f64 {
    90.0
}
fn default_max_iterations() -> u32 {
    20_000
}
fn default_tolerance() -> f64 {
    1e-8
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            time_limit_secs: default_time_limit(),
            max_iterations: default_max_iterations(),
            tol_feas: default_tolerance(),
            tol_gap_abs: default_tolerance(),
            tol_gap_rel: default_tolerance(),
            verbose: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AllocationConfig {
    #[serde(default)]
    pub use_regression: UseRegression,
    #[serde(default)]
    pub objective: ObjectiveMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrdersConfig {
    /// Minimum deviation, in percent of the position value, worth trading
    #[serde(default = "default_threshold")]
    pub threshold_pct: f64,
    #[serde(default = "default_max_orders")]
    pub max_orders_per_run: usize,
}

fn default_threshold() -> f64 {
    1.0
}
fn default_max_orders() -> usize {
    50
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            threshold_pct: default_threshold(),
            max_orders_per_run: default_max_orders(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_audit_file")]
    pub audit_file: String,
}

fn default_log_dir() -> String {
    "./logs".into()
}
fn default_audit_file() -> String {
    "audit.jsonl".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: default_log_dir(),
            audit_file: default_audit_file(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and validate a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate config invariants.
    fn validate(&self) -> Result<()> {
        let s = &self.solver;
        if !(s.time_limit_secs.is_finite() && s.time_limit_secs > 0.0) {
            return Err(Error::Config("time_limit_secs must be > 0".into()));
        }
        if s.max_iterations == 0 {
            return Err(Error::Config("max_iterations must be > 0".into()));
        }
        for (name, tol) in [
            ("tol_feas", s.tol_feas),
            ("tol_gap_abs", s.tol_gap_abs),
            ("tol_gap_rel", s.tol_gap_rel),
        ] {
            if !(tol.is_finite() && tol > 0.0) {
                return Err(Error::Config(format!("{name} must be > 0")));
            }
        }
        if !(self.orders.threshold_pct.is_finite() && self.orders.threshold_pct >= 0.0) {
            return Err(Error::Config("threshold_pct must be >= 0".into()));
        }
        if self.orders.max_orders_per_run == 0 {
            return Err(Error::Config("max_orders_per_run must be > 0".into()));
        }
        if self.logging.audit_file.is_empty() {
            return Err(Error::Config("audit_file must not be empty".into()));
        }
        Ok(())
    }

    /// Solver options for the allocation engine.
    pub fn solver_options(&self) -> SolverOptions {
        SolverOptions {
            time_limit_secs: self.solver.time_limit_secs,
            max_iterations: self.solver.max_iterations,
            tol_feas: self.solver.tol_feas,
            tol_gap_abs: self.solver.tol_gap_abs,
            tol_gap_rel: self.solver.tol_gap_rel,
            verbose: self.solver.verbose,
        }
    }

    /// Full path to the audit log file.
    pub fn audit_path(&self) -> std::path::PathBuf {
        Path::new(&self.logging.dir).join(&self.logging.audit_file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example_toml() -> &'static str {
        r#"
[solver]
time_limit_secs = 30.0
max_iterations = 500
tol_feas = 1e-7
verbose = true

[allocation]
use_regression = "force"
objective = "pool_wide"

[orders]
threshold_pct = 2.5
max_orders_per_run = 20

[logging]
dir = "./logs"
audit_file = "audit.jsonl"
"#
    }

    #[test]
    fn parse_example_config() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(config.solver.time_limit_secs, 30.0);
        assert_eq!(config.solver.max_iterations, 500);
        assert_eq!(config.solver.tol_feas, 1e-7);
        assert_eq!(config.solver.tol_gap_abs, 1e-8);
        assert!(config.solver.verbose);
        assert_eq!(config.allocation.use_regression, UseRegression::Force);
        assert_eq!(config.allocation.objective, ObjectiveMode::PoolWide);
        assert_eq!(config.orders.threshold_pct, 2.5);
        assert_eq!(config.orders.max_orders_per_run, 20);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.solver.time_limit_secs, 90.0);
        assert_eq!(config.solver.max_iterations, 20_000);
        assert_eq!(config.allocation.use_regression, UseRegression::Fallback);
        assert_eq!(config.allocation.objective, ObjectiveMode::ExchangePreserving);
        assert_eq!(config.orders.threshold_pct, 1.0);
        assert_eq!(config.solver_options(), SolverOptions::default());
    }

    #[test]
    fn validate_catches_bad_solver_budget() {
        let mut config = Config::default();
        config.solver.time_limit_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.solver.max_iterations = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.solver.tol_gap_rel = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_catches_bad_orders() {
        let mut config = Config::default();
        config.orders.threshold_pct = -1.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.orders.max_orders_per_run = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_policy() {
        let toml = "[allocation]\nuse_regression = \"sometimes\"\n";
        assert!(matches!(Config::from_toml(toml), Err(Error::ConfigParse(_))));
    }

    #[test]
    fn audit_path() {
        let config = Config::from_toml(example_toml()).unwrap();
        assert_eq!(
            config.audit_path(),
            std::path::PathBuf::from("./logs/audit.jsonl")
        );
    }
}
