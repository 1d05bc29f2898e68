//! Error types for the rebalancer.

use std::path::PathBuf;

/// All errors that can occur during a rebalancer run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("snapshot error: {0}")]
    Snapshot(String),

    #[error("failed to read snapshot {path}: {source}")]
    SnapshotRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {path}: {source}")]
    OutputWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("snapshot JSON error: {0}")]
    SnapshotJson(#[from] serde_json::Error),

    #[error(transparent)]
    Core(#[from] cube_rebalance::Error),

    #[error("execution aborted: {0}")]
    Aborted(String),

    #[error("audit log error: {0}")]
    Audit(#[from] std::io::Error),
}

impl Error {
    /// The cube could not be allocated; it stays flagged for the next run.
    pub fn is_no_solution(&self) -> bool {
        matches!(
            self,
            Error::Core(cube_rebalance::Error::NoSolution | cube_rebalance::Error::Infeasible(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_solution_classification() {
        assert!(Error::from(cube_rebalance::Error::NoSolution).is_no_solution());
        assert!(Error::from(cube_rebalance::Error::Infeasible("x".into())).is_no_solution());
        assert!(!Error::from(cube_rebalance::Error::Solver("x".into())).is_no_solution());
        assert!(!Error::Aborted("no".into()).is_no_solution());
    }
}
