//! Solver settings, loadable from a TOML file.

use crate::inner::InnerSettings;
use crate::types::Float;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read the settings file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML settings: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

/// Settings of a regularization path computation.
///
/// Every field has a default, so a settings file only needs to list what it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Ratio between the last and the first penalty of the generated grid.
    pub eps: f64,
    pub n_alphas: usize,
    /// Explicit penalty values; they replace the generated grid.
    pub alphas: Option<Vec<f64>>,
    /// Maximum number of outer (working-set) iterations per penalty value.
    pub max_iter: usize,
    /// Maximum number of epochs of each inner solve.
    pub max_epochs: usize,
    /// Epochs between two inner duality gap checks.
    pub gap_freq: usize,
    /// Size of the first working set.
    pub p0: usize,
    pub tol: f64,
    pub prune: bool,
    pub use_accel: bool,
    /// Number of state differences used by Anderson extrapolation.
    pub anderson_depth: usize,
    pub tol_ratio_inner: f64,
    /// Constrain lasso coefficients to be non-negative.
    pub positive: bool,
    /// Use the prox-Newton inner solver (logistic regression only).
    pub use_newton: bool,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            eps: 1e-3,
            n_alphas: 100,
            alphas: None,
            max_iter: 20,
            max_epochs: 50_000,
            gap_freq: 10,
            p0: 10,
            tol: 1e-6,
            prune: false,
            use_accel: true,
            anderson_depth: 6,
            tol_ratio_inner: 0.3,
            positive: false,
            use_newton: false,
        }
    }
}

impl SolverConfig {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: SolverConfig = toml::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &'static str, reason: &str| {
            Err(ConfigError::InvalidValue {
                field,
                reason: reason.to_string(),
            })
        };
        if !(self.eps > 0.0 && self.eps <= 1.0) {
            return invalid("eps", "must lie in (0, 1]");
        }
        if self.n_alphas == 0 {
            return invalid("n_alphas", "must be at least 1");
        }
        if self.eps == 1.0 && self.n_alphas > 1 {
            return invalid("eps", "must be below 1 when n_alphas > 1");
        }
        if self.max_iter == 0 {
            return invalid("max_iter", "must be at least 1");
        }
        if self.gap_freq == 0 {
            return invalid("gap_freq", "must be at least 1");
        }
        if self.anderson_depth < 2 {
            return invalid("anderson_depth", "must be at least 2");
        }
        if !(self.tol > 0.0 && self.tol.is_finite()) {
            return invalid("tol", "must be strictly positive");
        }
        if !(self.tol_ratio_inner > 0.0 && self.tol_ratio_inner < 1.0) {
            return invalid("tol_ratio_inner", "must lie in (0, 1)");
        }
        if let Some(alphas) = &self.alphas {
            if alphas.is_empty() {
                return invalid("alphas", "must not be empty when given");
            }
        }
        Ok(())
    }

    /// Inner-solver settings for a first working set of size `p0`.
    pub fn inner_settings<F: Float>(&self, p0: usize) -> InnerSettings<F> {
        InnerSettings {
            tol: F::cast(self.tol),
            max_iter: self.max_iter,
            max_epochs: self.max_epochs,
            gap_freq: self.gap_freq,
            p0,
            prune: self.prune || self.use_newton,
            use_accel: self.use_accel,
            anderson_depth: self.anderson_depth,
            tol_ratio_inner: F::cast(self.tol_ratio_inner),
        }
    }
}
