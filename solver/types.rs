//! Shared scalar bound, problem names and the top-level error type.
//!
//! Every numerical routine in the crate is generic over [`Float`], which is
//! implemented for `f32` and `f64`. A single call never mixes precisions: the
//! design matrix, targets, coefficients and dual points all share one `F`.

use crate::config::ConfigError;
use crate::design::DesignError;
use crate::partition::PartitionError;
use ndarray::ScalarOperand;
use num_traits::{FromPrimitive, NumAssignOps, NumCast, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;
use thiserror::Error;

/// Floating point scalar accepted by the solvers.
pub trait Float:
    num_traits::Float
    + FromPrimitive
    + NumAssignOps
    + ScalarOperand
    + Sum
    + fmt::Debug
    + fmt::Display
    + fmt::LowerExp
    + Default
    + Send
    + Sync
    + 'static
{
    /// Lossy numeric conversion. Values that cannot be represented become NaN.
    fn cast<T: ToPrimitive>(x: T) -> Self {
        <Self as NumCast>::from(x).unwrap_or_else(Self::nan)
    }

    fn as_f64(self) -> f64 {
        self.to_f64().unwrap_or(f64::NAN)
    }
}

impl Float for f32 {}

impl Float for f64 {}

/// The sparse models the path driver knows how to solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProblemKind {
    /// Least squares with an L1 penalty.
    Lasso,
    /// Logistic loss on {-1, +1} labels with an L1 penalty.
    #[serde(alias = "logreg")]
    Logistic,
    /// Least squares with a sum of group L2 norms.
    #[serde(alias = "group_lasso")]
    GroupLasso,
    /// Matrix-valued least squares with a row-wise L2,1 penalty.
    #[serde(alias = "mtl")]
    MultiTaskLasso,
}

impl fmt::Display for ProblemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProblemKind::Lasso => "lasso",
            ProblemKind::Logistic => "logreg",
            ProblemKind::GroupLasso => "grouplasso",
            ProblemKind::MultiTaskLasso => "multitasklasso",
        };
        f.write_str(name)
    }
}

impl FromStr for ProblemKind {
    type Err = SolverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lasso" => Ok(ProblemKind::Lasso),
            "logreg" | "logistic" => Ok(ProblemKind::Logistic),
            "grouplasso" | "group_lasso" => Ok(ProblemKind::GroupLasso),
            "multitasklasso" | "multitask" | "mtl" => Ok(ProblemKind::MultiTaskLasso),
            other => Err(SolverError::UnsupportedProblem(other.to_string())),
        }
    }
}

/// Fatal errors raised before (or instead of) solving.
///
/// Non-convergence is deliberately absent: it is reported through
/// [`crate::path::ConvergenceWarning`] alongside the computed path.
#[derive(Error, Debug)]
pub enum SolverError {
    #[error("Unsupported problem '{0}'. Expected one of: lasso, logreg, grouplasso, multitasklasso.")]
    UnsupportedProblem(String),

    #[error("Groups must be specified for the group lasso problem.")]
    MissingGroups,

    #[error("Logistic regression labels must contain only -1 or 1 values. Got: {found:?}")]
    InvalidLabels { found: Vec<String> },

    #[error("The positivity constraint is only supported for the lasso, not for {0}.")]
    PositiveUnsupported(ProblemKind),

    #[error("The prox-Newton solver is only available for logistic regression, not for {0}.")]
    NewtonUnsupported(ProblemKind),

    #[error("{0} needs matrix-valued targets; use the multitask path entry point.")]
    MultiTaskRequiresMatrixTargets(ProblemKind),

    #[error("Dimension mismatch for {what}: expected {expected}, found {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Penalty values must be finite and strictly positive, got {0}.")]
    InvalidAlpha(f64),

    #[error("Invalid group partition: {0}")]
    Partition(#[from] PartitionError),

    #[error("Invalid design matrix: {0}")]
    Design(#[from] DesignError),

    #[error("Invalid solver configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Dense eigendecomposition of a group Gram matrix failed: {0}")]
    Linalg(#[from] ndarray_linalg::error::LinalgError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_names_parse_case_insensitively() {
        assert_eq!("Lasso".parse::<ProblemKind>().unwrap(), ProblemKind::Lasso);
        assert_eq!("LOGREG".parse::<ProblemKind>().unwrap(), ProblemKind::Logistic);
        assert_eq!(
            "GroupLasso".parse::<ProblemKind>().unwrap(),
            ProblemKind::GroupLasso
        );
        assert_eq!(
            "multitasklasso".parse::<ProblemKind>().unwrap(),
            ProblemKind::MultiTaskLasso
        );
    }

    #[test]
    fn unknown_problem_is_rejected() {
        match "ridge".parse::<ProblemKind>() {
            Err(SolverError::UnsupportedProblem(name)) => assert_eq!(name, "ridge"),
            other => panic!("Expected UnsupportedProblem, got {:?}", other),
        }
    }

    #[test]
    fn cast_round_trips_through_both_precisions() {
        let x: f32 = Float::cast(0.25_f64);
        assert_eq!(x, 0.25_f32);
        assert_eq!(Float::as_f64(x), 0.25);
        let y: f64 = Float::cast(3_usize);
        assert_eq!(y, 3.0);
    }
}
