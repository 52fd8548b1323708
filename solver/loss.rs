//! # Loss Model
//!
//! The four supported problems form a closed set of variants. Each one knows
//! its primal objective, how to turn the maintained working state into a raw
//! dual direction, its dual objective and the radius of the safe region that
//! follows from a duality gap.
//!
//! The working state is the vector the coordinate-descent updates keep in sync
//! with the coefficients:
//!
//! - quadratic losses keep the residual `R = y - X̃w`, flattened task-major for
//!   the multitask variant (task `t` occupies `[t·n, (t+1)·n)`);
//! - the logistic loss keeps the margin `X̃w`.
//!
//! Coefficients are organised in *blocks*: one feature for the lasso and the
//! logistic loss, one group for the group lasso and one row of `W` (all tasks
//! of one feature) for the multitask lasso. Multitask coefficients are stored
//! feature-major, `W[j, t]` at `j·T + t`.

use crate::design::Design;
use crate::partition::{GroupSpec, Partition};
use crate::types::{Float, ProblemKind, SolverError};
use itertools::Either;
use ndarray::{Array1, ArrayView1, Zip};

/// A problem variant together with the structure it needs.
#[derive(Debug, Clone)]
pub enum Problem {
    Lasso { positive: bool },
    Logistic,
    GroupLasso { partition: Partition },
    MultiTaskLasso { n_tasks: usize },
}

impl Problem {
    /// Builds and validates a problem description.
    pub fn new(
        kind: ProblemKind,
        groups: Option<&GroupSpec>,
        n_features: usize,
        n_tasks: usize,
        positive: bool,
    ) -> Result<Self, SolverError> {
        if positive && kind != ProblemKind::Lasso {
            return Err(SolverError::PositiveUnsupported(kind));
        }
        if n_tasks != 1 && kind != ProblemKind::MultiTaskLasso {
            return Err(SolverError::DimensionMismatch {
                what: "number of tasks",
                expected: 1,
                found: n_tasks,
            });
        }
        let problem = match kind {
            ProblemKind::Lasso => Problem::Lasso { positive },
            ProblemKind::Logistic => Problem::Logistic,
            ProblemKind::GroupLasso => {
                let spec = groups.ok_or(SolverError::MissingGroups)?;
                Problem::GroupLasso {
                    partition: Partition::from_spec(spec, n_features)?,
                }
            }
            ProblemKind::MultiTaskLasso => {
                if n_tasks == 0 {
                    return Err(SolverError::DimensionMismatch {
                        what: "number of tasks",
                        expected: 1,
                        found: 0,
                    });
                }
                Problem::MultiTaskLasso { n_tasks }
            }
        };
        Ok(problem)
    }

    pub fn kind(&self) -> ProblemKind {
        match self {
            Problem::Lasso { .. } => ProblemKind::Lasso,
            Problem::Logistic => ProblemKind::Logistic,
            Problem::GroupLasso { .. } => ProblemKind::GroupLasso,
            Problem::MultiTaskLasso { .. } => ProblemKind::MultiTaskLasso,
        }
    }

    pub fn n_tasks(&self) -> usize {
        match self {
            Problem::MultiTaskLasso { n_tasks } => *n_tasks,
            _ => 1,
        }
    }

    pub fn is_positive(&self) -> bool {
        matches!(self, Problem::Lasso { positive: true })
    }

    pub fn is_quadratic(&self) -> bool {
        !matches!(self, Problem::Logistic)
    }

    pub fn n_blocks(&self, n_features: usize) -> usize {
        match self {
            Problem::GroupLasso { partition } => partition.n_groups(),
            _ => n_features,
        }
    }

    /// Length of the flattened coefficient vector.
    pub fn n_coefs(&self, n_features: usize) -> usize {
        n_features * self.n_tasks()
    }

    /// Design columns touched by block `b`.
    #[inline]
    pub fn block_columns(&self, b: usize) -> impl Iterator<Item = usize> + '_ {
        match self {
            Problem::GroupLasso { partition } => Either::Left(partition.group(b).iter().copied()),
            _ => Either::Right(b..b + 1),
        }
    }

    /// Positions of block `b` in the flattened coefficient vector.
    #[inline]
    pub fn block_coefs(&self, b: usize) -> impl Iterator<Item = usize> + '_ {
        match self {
            Problem::GroupLasso { partition } => Either::Left(partition.group(b).iter().copied()),
            Problem::MultiTaskLasso { n_tasks } => Either::Right(b * n_tasks..(b + 1) * n_tasks),
            _ => Either::Right(b..b + 1),
        }
    }

    /// Penalty contribution of one block: `|w_j|` or the block's L2 norm.
    #[inline]
    pub fn block_activity<F: Float>(&self, b: usize, coefs: ArrayView1<F>) -> F {
        match self {
            Problem::Lasso { .. } | Problem::Logistic => coefs[b].abs(),
            _ => self
                .block_coefs(b)
                .map(|k| coefs[k] * coefs[k])
                .sum::<F>()
                .sqrt(),
        }
    }

    /// `Ω(w)`
    pub fn penalty<F: Float>(&self, coefs: ArrayView1<F>, n_features: usize) -> F {
        (0..self.n_blocks(n_features))
            .map(|b| self.block_activity(b, coefs))
            .sum()
    }

    /// Number of blocks with at least one non-zero coefficient.
    pub fn count_nonzero_blocks<F: Float>(&self, coefs: ArrayView1<F>, n_features: usize) -> usize {
        (0..self.n_blocks(n_features))
            .filter(|&b| self.block_activity(b, coefs) != F::zero())
            .count()
    }

    /// Checks the flattened targets against the problem.
    ///
    /// The logistic loss needs labels in `{-1, +1}`; anything else is rejected
    /// before solving starts.
    pub fn validate_targets<F: Float>(
        &self,
        y: ArrayView1<F>,
        n_samples: usize,
    ) -> Result<(), SolverError> {
        let expected = n_samples * self.n_tasks();
        if y.len() != expected {
            return Err(SolverError::DimensionMismatch {
                what: "target length",
                expected,
                found: y.len(),
            });
        }
        if let Problem::Logistic = self {
            let mut found: Vec<String> = Vec::new();
            for &label in y.iter() {
                if label != F::one() && label != -F::one() {
                    let text = label.to_string();
                    if !found.contains(&text) {
                        found.push(text);
                    }
                }
            }
            if !found.is_empty() {
                return Err(SolverError::InvalidLabels { found });
            }
        }
        Ok(())
    }

    /// Working state for the coefficients `coefs`: the residual for quadratic
    /// losses, the margin for the logistic loss.
    pub fn initial_state<F: Float>(
        &self,
        design: &Design<F>,
        y: ArrayView1<F>,
        coefs: ArrayView1<F>,
    ) -> Array1<F> {
        let n = design.n_samples();
        match self {
            Problem::Logistic => design.dot(coefs),
            Problem::MultiTaskLasso { n_tasks } => {
                let mut state = y.to_owned();
                for j in 0..design.n_features() {
                    for t in 0..*n_tasks {
                        let w = coefs[j * n_tasks + t];
                        if w != F::zero() {
                            let slice = state.slice_mut(ndarray::s![t * n..(t + 1) * n]);
                            design.column_axpy(j, -w, slice);
                        }
                    }
                }
                state
            }
            _ => &y - &design.dot(coefs),
        }
    }

    /// Raw dual direction before rescaling into the feasible set.
    ///
    /// Quadratic losses give `R / (αn)`, the logistic loss `y ⊙ σ(-y ⊙ X̃w) / α`.
    pub fn dual_direction<F: Float>(
        &self,
        state: ArrayView1<F>,
        y: ArrayView1<F>,
        alpha: F,
        n_samples: usize,
    ) -> Array1<F> {
        match self {
            Problem::Logistic => Zip::from(&y)
                .and(&state)
                .map_collect(|&label, &margin| label * sigmoid(-label * margin) / alpha),
            _ => {
                let denom = alpha * F::cast(n_samples);
                state.mapv(|r| r / denom)
            }
        }
    }

    /// Primal objective at `coefs`, given the matching working state.
    pub fn primal<F: Float>(
        &self,
        state: ArrayView1<F>,
        y: ArrayView1<F>,
        coefs: ArrayView1<F>,
        alpha: F,
        n_samples: usize,
        n_features: usize,
    ) -> F {
        let penalty = alpha * self.penalty(coefs, n_features);
        match self {
            Problem::Logistic => {
                let loss: F = y
                    .iter()
                    .zip(state.iter())
                    .map(|(&label, &margin)| log1p_exp(-label * margin))
                    .sum();
                loss + penalty
            }
            _ => {
                let sq: F = state.iter().map(|&r| r * r).sum();
                sq / (F::cast(2.0) * F::cast(n_samples)) + penalty
            }
        }
    }

    /// Dual objective at a feasible dual point.
    pub fn dual<F: Float>(
        &self,
        theta: ArrayView1<F>,
        y: ArrayView1<F>,
        alpha: F,
        n_samples: usize,
    ) -> F {
        match self {
            Problem::Logistic => {
                let entropy: F = y
                    .iter()
                    .zip(theta.iter())
                    .map(|(&label, &t)| {
                        let u = (alpha * label * t).max(F::zero()).min(F::one());
                        xlogx(u) + xlogx(F::one() - u)
                    })
                    .sum();
                -entropy
            }
            _ => {
                let scale = alpha * F::cast(n_samples);
                let (y_sq, dist_sq) = y.iter().zip(theta.iter()).fold(
                    (F::zero(), F::zero()),
                    |(y_sq, dist_sq), (&yi, &t)| {
                        let diff = yi - scale * t;
                        (y_sq + yi * yi, dist_sq + diff * diff)
                    },
                );
                (y_sq - dist_sq) / (F::cast(2.0) * F::cast(n_samples))
            }
        }
    }

    /// Radius of the ball around a feasible dual point that contains the dual
    /// optimum, derived from the strong concavity of the dual objective.
    pub fn screening_radius<F: Float>(&self, gap: F, alpha: F, n_samples: usize) -> F {
        let gap = gap.max(F::zero());
        match self {
            Problem::Logistic => (gap / F::cast(2.0)).sqrt() / alpha,
            _ => (F::cast(2.0) * gap / F::cast(n_samples)).sqrt() / alpha,
        }
    }
}

/// Numerically stable logistic function.
#[inline]
pub fn sigmoid<F: Float>(x: F) -> F {
    if x >= F::zero() {
        F::one() / (F::one() + (-x).exp())
    } else {
        let e = x.exp();
        e / (F::one() + e)
    }
}

/// `log(1 + exp(x))` without overflow.
#[inline]
pub fn log1p_exp<F: Float>(x: F) -> F {
    if x > F::zero() {
        x + (-x).exp().ln_1p()
    } else {
        x.exp().ln_1p()
    }
}

#[inline]
fn xlogx<F: Float>(x: F) -> F {
    if x > F::zero() { x * x.ln() } else { F::zero() }
}
