//! # Dual Certificate and Safe Screening
//!
//! A raw dual direction is rarely feasible. Dividing it by its feasibility norm
//! (when that norm exceeds one) gives a feasible point whose dual value
//! certifies the primal iterate through the duality gap.
//!
//! The same per-block correlations drive screening: with `θ` feasible and the
//! dual optimum inside the ball `B(θ, r)`, a block whose correlation satisfies
//!
//! ```text
//! corr_b(θ) + ‖X̃_b‖ · r < 1
//! ```
//!
//! is inactive at the optimum. `‖X̃_b‖` is the column norm, or the operator norm
//! of the group's columns. All of these are computed on the same implicitly
//! centered operator, so the bound holds with or without centering.

use crate::design::Design;
use crate::loss::Problem;
use crate::types::Float;
use ndarray::{Array1, ArrayView1, s};

/// A raw dual direction and its block correlations `corr_b(direction)`.
#[derive(Debug, Clone)]
pub struct DualDirection<F> {
    direction: Array1<F>,
    correlations: Array1<F>,
}

/// A feasible dual point with its dual objective value.
#[derive(Debug, Clone)]
pub struct DualCandidate<F> {
    pub theta: Array1<F>,
    pub value: F,
    /// Block correlations of `theta`. Screened blocks hold zero.
    pub correlations: Array1<F>,
}

/// Correlation of block `b` with `v`.
///
/// - lasso and logistic: `|x̃_jᵀv|` (signed `x̃_jᵀv` for the positive lasso);
/// - group lasso: `‖X̃_gᵀv‖₂`;
/// - multitask lasso: `‖(x̃_jᵀv_t)_t‖₂` over the task slices of `v`.
///
/// `sums` holds `Σ_i v_i` per task and is only read when centering is attached.
pub fn block_correlation<F: Float>(
    problem: &Problem,
    design: &Design<F>,
    v: ArrayView1<F>,
    sums: &[F],
    b: usize,
) -> F {
    let n = design.n_samples();
    match problem {
        Problem::Lasso { positive: true } => design.column_dot_with_sum(b, v, sums[0]),
        Problem::Lasso { .. } | Problem::Logistic => {
            design.column_dot_with_sum(b, v, sums[0]).abs()
        }
        Problem::GroupLasso { partition } => partition
            .group(b)
            .iter()
            .map(|&j| {
                let c = design.column_dot_with_sum(j, v, sums[0]);
                c * c
            })
            .sum::<F>()
            .sqrt(),
        Problem::MultiTaskLasso { n_tasks } => (0..*n_tasks)
            .map(|t| {
                let c = design.column_dot_with_sum(b, v.slice(s![t * n..(t + 1) * n]), sums[t]);
                c * c
            })
            .sum::<F>()
            .sqrt(),
    }
}

/// `Σ_i v_i` for each task slice of `v`.
pub fn task_sums<F: Float>(v: ArrayView1<F>, n_samples: usize, n_tasks: usize) -> Vec<F> {
    (0..n_tasks)
        .map(|t| v.slice(s![t * n_samples..(t + 1) * n_samples]).sum())
        .collect()
}

impl<F: Float> DualDirection<F> {
    /// Computes the raw direction at `state` and its correlations with every
    /// block that is not screened.
    pub fn compute(
        problem: &Problem,
        design: &Design<F>,
        y: ArrayView1<F>,
        state: ArrayView1<F>,
        alpha: F,
        screened: &[bool],
    ) -> Self {
        let direction = problem.dual_direction(state, y, alpha, design.n_samples());
        Self::from_direction(problem, design, direction, screened)
    }

    /// Wraps an existing direction, for instance a dual point carried over from
    /// another penalty value whose feasibility has to be checked again.
    pub fn from_direction(
        problem: &Problem,
        design: &Design<F>,
        direction: Array1<F>,
        screened: &[bool],
    ) -> Self {
        let n = design.n_samples();
        let sums = if design.centering().is_some() {
            task_sums(direction.view(), n, problem.n_tasks())
        } else {
            vec![F::zero(); problem.n_tasks()]
        };
        let correlations = Array1::from_shape_fn(screened.len(), |b| {
            if screened[b] {
                F::zero()
            } else {
                block_correlation(problem, design, direction.view(), &sums, b)
            }
        });
        Self {
            direction,
            correlations,
        }
    }

    /// `max_b corr_b` over `blocks`, never below zero.
    pub fn feasibility_norm(&self, blocks: impl IntoIterator<Item = usize>) -> F {
        blocks
            .into_iter()
            .map(|b| self.correlations[b])
            .fold(F::zero(), F::max)
    }

    /// Feasible point obtained by dividing by `norm` when it exceeds one.
    pub fn rescaled(
        &self,
        problem: &Problem,
        y: ArrayView1<F>,
        alpha: F,
        n_samples: usize,
        norm: F,
    ) -> DualCandidate<F> {
        let scale = norm.max(F::one());
        let theta = self.direction.mapv(|v| v / scale);
        let correlations = self.correlations.mapv(|c| c / scale);
        let value = problem.dual(theta.view(), y, alpha, n_samples);
        DualCandidate {
            theta,
            value,
            correlations,
        }
    }
}

/// Feasible dual point at `state`, rescaled over all unscreened blocks.
pub fn certify<F: Float>(
    problem: &Problem,
    design: &Design<F>,
    y: ArrayView1<F>,
    state: ArrayView1<F>,
    alpha: F,
    screened: &[bool],
) -> DualCandidate<F> {
    let direction = DualDirection::compute(problem, design, y, state, alpha, screened);
    let norm = direction.feasibility_norm(unscreened(screened));
    direction.rescaled(problem, y, alpha, design.n_samples(), norm)
}

/// Keeps whichever of the two candidates has the larger dual value.
pub fn keep_best<F: Float>(slot: &mut Option<DualCandidate<F>>, candidate: DualCandidate<F>) {
    let better = match slot {
        Some(current) => candidate.value > current.value,
        None => candidate.value.is_finite(),
    };
    if better {
        *slot = Some(candidate);
    }
}

/// Indices of the blocks still in play.
pub fn unscreened(screened: &[bool]) -> impl Iterator<Item = usize> + '_ {
    screened
        .iter()
        .enumerate()
        .filter(|&(_, &s)| !s)
        .map(|(b, _)| b)
}

/// `(corr_b - 1) / ‖X̃_b‖`: signed distance to the feasibility boundary in units
/// of the block norm. Larger is more promising; screened and empty blocks get
/// negative infinity.
pub fn screening_scores<F: Float>(
    candidate: &DualCandidate<F>,
    block_norms: ArrayView1<F>,
    screened: &[bool],
) -> Array1<F> {
    Array1::from_shape_fn(block_norms.len(), |b| {
        if screened[b] || block_norms[b] == F::zero() {
            F::neg_infinity()
        } else {
            (candidate.correlations[b] - F::one()) / block_norms[b]
        }
    })
}

/// Marks every block that is provably inactive at the dual optimum.
///
/// A block is only screened while its coefficients are all zero. Blocks with
/// zero norm cannot influence the fit and are screened as soon as they are.
/// Returns the number of newly screened blocks.
pub fn screen<F: Float>(
    problem: &Problem,
    scores: ArrayView1<F>,
    block_norms: ArrayView1<F>,
    radius: F,
    coefs: ArrayView1<F>,
    screened: &mut [bool],
) -> usize {
    let mut newly = 0;
    for b in 0..screened.len() {
        if screened[b] || problem.block_activity(b, coefs) != F::zero() {
            continue;
        }
        if block_norms[b] == F::zero() || scores[b] < -radius {
            screened[b] = true;
            newly += 1;
        }
    }
    newly
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::partition::Partition;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn design() -> Design<f64> {
        Design::dense(array![[1.0, 0.0, 2.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]])
    }

    #[test]
    fn rescaled_point_is_feasible() {
        let problem = Problem::Lasso { positive: false };
        let design = design();
        let y = array![3.0, -1.0, 2.0];
        let screened = vec![false; 3];
        let candidate = certify(&problem, &design, y.view(), y.view(), 0.1, &screened);
        let xt_theta = design.transpose_dot(candidate.theta.view());
        let norm = xt_theta.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        assert_abs_diff_eq!(norm, 1.0, epsilon = 1e-12);
        for b in 0..3 {
            assert_abs_diff_eq!(candidate.correlations[b], xt_theta[b].abs(), epsilon = 1e-12);
        }
    }

    #[test]
    fn group_correlation_is_block_norm() {
        let partition = Partition::try_new(vec![0, 2, 3], vec![0, 2, 1]).unwrap();
        let problem = Problem::GroupLasso { partition };
        let design = design();
        let v = array![1.0, 2.0, -1.0];
        let xt_v = design.transpose_dot(v.view());
        let expected = (xt_v[0] * xt_v[0] + xt_v[2] * xt_v[2]).sqrt();
        assert_abs_diff_eq!(
            block_correlation(&problem, &design, v.view(), &[v.sum()], 0),
            expected,
            epsilon = 1e-12
        );
    }

    #[test]
    fn multitask_correlation_uses_task_slices() {
        let problem = Problem::MultiTaskLasso { n_tasks: 2 };
        let design = design();
        let v = array![1.0, 0.0, 1.0, 0.0, 2.0, 0.0];
        // Column 0 against task 0: 2, against task 1: 0.
        assert_abs_diff_eq!(
            block_correlation(&problem, &design, v.view(), &[2.0, 2.0], 0),
            2.0,
            epsilon = 1e-12
        );
        // Column 1 against task 0: 1, against task 1: 2.
        assert_abs_diff_eq!(
            block_correlation(&problem, &design, v.view(), &[2.0, 2.0], 1),
            5.0_f64.sqrt(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn screening_skips_active_blocks() {
        let problem = Problem::Lasso { positive: false };
        let scores = array![-5.0, -5.0, 0.0];
        let norms = array![1.0, 1.0, 0.0];
        let coefs = array![0.0, 0.5, 0.0];
        let mut screened = vec![false; 3];
        let newly = screen(
            &problem,
            scores.view(),
            norms.view(),
            1.0,
            coefs.view(),
            &mut screened,
        );
        assert_eq!(newly, 2);
        assert_eq!(screened, vec![true, false, true]);
    }

    #[test]
    fn scores_rank_by_distance_to_boundary() {
        let candidate = DualCandidate {
            theta: Array1::zeros(2),
            value: 0.0,
            correlations: array![0.5, 0.9, 1.0],
        };
        let scores = screening_scores(&candidate, array![1.0, 2.0, 0.0].view(), &[false; 3]);
        assert_abs_diff_eq!(scores[0], -0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(scores[1], -0.05, epsilon = 1e-12);
        assert_eq!(scores[2], f64::NEG_INFINITY);
    }
}
