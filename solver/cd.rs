//! Cyclic block coordinate descent restricted to a working set.
//!
//! One epoch visits every block of the working set once, in order, and applies
//! the closed-form proximal step of the block:
//!
//! - lasso: exact coordinate minimisation, `ST(w + x̃ᵀR/‖x̃‖², nα/‖x̃‖²)`
//!   (clipped at zero when positivity is required);
//! - logistic: a proximal gradient step with the coordinate Lipschitz constant
//!   `‖x̃‖²/4`;
//! - group lasso: a block proximal gradient step with `L = ‖X̃_g‖²_op`;
//! - multitask lasso: exact row minimisation with block soft-thresholding.
//!
//! The working state (residual or margin) is updated incrementally after each
//! block. Blocks whose columns are identically zero are pinned at zero.

use crate::dual::task_sums;
use crate::inner::SolveContext;
use crate::loss::{Problem, sigmoid};
use crate::types::Float;
use ndarray::{Array1, ArrayView1, s};

/// `sign(x) · max(|x| - threshold, 0)`
#[inline]
pub fn soft_threshold<F: Float>(x: F, threshold: F) -> F {
    if x > threshold {
        x - threshold
    } else if x < -threshold {
        x + threshold
    } else {
        F::zero()
    }
}

/// Shrinks `z` towards zero by `threshold` in Euclidean norm, in place.
#[inline]
pub fn block_soft_threshold<F: Float>(z: &mut [F], threshold: F) {
    let norm = z.iter().map(|&v| v * v).sum::<F>().sqrt();
    if norm <= threshold {
        z.iter_mut().for_each(|v| *v = F::zero());
    } else {
        let shrink = F::one() - threshold / norm;
        z.iter_mut().for_each(|v| *v *= shrink);
    }
}

/// Per-task sums of the working state, as needed by centered column products.
/// All zeros when the design is not centered.
pub fn state_sums<F: Float>(
    problem: &Problem,
    n_samples: usize,
    centered: bool,
    state: ArrayView1<F>,
) -> Vec<F> {
    if centered {
        task_sums(state, n_samples, problem.n_tasks())
    } else {
        vec![F::zero(); problem.n_tasks()]
    }
}

/// Runs one epoch of coordinate descent over the blocks in `ws`.
///
/// `sums` must hold [`state_sums`] of `state` on entry and is kept in sync.
pub fn cd_epoch<F: Float>(
    ctx: &SolveContext<'_, F>,
    ws: &[usize],
    alpha: F,
    coefs: &mut Array1<F>,
    state: &mut Array1<F>,
    sums: &mut [F],
) {
    let design = ctx.design;
    let n = design.n_samples();
    let n_alpha = F::cast(n) * alpha;
    let centered = design.centering().is_some();

    match ctx.problem {
        Problem::Lasso { positive } => {
            for &j in ws {
                let lipschitz = ctx.lipschitz[j];
                if lipschitz == F::zero() {
                    coefs[j] = F::zero();
                    continue;
                }
                let old = coefs[j];
                let z = old + design.column_dot_with_sum(j, state.view(), sums[0]) / lipschitz;
                let threshold = n_alpha / lipschitz;
                let new = if *positive {
                    (z - threshold).max(F::zero())
                } else {
                    soft_threshold(z, threshold)
                };
                if new != old {
                    let delta = new - old;
                    coefs[j] = new;
                    design.column_axpy(j, -delta, state.view_mut());
                    if centered {
                        sums[0] -= delta * design.column_sum(j);
                    }
                }
            }
        }
        Problem::Logistic => {
            let y = ctx.y;
            for &j in ws {
                let lipschitz = ctx.lipschitz[j];
                if lipschitz == F::zero() {
                    coefs[j] = F::zero();
                    continue;
                }
                let old = coefs[j];
                let grad = design.column_dot_with(j, |i| -y[i] * sigmoid(-y[i] * state[i]));
                let new = soft_threshold(old - grad / lipschitz, alpha / lipschitz);
                if new != old {
                    coefs[j] = new;
                    design.column_axpy(j, new - old, state.view_mut());
                }
            }
        }
        Problem::GroupLasso { partition } => {
            let mut buffer: Vec<F> = Vec::new();
            for &g in ws {
                let columns = partition.group(g);
                let lipschitz = ctx.lipschitz[g];
                if lipschitz == F::zero() {
                    columns.iter().for_each(|&j| coefs[j] = F::zero());
                    continue;
                }
                buffer.clear();
                buffer.extend(columns.iter().map(|&j| {
                    coefs[j] + design.column_dot_with_sum(j, state.view(), sums[0]) / lipschitz
                }));
                block_soft_threshold(&mut buffer, n_alpha / lipschitz);
                for (&j, &new) in columns.iter().zip(buffer.iter()) {
                    let delta = new - coefs[j];
                    if delta != F::zero() {
                        coefs[j] = new;
                        design.column_axpy(j, -delta, state.view_mut());
                        if centered {
                            sums[0] -= delta * design.column_sum(j);
                        }
                    }
                }
            }
        }
        Problem::MultiTaskLasso { n_tasks } => {
            let n_tasks = *n_tasks;
            let mut buffer: Vec<F> = vec![F::zero(); n_tasks];
            for &j in ws {
                let lipschitz = ctx.lipschitz[j];
                let row = j * n_tasks..(j + 1) * n_tasks;
                if lipschitz == F::zero() {
                    row.for_each(|k| coefs[k] = F::zero());
                    continue;
                }
                for t in 0..n_tasks {
                    let residual = state.slice(s![t * n..(t + 1) * n]);
                    buffer[t] = coefs[j * n_tasks + t]
                        + design.column_dot_with_sum(j, residual, sums[t]) / lipschitz;
                }
                block_soft_threshold(&mut buffer, n_alpha / lipschitz);
                for t in 0..n_tasks {
                    let k = j * n_tasks + t;
                    let delta = buffer[t] - coefs[k];
                    if delta != F::zero() {
                        coefs[k] = buffer[t];
                        design.column_axpy(j, -delta, state.slice_mut(s![t * n..(t + 1) * n]));
                        if centered {
                            sums[t] -= delta * design.column_sum(j);
                        }
                    }
                }
            }
        }
    }
}
