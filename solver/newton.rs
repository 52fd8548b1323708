//! Proximal Newton inner solver for L1-penalised logistic regression.
//!
//! Each Newton step replaces the logistic loss by its second-order expansion
//! around the current margin `m = X̃w`,
//!
//! ```text
//! q(δ) = gᵀX̃δ + ½ δᵀX̃ᵀ D X̃δ,    g_i = -y_i σ(-y_i m_i),    D = diag(σ(m_i)σ(-m_i))
//! ```
//!
//! and minimises `q(δ) + α‖w + δ‖₁` over the working set by a few passes of
//! weighted coordinate descent. The step along `δ` is then chosen by Armijo
//! backtracking on the true objective; when no step is accepted a plain
//! coordinate-descent pass is taken instead.

use crate::cd::{cd_epoch, soft_threshold, state_sums};
use crate::dual::{DualCandidate, keep_best};
use crate::inner::{InnerSettings, InnerSolver, SolveContext};
use crate::loss::{log1p_exp, sigmoid};
use crate::types::Float;
use ndarray::{Array1, Zip};

const MAX_NEWTON_STEPS: usize = 50;
const MAX_CD_PASSES: usize = 20;
const MAX_BACKTRACKS: usize = 20;
/// Fraction of the predicted decrease a step has to achieve.
const ARMIJO: f64 = 1e-4;

#[derive(Debug, Clone)]
pub struct ProxNewton<F> {
    tol: F,
    max_newton_steps: usize,
    max_cd_passes: usize,
    max_backtracks: usize,
}

impl<F: Float> ProxNewton<F> {
    pub fn new(settings: &InnerSettings<F>) -> Self {
        Self {
            tol: settings.tol,
            max_newton_steps: MAX_NEWTON_STEPS,
            max_cd_passes: MAX_CD_PASSES,
            max_backtracks: MAX_BACKTRACKS,
        }
    }
}

/// Logistic objective restricted to the coefficients of the working set. The
/// penalty of the other blocks is constant during a restricted solve and left
/// out.
fn restricted_objective<F: Float>(
    y: &Array1<F>,
    margin: &Array1<F>,
    coefs: impl Iterator<Item = F>,
    alpha: F,
) -> F {
    let loss: F = Zip::from(y)
        .and(margin)
        .fold(F::zero(), |acc, &label, &m| acc + log1p_exp(-label * m));
    loss + alpha * coefs.map(|w| w.abs()).sum::<F>()
}

impl<F: Float> InnerSolver<F> for ProxNewton<F> {
    fn solve_restricted(
        &mut self,
        ctx: &SolveContext<'_, F>,
        ws: &[usize],
        alpha: F,
        coefs: &mut Array1<F>,
        state: &mut Array1<F>,
        screened: &[bool],
        tol_inner: F,
    ) -> Option<DualCandidate<F>> {
        let design = ctx.design;
        let n = ctx.n_samples();
        let centered = design.centering().is_some();
        let y = ctx.y.to_owned();
        let mut best: Option<DualCandidate<F>> = None;
        if ws.is_empty() {
            return None;
        }
        let block_tol = tol_inner / F::cast(ws.len());

        for step in 0..self.max_newton_steps {
            let probs = Zip::from(&y)
                .and(&*state)
                .map_collect(|&label, &m| sigmoid(-label * m));
            let grad = Zip::from(&y).and(&probs).map_collect(|&label, &s| -label * s);
            let weights = probs.mapv(|s| s * (F::one() - s));
            let weight_sum = weights.sum();
            let curvature: Vec<F> = ws
                .iter()
                .map(|&j| design.weighted_column_sq_norm(j, weights.view(), weight_sum))
                .collect();

            // Weighted lasso on the quadratic model.
            let mut delta = vec![F::zero(); ws.len()];
            let mut x_delta = Array1::<F>::zeros(n);
            for _ in 0..self.max_cd_passes {
                let mut largest_decrease = F::zero();
                for (k, &j) in ws.iter().enumerate() {
                    let lipschitz = curvature[k];
                    if lipschitz <= F::zero() {
                        continue;
                    }
                    let partial =
                        design.column_dot_with(j, |i| grad[i] + weights[i] * x_delta[i]);
                    let old = coefs[j] + delta[k];
                    let new = soft_threshold(old - partial / lipschitz, alpha / lipschitz);
                    if new != old {
                        let change = new - old;
                        delta[k] += change;
                        design.column_axpy(j, change, x_delta.view_mut());
                        largest_decrease = largest_decrease.max(lipschitz * change * change);
                    }
                }
                if largest_decrease <= block_tol {
                    break;
                }
            }

            // Armijo backtracking against the decrease predicted by the model.
            // The allowance absorbs roundoff in the sufficient-decrease test; the
            // objective itself must still not increase.
            let current = restricted_objective(&y, state, ws.iter().map(|&j| coefs[j]), alpha);
            let predicted = Zip::from(&grad)
                .and(&x_delta)
                .fold(F::zero(), |acc, &g, &d| acc + g * d)
                + alpha
                    * ws.iter()
                        .zip(delta.iter())
                        .map(|(&j, &d)| (coefs[j] + d).abs() - coefs[j].abs())
                        .sum::<F>();
            let allowance = F::epsilon() * F::cast(16.0) * current.abs().max(F::one());
            let mut step_size = F::one();
            let mut accepted = None;
            if predicted < F::zero() {
                for _ in 0..self.max_backtracks {
                    let trial_margin = &*state + &x_delta.mapv(|v| v * step_size);
                    let trial_coefs = ws
                        .iter()
                        .zip(delta.iter())
                        .map(|(&j, &d)| coefs[j] + step_size * d);
                    let value = restricted_objective(&y, &trial_margin, trial_coefs, alpha);
                    let sufficient =
                        value <= current + F::cast(ARMIJO) * step_size * predicted + allowance;
                    if sufficient && value <= current {
                        accepted = Some(trial_margin);
                        break;
                    }
                    step_size = step_size / F::cast(2.0);
                }
            }
            match accepted {
                Some(margin) => {
                    for (&j, &d) in ws.iter().zip(delta.iter()) {
                        coefs[j] += step_size * d;
                    }
                    *state = margin;
                }
                None => {
                    // Plain coordinate-descent passes always make progress.
                    log::trace!("Newton step {step}: line search failed, taking CD passes.");
                    let mut sums = state_sums(ctx.problem, n, centered, state.view());
                    for _ in 0..self.max_cd_passes {
                        cd_epoch(ctx, ws, alpha, coefs, state, &mut sums);
                    }
                }
            }

            let primal = ctx.primal(state.view(), coefs.view(), alpha);
            let (restricted_dual, global) =
                ctx.restricted_and_global(state.view(), alpha, ws, screened);
            keep_best(&mut best, global);
            let restricted_gap = primal - restricted_dual;
            let global_gap = best
                .as_ref()
                .map_or(F::infinity(), |candidate| primal - candidate.value);
            log::trace!(
                "Newton step {step}: step size {step_size}, restricted gap {restricted_gap:.3e}, global gap {global_gap:.3e}."
            );
            if restricted_gap <= tol_inner || global_gap <= self.tol {
                break;
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::Design;
    use crate::inner::{CoordinateDescentEngine, solve_working_set};
    use crate::loss::Problem;
    use crate::test_fixtures::sparse_classification;
    use approx::assert_abs_diff_eq;

    #[test]
    fn prox_newton_matches_coordinate_descent() {
        let (x, y) = sparse_classification(60, 30, 4, 5);
        let design = Design::dense(x);
        let problem = Problem::Logistic;
        let ctx = SolveContext::new(&problem, &design, y.view()).unwrap();
        let alpha = crate::path::alpha_max(&ctx) / 4.0;
        let settings = InnerSettings {
            tol: 1e-10,
            max_iter: 50,
            max_epochs: 50_000,
            gap_freq: 10,
            p0: 5,
            prune: true,
            use_accel: true,
            anderson_depth: 5,
            tol_ratio_inner: 0.3,
        };
        let mut newton = ProxNewton::new(&settings);
        let by_newton = solve_working_set(
            &ctx,
            alpha,
            Array1::zeros(30),
            None,
            &settings,
            &mut newton,
        );
        let mut cd = CoordinateDescentEngine::new(settings);
        let by_cd = solve_working_set(&ctx, alpha, Array1::zeros(30), None, &settings, &mut cd);

        assert!(by_newton.gap <= 1e-10, "newton gap {}", by_newton.gap);
        assert!(by_cd.gap <= 1e-10, "cd gap {}", by_cd.gap);
        for j in 0..30 {
            assert_abs_diff_eq!(by_newton.coefs[j], by_cd.coefs[j], epsilon = 1e-4);
        }
    }
}
