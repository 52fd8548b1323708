//! # Working-set solver for one penalty value
//!
//! Outer iterations alternate between certification and restricted solving:
//!
//! 1. re-synchronise the working state with the coefficients and compute the
//!    primal value;
//! 2. build a feasible dual point and keep the best one seen so far; stop when
//!    the duality gap is below `tol`;
//! 3. screen blocks that are provably inactive, then pick a working set;
//! 4. hand the working set to an [`InnerSolver`] until its own gap criterion
//!    holds.
//!
//! The gap history over outer iterations is non-increasing: the primal value
//! only decreases under the inner updates and the dual value is a running
//! maximum.

use crate::accel::IterateHistory;
use crate::cd::{cd_epoch, state_sums};
use crate::design::Design;
use crate::dual::{
    DualCandidate, DualDirection, certify, keep_best, screen, screening_scores, unscreened,
};
use crate::loss::Problem;
use crate::types::{Float, SolverError};
use crate::working_set::{WorkingSetPolicy, WorkingSetSelector};
use ndarray::{Array1, ArrayView1};

/// Everything about a problem that does not depend on the penalty value.
#[derive(Debug, Clone)]
pub struct SolveContext<'a, F> {
    pub problem: &'a Problem,
    pub design: &'a Design<F>,
    pub y: ArrayView1<'a, F>,
    /// Column norm per block, or operator norm of the group's columns.
    pub block_norms: Array1<F>,
    /// Step-size constant of each block update.
    pub lipschitz: Array1<F>,
}

impl<'a, F: Float> SolveContext<'a, F> {
    pub fn new(
        problem: &'a Problem,
        design: &'a Design<F>,
        y: ArrayView1<'a, F>,
    ) -> Result<Self, SolverError> {
        let n_features = design.n_features();
        let block_norms = match problem {
            Problem::GroupLasso { partition } => {
                if partition.n_features() != n_features {
                    return Err(SolverError::DimensionMismatch {
                        what: "features covered by the group partition",
                        expected: n_features,
                        found: partition.n_features(),
                    });
                }
                let mut norms = Array1::zeros(partition.n_groups());
                for g in 0..partition.n_groups() {
                    norms[g] = design.operator_norm(partition.group(g))?;
                }
                norms
            }
            _ => design.column_norms(),
        };
        let lipschitz = match problem {
            Problem::Logistic => block_norms.mapv(|norm| norm * norm / F::cast(4.0)),
            _ => block_norms.mapv(|norm| norm * norm),
        };
        Ok(Self {
            problem,
            design,
            y,
            block_norms,
            lipschitz,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.design.n_samples()
    }

    pub fn n_features(&self) -> usize {
        self.design.n_features()
    }

    pub fn n_blocks(&self) -> usize {
        self.block_norms.len()
    }

    pub fn primal(&self, state: ArrayView1<F>, coefs: ArrayView1<F>, alpha: F) -> F {
        self.problem.primal(
            state,
            self.y,
            coefs,
            alpha,
            self.n_samples(),
            self.n_features(),
        )
    }

    /// Dual direction at `state` with feasibility norms over both the working
    /// set and every unscreened block, rescaled in both ways.
    ///
    /// Returns the dual value of the point feasible for the restricted problem
    /// and the globally feasible candidate.
    pub fn restricted_and_global(
        &self,
        state: ArrayView1<F>,
        alpha: F,
        ws: &[usize],
        screened: &[bool],
    ) -> (F, DualCandidate<F>) {
        let n = self.n_samples();
        let direction =
            DualDirection::compute(self.problem, self.design, self.y, state, alpha, screened);
        let restricted_norm = direction.feasibility_norm(ws.iter().copied());
        let global_norm = direction.feasibility_norm(unscreened(screened));
        let global = direction.rescaled(self.problem, self.y, alpha, n, global_norm);
        let restricted = if restricted_norm >= global_norm {
            global.value
        } else {
            direction
                .rescaled(self.problem, self.y, alpha, n, restricted_norm)
                .value
        };
        (restricted, global)
    }
}

/// Numerical settings of a single solve.
#[derive(Debug, Clone, Copy)]
pub struct InnerSettings<F> {
    pub tol: F,
    pub max_iter: usize,
    pub max_epochs: usize,
    pub gap_freq: usize,
    pub p0: usize,
    pub prune: bool,
    pub use_accel: bool,
    pub anderson_depth: usize,
    /// Inner problems are solved to `tol_ratio_inner` times the outer gap.
    pub tol_ratio_inner: F,
}

/// Result of solving one penalty value.
#[derive(Debug, Clone)]
pub struct InnerSolution<F> {
    pub coefs: Array1<F>,
    pub theta: Array1<F>,
    /// Certified duality gap of the returned pair.
    pub gap: F,
    /// Gap at the start of every outer iteration.
    pub gaps: Vec<F>,
    pub n_screened: usize,
    pub ws_size: usize,
}

impl<F> InnerSolution<F> {
    /// Number of outer iterations performed.
    pub fn n_iter(&self) -> usize {
        self.gaps.len()
    }
}

/// Improves the coefficients of a working set until the restricted problem is
/// solved to `tol_inner`.
///
/// Implementations update `coefs` and `state` in place and may return a
/// globally feasible dual candidate found on the way.
pub trait InnerSolver<F: Float> {
    #[allow(clippy::too_many_arguments)]
    fn solve_restricted(
        &mut self,
        ctx: &SolveContext<'_, F>,
        ws: &[usize],
        alpha: F,
        coefs: &mut Array1<F>,
        state: &mut Array1<F>,
        screened: &[bool],
        tol_inner: F,
    ) -> Option<DualCandidate<F>>;
}

/// Cyclic coordinate descent with periodic gap checks and Anderson
/// extrapolation of the working state.
#[derive(Debug, Clone)]
pub struct CoordinateDescentEngine<F> {
    settings: InnerSettings<F>,
    history: IterateHistory<F>,
}

impl<F: Float> CoordinateDescentEngine<F> {
    pub fn new(settings: InnerSettings<F>) -> Self {
        Self {
            settings,
            history: IterateHistory::new(settings.anderson_depth),
        }
    }
}

impl<F: Float> InnerSolver<F> for CoordinateDescentEngine<F> {
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
        let n = ctx.n_samples();
        let centered = ctx.design.centering().is_some();
        let mut sums = state_sums(ctx.problem, n, centered, state.view());
        let mut best: Option<DualCandidate<F>> = None;
        self.history.clear();

        for epoch in 1..=self.settings.max_epochs {
            cd_epoch(ctx, ws, alpha, coefs, state, &mut sums);
            if epoch % self.settings.gap_freq != 0 {
                continue;
            }
            sums = state_sums(ctx.problem, n, centered, state.view());

            let primal = ctx.primal(state.view(), coefs.view(), alpha);
            let (mut restricted_dual, global) =
                ctx.restricted_and_global(state.view(), alpha, ws, screened);
            keep_best(&mut best, global);

            if self.settings.use_accel {
                self.history.push(state.view());
                if let Some(extrapolated) = self.history.extrapolate() {
                    let (accel_restricted, accel_global) =
                        ctx.restricted_and_global(extrapolated.view(), alpha, ws, screened);
                    restricted_dual = restricted_dual.max(accel_restricted);
                    let adopted = best
                        .as_ref()
                        .is_none_or(|current| accel_global.value > current.value);
                    log::trace!(
                        "Epoch {epoch}: extrapolated dual {} {}.",
                        accel_global.value,
                        if adopted { "adopted" } else { "rejected" }
                    );
                    keep_best(&mut best, accel_global);
                }
            }

            let restricted_gap = primal - restricted_dual;
            let global_gap = best
                .as_ref()
                .map_or(F::infinity(), |candidate| primal - candidate.value);
            log::trace!(
                "Epoch {epoch}: restricted gap {restricted_gap:.3e}, global gap {global_gap:.3e}."
            );
            if restricted_gap <= tol_inner || global_gap <= self.settings.tol {
                break;
            }
        }
        best
    }
}

/// Feasible candidate built from a dual point of another penalty value.
fn warm_candidate<F: Float>(
    ctx: &SolveContext<'_, F>,
    theta: Array1<F>,
    alpha: F,
) -> Option<DualCandidate<F>> {
    if theta.len() != ctx.y.len() {
        return None;
    }
    let screened = vec![false; ctx.n_blocks()];
    let direction = DualDirection::from_direction(ctx.problem, ctx.design, theta, &screened);
    let norm = direction.feasibility_norm(0..ctx.n_blocks());
    Some(direction.rescaled(ctx.problem, ctx.y, alpha, ctx.n_samples(), norm))
}

/// Solves one penalty value with the working-set strategy.
///
/// `coefs` is the warm start and is consumed; `theta` optionally carries the
/// dual point of the previous penalty value.
pub fn solve_working_set<F: Float>(
    ctx: &SolveContext<'_, F>,
    alpha: F,
    coefs: Array1<F>,
    theta: Option<Array1<F>>,
    settings: &InnerSettings<F>,
    engine: &mut impl InnerSolver<F>,
) -> InnerSolution<F> {
    let problem = ctx.problem;
    let n = ctx.n_samples();
    let mut coefs = coefs;
    let mut screened = vec![false; ctx.n_blocks()];
    let mut selector = WorkingSetSelector::new(WorkingSetPolicy {
        p0: settings.p0,
        prune: settings.prune,
    });
    let mut best = theta.and_then(|theta| warm_candidate(ctx, theta, alpha));
    let mut from_inner: Option<DualCandidate<F>> = None;
    let mut gaps = Vec::with_capacity(settings.max_iter);
    let mut n_screened = 0;
    let mut ws_size = 0;
    let mut converged = false;

    for iteration in 0..settings.max_iter {
        let mut state = problem.initial_state(ctx.design, ctx.y, coefs.view());
        let primal = ctx.primal(state.view(), coefs.view(), alpha);
        if let Some(candidate) = from_inner.take() {
            keep_best(&mut best, candidate);
        }
        keep_best(
            &mut best,
            certify(problem, ctx.design, ctx.y, state.view(), alpha, &screened),
        );
        let Some(current) = best.as_ref() else {
            break;
        };
        let gap = primal - current.value;
        gaps.push(gap);
        log::debug!(
            "Iteration {iteration}: primal {primal:.6e}, gap {gap:.3e}, {n_screened} blocks screened."
        );
        if gap <= settings.tol {
            converged = true;
            break;
        }
        if let &[.., previous, last] = gaps.as_slice() {
            if last >= previous {
                log::debug!("Iteration {iteration}: no progress, widening the working set.");
                selector.widen();
            }
        }

        let radius = problem.screening_radius(gap, alpha, n);
        let scores = screening_scores(current, ctx.block_norms.view(), &screened);
        n_screened += screen(
            problem,
            scores.view(),
            ctx.block_norms.view(),
            radius,
            coefs.view(),
            &mut screened,
        );
        let ws = selector
            .select(problem, scores.view(), coefs.view(), &screened)
            .to_vec();
        ws_size = ws.len();

        let tol_inner = settings.tol_ratio_inner * gap;
        from_inner = engine.solve_restricted(
            ctx,
            &ws,
            alpha,
            &mut coefs,
            &mut state,
            &screened,
            tol_inner,
        );
    }

    // The last restricted pass has not been certified yet.
    let gap = match gaps.last() {
        Some(&gap) if converged => gap,
        _ => {
            let state = problem.initial_state(ctx.design, ctx.y, coefs.view());
            let primal = ctx.primal(state.view(), coefs.view(), alpha);
            if let Some(candidate) = from_inner.take() {
                keep_best(&mut best, candidate);
            }
            keep_best(
                &mut best,
                certify(problem, ctx.design, ctx.y, state.view(), alpha, &screened),
            );
            best.as_ref()
                .map_or(F::infinity(), |candidate| primal - candidate.value)
        }
    };

    let theta = best
        .map(|candidate| candidate.theta)
        .unwrap_or_else(|| Array1::zeros(ctx.y.len()));
    InnerSolution {
        coefs,
        theta,
        gap,
        gaps,
        n_screened,
        ws_size,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::{lasso_problem, sparse_regression};
    use approx::assert_abs_diff_eq;

    fn settings(tol: f64) -> InnerSettings<f64> {
        InnerSettings {
            tol,
            max_iter: 50,
            max_epochs: 10_000,
            gap_freq: 10,
            p0: 5,
            prune: false,
            use_accel: true,
            anderson_depth: 5,
            tol_ratio_inner: 0.3,
        }
    }

    #[test]
    fn lasso_converges_and_gaps_decrease() {
        let (x, y) = sparse_regression(40, 60, 4, 7);
        let design = Design::dense(x);
        let problem = lasso_problem();
        let ctx = SolveContext::new(&problem, &design, y.view()).unwrap();
        let alpha_max = crate::path::alpha_max(&ctx);
        let settings = settings(1e-10);
        let mut engine = CoordinateDescentEngine::new(settings);
        let solution = solve_working_set(
            &ctx,
            alpha_max / 5.0,
            Array1::zeros(60),
            None,
            &settings,
            &mut engine,
        );
        assert!(solution.gap <= 1e-10, "gap {}", solution.gap);
        assert!(solution.n_iter() <= settings.max_iter);
        for pair in solution.gaps.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-12, "gaps {:?}", solution.gaps);
        }
        assert!(solution.coefs.iter().any(|&w| w != 0.0));
    }

    #[test]
    fn solving_above_alpha_max_returns_zero() {
        let (x, y) = sparse_regression(30, 20, 3, 11);
        let design = Design::dense(x);
        let problem = lasso_problem();
        let ctx = SolveContext::new(&problem, &design, y.view()).unwrap();
        let alpha_max = crate::path::alpha_max(&ctx);
        let settings = settings(1e-8);
        let mut engine = CoordinateDescentEngine::new(settings);
        let solution = solve_working_set(
            &ctx,
            alpha_max * 1.01,
            Array1::zeros(20),
            None,
            &settings,
            &mut engine,
        );
        assert!(solution.coefs.iter().all(|&w| w == 0.0));
        assert_abs_diff_eq!(solution.gap, 0.0, epsilon = 1e-10);
        assert_eq!(solution.n_iter(), 1);
    }

    #[test]
    fn warm_dual_point_is_made_feasible() {
        let (x, y) = sparse_regression(20, 10, 2, 3);
        let design = Design::dense(x);
        let problem = lasso_problem();
        let ctx = SolveContext::new(&problem, &design, y.view()).unwrap();
        let huge = y.mapv(|v| v * 1e3);
        let candidate = warm_candidate(&ctx, huge, 0.1).unwrap();
        let norm = design
            .transpose_dot(candidate.theta.view())
            .iter()
            .fold(0.0_f64, |m, v| m.max(v.abs()));
        assert!(norm <= 1.0 + 1e-12);
        assert!(warm_candidate(&ctx, Array1::zeros(3), 0.1).is_none());
    }
}
