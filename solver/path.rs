//! # Path Continuation Driver
//!
//! Solves a descending grid of penalty values, warm-starting each one from the
//! coefficients and dual point of the previous one. Every grid point receives
//! its own copy of that state; nothing is shared between two solves.
//!
//! Non-convergence is not an error: the path is completed and a
//! [`ConvergenceWarning`] is recorded (and logged) for each grid point whose
//! final duality gap exceeds the tolerance.

use crate::config::SolverConfig;
use crate::design::Design;
use crate::dual::DualDirection;
use crate::inner::{CoordinateDescentEngine, InnerSolution, SolveContext, solve_working_set};
use crate::loss::Problem;
use crate::newton::ProxNewton;
use crate::partition::GroupSpec;
use crate::types::{Float, ProblemKind, SolverError};
use itertools::Itertools;
use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Non-fatal report that a grid point stopped before reaching the tolerance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceWarning {
    /// Position of the penalty value in the path.
    pub index: usize,
    pub alpha: f64,
    pub gap: f64,
    pub tol: f64,
}

impl fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Objective did not converge at alpha[{}] = {:.4e}: duality gap {:.4e} exceeds tol {:.4e}. \
             Increase max_iter or the tolerance.",
            self.index, self.alpha, self.gap, self.tol
        )
    }
}

/// Solutions of a single-task problem along the path.
#[derive(Debug, Clone)]
pub struct RegularizationPath<F> {
    /// Penalty values, strictly descending.
    pub alphas: Array1<F>,
    /// Shape `(n_features, n_alphas)`.
    pub coefs: Array2<F>,
    /// Shape `(n_samples, n_alphas)`.
    pub dual_points: Array2<F>,
    pub gaps: Array1<F>,
    pub n_iters: Vec<usize>,
    /// Outer-iteration gap history of every grid point.
    pub gap_histories: Vec<Vec<F>>,
    pub warnings: Vec<ConvergenceWarning>,
}

/// Solutions of the multitask lasso along the path.
#[derive(Debug, Clone)]
pub struct MultiTaskPath<F> {
    pub alphas: Array1<F>,
    /// Shape `(n_tasks, n_features, n_alphas)`.
    pub coefs: Array3<F>,
    /// Shape `(n_alphas, n_samples, n_tasks)`.
    pub dual_points: Array3<F>,
    pub gaps: Array1<F>,
    pub n_iters: Vec<usize>,
    pub gap_histories: Vec<Vec<F>>,
    pub warnings: Vec<ConvergenceWarning>,
}

/// Smallest penalty for which the all-zero coefficients are optimal.
///
/// This is the feasibility norm of the dual direction taken at `w = 0` with a
/// unit penalty, e.g. `‖X̃ᵀy‖∞ / n` for the lasso and `‖X̃ᵀy‖∞ / 2` for the
/// logistic loss. Centering attached to the design is taken into account.
pub fn alpha_max<F: Float>(ctx: &SolveContext<'_, F>) -> F {
    let n_blocks = ctx.n_blocks();
    let zeros = Array1::zeros(ctx.problem.n_coefs(ctx.n_features()));
    let state = ctx
        .problem
        .initial_state(ctx.design, ctx.y, zeros.view());
    let direction = DualDirection::compute(
        ctx.problem,
        ctx.design,
        ctx.y,
        state.view(),
        F::one(),
        &vec![false; n_blocks],
    );
    direction.feasibility_norm(0..n_blocks)
}

/// [`alpha_max`] of a problem given by kind, for targets flattened task-major.
pub fn alpha_max_for<F: Float>(
    design: &Design<F>,
    y: ArrayView1<F>,
    kind: ProblemKind,
    groups: Option<&GroupSpec>,
    n_tasks: usize,
    positive: bool,
) -> Result<F, SolverError> {
    let problem = Problem::new(kind, groups, design.n_features(), n_tasks, positive)?;
    problem.validate_targets(y, design.n_samples())?;
    let ctx = SolveContext::new(&problem, design, y.view())?;
    Ok(alpha_max(&ctx))
}

/// `alpha_max · geomspace(1, eps, n_alphas)`
pub fn alpha_grid<F: Float>(alpha_max: F, eps: f64, n_alphas: usize) -> Array1<F> {
    if n_alphas == 1 {
        return Array1::from_elem(1, alpha_max);
    }
    let last = (n_alphas - 1) as f64;
    Array1::from_shape_fn(n_alphas, |k| {
        alpha_max * F::cast(eps.powf(k as f64 / last))
    })
}

/// Grid of the path: the caller's values or the geometric grid below
/// `alpha_max`, sorted in descending order without duplicates. Duplicates are
/// removed in the working precision, where distinct `f64` values may collide.
fn resolve_alphas<F: Float>(config: &SolverConfig, alpha_max: F) -> Result<Vec<F>, SolverError> {
    let candidates: Vec<F> = match &config.alphas {
        Some(alphas) => {
            if let Some(&bad) = alphas.iter().find(|&&a| !(a > 0.0 && a.is_finite())) {
                return Err(SolverError::InvalidAlpha(bad));
            }
            alphas.iter().copied().map(F::cast).collect()
        }
        // Zero when the targets are orthogonal to every block: no grid exists.
        None if !(alpha_max > F::zero()) => {
            return Err(SolverError::InvalidAlpha(alpha_max.as_f64()));
        }
        None => alpha_grid(alpha_max, config.eps, config.n_alphas).to_vec(),
    };
    if let Some(&bad) = candidates.iter().find(|&&a| !(a > F::zero() && a.is_finite())) {
        return Err(SolverError::InvalidAlpha(bad.as_f64()));
    }
    Ok(candidates
        .into_iter()
        .sorted_by(|a, b| b.partial_cmp(a).unwrap_or(Ordering::Equal))
        .dedup()
        .collect())
}

struct PathSolutions<F> {
    alphas: Vec<F>,
    solutions: Vec<InnerSolution<F>>,
    warnings: Vec<ConvergenceWarning>,
}

fn run_path<F: Float>(
    design: &Design<F>,
    problem: &Problem,
    y: ArrayView1<F>,
    coef_init: Option<Array1<F>>,
    config: &SolverConfig,
) -> Result<PathSolutions<F>, SolverError> {
    config.validate()?;
    if config.use_newton && problem.kind() != ProblemKind::Logistic {
        return Err(SolverError::NewtonUnsupported(problem.kind()));
    }
    let n_samples = design.n_samples();
    problem.validate_targets(y, n_samples)?;

    let n_coefs = problem.n_coefs(design.n_features());
    let mut coefs = match coef_init {
        Some(init) if init.len() != n_coefs => {
            return Err(SolverError::DimensionMismatch {
                what: "initial coefficients",
                expected: n_coefs,
                found: init.len(),
            });
        }
        Some(init) => init,
        None => Array1::zeros(n_coefs),
    };

    let ctx = SolveContext::new(problem, design, y.view())?;
    let alpha_max = alpha_max(&ctx);
    let alphas = resolve_alphas(config, alpha_max)?;
    log::info!(
        "Solving a {} path over {} penalty values (alpha_max = {:.4e}, {} samples, {} features).",
        problem.kind(),
        alphas.len(),
        alpha_max.as_f64(),
        n_samples,
        design.n_features()
    );

    let mut p0 = config
        .p0
        .max(problem.count_nonzero_blocks(coefs.view(), design.n_features()));
    let mut theta: Option<Array1<F>> = None;
    let mut solutions = Vec::with_capacity(alphas.len());
    let mut warnings = Vec::new();

    for (index, &alpha) in alphas.iter().enumerate() {
        let settings = config.inner_settings::<F>(p0);
        let solution = if config.use_newton {
            let mut engine = ProxNewton::new(&settings);
            solve_working_set(&ctx, alpha, coefs, theta, &settings, &mut engine)
        } else {
            let mut engine = CoordinateDescentEngine::new(settings);
            solve_working_set(&ctx, alpha, coefs, theta, &settings, &mut engine)
        };

        let nnz = problem.count_nonzero_blocks(solution.coefs.view(), design.n_features());
        log::info!(
            "alpha[{index}] = {:.4e}: gap {:.3e} after {} iterations, {nnz} non-zero blocks, working set {}, {} screened.",
            alpha.as_f64(),
            solution.gap.as_f64(),
            solution.n_iter(),
            solution.ws_size,
            solution.n_screened
        );
        if !(solution.gap <= settings.tol) {
            let warning = ConvergenceWarning {
                index,
                alpha: alpha.as_f64(),
                gap: solution.gap.as_f64(),
                tol: config.tol,
            };
            log::warn!("{warning}");
            warnings.push(warning);
        }

        coefs = solution.coefs.to_owned();
        theta = Some(solution.theta.to_owned());
        p0 = nnz.max(1);
        solutions.push(solution);
    }

    Ok(PathSolutions {
        alphas,
        solutions,
        warnings,
    })
}

/// Computes the regularization path of a single-task problem.
///
/// `groups` is required for the group lasso and ignored otherwise.
/// `coef_init` warm-starts the first grid point.
pub fn compute_path<F: Float>(
    design: &Design<F>,
    y: ArrayView1<F>,
    kind: ProblemKind,
    groups: Option<&GroupSpec>,
    coef_init: Option<ArrayView1<F>>,
    config: &SolverConfig,
) -> Result<RegularizationPath<F>, SolverError> {
    if kind == ProblemKind::MultiTaskLasso {
        return Err(SolverError::MultiTaskRequiresMatrixTargets(kind));
    }
    let problem = Problem::new(kind, groups, design.n_features(), 1, config.positive)?;
    let output = run_path(
        design,
        &problem,
        y,
        coef_init.map(|init| init.to_owned()),
        config,
    )?;

    let n_alphas = output.alphas.len();
    let mut coefs = Array2::zeros((design.n_features(), n_alphas));
    let mut dual_points = Array2::zeros((design.n_samples(), n_alphas));
    for (k, solution) in output.solutions.iter().enumerate() {
        coefs.column_mut(k).assign(&solution.coefs);
        dual_points.column_mut(k).assign(&solution.theta);
    }
    Ok(RegularizationPath {
        alphas: Array1::from(output.alphas),
        coefs,
        dual_points,
        gaps: output.solutions.iter().map(|s| s.gap).collect(),
        n_iters: output.solutions.iter().map(InnerSolution::n_iter).collect(),
        gap_histories: output.solutions.into_iter().map(|s| s.gaps).collect(),
        warnings: output.warnings,
    })
}

/// Computes the multitask lasso path for targets of shape `(n_samples, n_tasks)`.
///
/// `coef_init` has shape `(n_features, n_tasks)`.
pub fn compute_multitask_path<F: Float>(
    design: &Design<F>,
    y: ArrayView2<F>,
    coef_init: Option<ArrayView2<F>>,
    config: &SolverConfig,
) -> Result<MultiTaskPath<F>, SolverError> {
    let (n_samples, n_tasks) = y.dim();
    if n_samples != design.n_samples() {
        return Err(SolverError::DimensionMismatch {
            what: "target rows",
            expected: design.n_samples(),
            found: n_samples,
        });
    }
    let n_features = design.n_features();
    let problem = Problem::new(
        ProblemKind::MultiTaskLasso,
        None,
        n_features,
        n_tasks,
        config.positive,
    )?;
    // Task-major targets, feature-major coefficients.
    let flat_y: Array1<F> = y.t().iter().copied().collect();
    let flat_init = match coef_init {
        Some(init) if init.dim() != (n_features, n_tasks) => {
            return Err(SolverError::DimensionMismatch {
                what: "initial coefficient rows",
                expected: n_features,
                found: init.nrows(),
            });
        }
        Some(init) => Some(init.iter().copied().collect::<Array1<F>>()),
        None => None,
    };
    let output = run_path(design, &problem, flat_y.view(), flat_init, config)?;

    let n_alphas = output.alphas.len();
    let mut coefs = Array3::zeros((n_tasks, n_features, n_alphas));
    let mut dual_points = Array3::zeros((n_alphas, n_samples, n_tasks));
    for (k, solution) in output.solutions.iter().enumerate() {
        for j in 0..n_features {
            for t in 0..n_tasks {
                coefs[[t, j, k]] = solution.coefs[j * n_tasks + t];
            }
        }
        for t in 0..n_tasks {
            for i in 0..n_samples {
                dual_points[[k, i, t]] = solution.theta[t * n_samples + i];
            }
        }
    }
    Ok(MultiTaskPath {
        alphas: Array1::from(output.alphas),
        coefs,
        dual_points,
        gaps: output.solutions.iter().map(|s| s.gap).collect(),
        n_iters: output.solutions.iter().map(InnerSolution::n_iter).collect(),
        gap_histories: output.solutions.into_iter().map(|s| s.gaps).collect(),
        warnings: output.warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::sparse_regression;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn grid_is_geometric_from_alpha_max() {
        let grid: Array1<f64> = alpha_grid(2.0, 1e-2, 3);
        assert_abs_diff_eq!(grid[0], 2.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grid[1], 0.2, epsilon = 1e-12);
        assert_abs_diff_eq!(grid[2], 0.02, epsilon = 1e-12);
        let single: Array1<f64> = alpha_grid(2.0, 1e-2, 1);
        assert_eq!(single.to_vec(), vec![2.0]);
    }

    #[test]
    fn caller_alphas_are_sorted_and_deduplicated() {
        let config = SolverConfig {
            alphas: Some(vec![0.1, 0.5, 0.1, 0.3]),
            ..SolverConfig::default()
        };
        let alphas: Vec<f64> = resolve_alphas(&config, 1.0).unwrap();
        assert_eq!(alphas, vec![0.5, 0.3, 0.1]);

        let config = SolverConfig {
            alphas: Some(vec![0.1, -1.0]),
            ..SolverConfig::default()
        };
        assert!(matches!(
            resolve_alphas::<f64>(&config, 1.0),
            Err(SolverError::InvalidAlpha(a)) if a == -1.0
        ));
    }

    #[test]
    fn alphas_colliding_in_single_precision_are_merged() {
        let config = SolverConfig {
            alphas: Some(vec![0.5, 1.0, 1.0 + 1e-12]),
            ..SolverConfig::default()
        };
        let alphas: Vec<f32> = resolve_alphas(&config, 1.0).unwrap();
        assert_eq!(alphas, vec![1.0_f32, 0.5]);
        let alphas: Vec<f64> = resolve_alphas(&config, 1.0).unwrap();
        assert_eq!(alphas.len(), 3);
    }

    #[test]
    fn generated_grid_is_strictly_descending() {
        let config = SolverConfig {
            n_alphas: 50,
            eps: 1e-3,
            ..SolverConfig::default()
        };
        let alphas: Vec<f32> = resolve_alphas(&config, 2.0).unwrap();
        assert!(alphas.windows(2).all(|w| w[0] > w[1]));
        assert_eq!(alphas[0], 2.0);
    }

    #[test]
    fn alpha_max_of_each_variant() {
        let x = array![[1.0, 2.0], [0.0, -1.0], [3.0, 0.0]];
        let design = Design::dense(x.clone());
        let y = array![1.0, 2.0, -1.0];
        // Xᵀy = (-2, 0).
        let lasso = Problem::Lasso { positive: false };
        let ctx = SolveContext::new(&lasso, &design, y.view()).unwrap();
        assert_abs_diff_eq!(alpha_max(&ctx), 2.0 / 3.0, epsilon = 1e-12);

        let positive = Problem::Lasso { positive: true };
        let ctx = SolveContext::new(&positive, &design, y.view()).unwrap();
        assert_abs_diff_eq!(alpha_max(&ctx), 0.0, epsilon = 1e-12);

        let labels = array![1.0, 1.0, -1.0];
        // Xᵀy = (-2, 1).
        let logistic = Problem::Logistic;
        let ctx = SolveContext::new(&logistic, &design, labels.view()).unwrap();
        assert_abs_diff_eq!(alpha_max(&ctx), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn multitask_targets_need_their_own_entry_point() {
        let (x, y) = sparse_regression(10, 5, 2, 1);
        let design = Design::dense(x);
        let result = compute_path(
            &design,
            y.view(),
            ProblemKind::MultiTaskLasso,
            None,
            None,
            &SolverConfig::default(),
        );
        assert!(matches!(
            result,
            Err(SolverError::MultiTaskRequiresMatrixTargets(_))
        ));
    }

    #[test]
    fn newton_is_rejected_for_quadratic_losses() {
        let (x, y) = sparse_regression(10, 5, 2, 1);
        let design = Design::dense(x);
        let config = SolverConfig {
            use_newton: true,
            ..SolverConfig::default()
        };
        let result = compute_path(&design, y.view(), ProblemKind::Lasso, None, None, &config);
        assert!(matches!(
            result,
            Err(SolverError::NewtonUnsupported(ProblemKind::Lasso))
        ));
    }

    #[test]
    fn warm_start_length_is_checked() {
        let (x, y) = sparse_regression(10, 5, 2, 1);
        let design = Design::dense(x);
        let init = Array1::zeros(4);
        let result = compute_path(
            &design,
            y.view(),
            ProblemKind::Lasso,
            None,
            Some(init.view()),
            &SolverConfig::default(),
        );
        assert!(matches!(
            result,
            Err(SolverError::DimensionMismatch { expected: 5, found: 4, .. })
        ));
    }
}
