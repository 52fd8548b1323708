//! # Working-Set Selector
//!
//! Chooses which blocks the coordinate-descent engine may touch during the next
//! inner pass. Blocks carrying non-zero coefficients are always included, then
//! the highest screening scores fill the remaining slots. The size grows
//! geometrically between outer iterations.

use crate::loss::Problem;
use crate::types::Float;
use itertools::Itertools;
use ndarray::ArrayView1;
use std::cmp::Ordering;

/// Growth rules for the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingSetPolicy {
    /// Size of the first working set.
    pub p0: usize,
    /// Rebuild the set from the non-zero blocks at every outer iteration
    /// instead of only ever adding to it.
    pub prune: bool,
}

#[derive(Debug, Clone)]
pub struct WorkingSetSelector {
    policy: WorkingSetPolicy,
    size: Option<usize>,
    /// Lower bound on later sizes, raised by [`WorkingSetSelector::widen`].
    floor: usize,
    members: Vec<usize>,
}

impl WorkingSetSelector {
    pub fn new(policy: WorkingSetPolicy) -> Self {
        Self {
            policy,
            size: None,
            floor: 0,
            members: Vec::new(),
        }
    }

    /// Makes every later working set at least twice the current one. Used when
    /// a restricted solve left the duality gap where it was.
    pub fn widen(&mut self) {
        let current = self.size.unwrap_or(self.policy.p0).max(1);
        self.floor = self.floor.max(2 * current);
    }

    /// Picks the next working set from the current screening scores.
    ///
    /// With pruning the size is `max(p0, min(2·nnz, n_available))`, otherwise
    /// it starts at `p0` and doubles, keeping every previous member that was
    /// not screened since. Either way it never drops below the number of
    /// non-zero blocks nor exceeds the number of unscreened ones. Ties between
    /// equal scores go to the lower index. The returned members are sorted.
    pub fn select<F: Float>(
        &mut self,
        problem: &Problem,
        scores: ArrayView1<F>,
        coefs: ArrayView1<F>,
        screened: &[bool],
    ) -> &[usize] {
        let n_blocks = screened.len();
        let n_available = screened.iter().filter(|&&s| !s).count();
        let mut priority = scores.to_owned();
        let mut nnz = 0;
        for b in 0..n_blocks {
            if problem.block_activity(b, coefs) != F::zero() {
                priority[b] = F::infinity();
                nnz += 1;
            }
        }

        let target = match (self.policy.prune, self.size) {
            (true, _) => self.policy.p0.max((2 * nnz).min(n_available)),
            (false, None) => self.policy.p0,
            (false, Some(previous)) => (2 * previous).min(n_available),
        };
        let size = target.max(self.floor).max(nnz).min(n_available);

        if !self.policy.prune {
            for &b in &self.members {
                if !screened[b] {
                    priority[b] = F::infinity();
                }
            }
        }

        let mut members: Vec<usize> = (0..n_blocks)
            .filter(|&b| !screened[b])
            .sorted_by(|&a, &b| {
                priority[b]
                    .partial_cmp(&priority[a])
                    .unwrap_or(Ordering::Equal)
                    .then(a.cmp(&b))
            })
            .take(size)
            .collect();
        members.sort_unstable();

        log::trace!(
            "Working set: {} of {} available blocks ({} non-zero).",
            members.len(),
            n_available,
            nnz
        );
        self.size = Some(size);
        self.members = members;
        &self.members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, array};

    const LASSO: Problem = Problem::Lasso { positive: false };

    #[test]
    fn first_set_has_p0_best_scores() {
        let mut selector = WorkingSetSelector::new(WorkingSetPolicy { p0: 2, prune: false });
        let scores = array![-0.5, -0.1, -0.9, -0.05];
        let coefs = array![0.0, 0.0, 0.0, 0.0];
        let ws = selector.select(&LASSO, scores.view(), coefs.view(), &[false; 4]);
        assert_eq!(ws, &[1, 3]);
    }

    #[test]
    fn nonzero_blocks_are_always_included() {
        let mut selector = WorkingSetSelector::new(WorkingSetPolicy { p0: 1, prune: true });
        let scores = array![-0.5, -0.1, -0.9, -0.05];
        let coefs = array![0.0, 0.0, 2.0, 0.0];
        let ws = selector.select(&LASSO, scores.view(), coefs.view(), &[false; 4]);
        // max(p0, min(2 * 1, 4)) = 2: the non-zero block plus the best score.
        assert_eq!(ws, &[2, 3]);
    }

    #[test]
    fn growth_doubles_and_respects_screening() {
        let mut selector = WorkingSetSelector::new(WorkingSetPolicy { p0: 1, prune: false });
        let scores = array![-0.5, -0.1, -0.9, -0.05, -0.2];
        let coefs = Array1::<f64>::zeros(5);
        assert_eq!(
            selector.select(&LASSO, scores.view(), coefs.view(), &[false; 5]),
            &[3]
        );
        // Previous member 3 is kept even though its score drops.
        let scores = array![-0.5, -0.1, -0.9, -0.8, -0.2];
        assert_eq!(
            selector.select(&LASSO, scores.view(), coefs.view(), &[false; 5]),
            &[1, 3]
        );
        let screened = [true, false, true, false, false];
        assert_eq!(
            selector.select(&LASSO, scores.view(), coefs.view(), &screened),
            &[1, 3, 4]
        );
    }

    #[test]
    fn widening_overrides_pruned_size() {
        let mut selector = WorkingSetSelector::new(WorkingSetPolicy { p0: 1, prune: true });
        let scores = array![-0.5, -0.1, -0.9, -0.05, -0.2, -0.7];
        let coefs = array![0.0, 0.0, 0.0, 1.0, 0.0, 0.0];
        let ws = selector.select(&LASSO, scores.view(), coefs.view(), &[false; 6]);
        assert_eq!(ws, &[1, 3]);
        // Same support, so pruning alone would pick the same set again.
        selector.widen();
        let ws = selector.select(&LASSO, scores.view(), coefs.view(), &[false; 6]);
        assert_eq!(ws, &[0, 1, 3, 4]);
    }

    #[test]
    fn ties_go_to_the_lower_index() {
        let mut selector = WorkingSetSelector::new(WorkingSetPolicy { p0: 2, prune: true });
        let scores = array![-0.3, -0.1, -0.1, -0.1];
        let coefs = Array1::<f64>::zeros(4);
        let ws = selector.select(&LASSO, scores.view(), coefs.view(), &[false; 4]);
        assert_eq!(ws, &[1, 2]);
    }
}
