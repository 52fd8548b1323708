//! Anderson extrapolation of the working state.
//!
//! Coordinate descent on these problems converges to a fixed point of a
//! (locally) linear map, so the sequence of working states behaves like a
//! vector autoregressive process. Combining the last `K + 1` states with
//! weights that cancel the dominant error terms gives a point closer to the
//! limit. With `U` the `K × n` matrix of successive differences,
//!
//! ```text
//! z = (U Uᵀ)⁻¹ 1,    c = z / Σz,    r_acc = Σ_k c_k r_{k+1}
//! ```

use crate::types::Float;
use ndarray::{Array1, Array2, ArrayView1};
use ndarray_linalg::Solve;
use std::collections::VecDeque;

/// The last `depth + 1` working states, oldest first.
#[derive(Debug, Clone)]
pub struct IterateHistory<F> {
    depth: usize,
    states: VecDeque<Array1<F>>,
}

impl<F: Float> IterateHistory<F> {
    pub fn new(depth: usize) -> Self {
        Self {
            depth,
            states: VecDeque::with_capacity(depth + 1),
        }
    }

    /// Records a state, dropping the oldest one once `depth + 1` are stored.
    pub fn push(&mut self, state: ArrayView1<F>) {
        if self.states.len() > self.depth {
            self.states.pop_front();
        }
        self.states.push_back(state.to_owned());
    }

    pub fn is_full(&self) -> bool {
        self.states.len() > self.depth
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }

    /// Extrapolated state, once the history is full.
    pub fn extrapolate(&self) -> Option<Array1<F>> {
        if !self.is_full() {
            return None;
        }
        let (front, back) = self.states.as_slices();
        if back.is_empty() {
            anderson_extrapolate(front)
        } else {
            let contiguous: Vec<Array1<F>> = self.states.iter().cloned().collect();
            anderson_extrapolate(&contiguous)
        }
    }
}

/// Anderson extrapolation of a sequence of at least two states.
///
/// The small linear system is solved in `f64`. Returns `None` when it is
/// singular or the combination is not finite, which happens routinely once the
/// iterates have converged.
pub fn anderson_extrapolate<F: Float>(states: &[Array1<F>]) -> Option<Array1<F>> {
    if states.len() < 2 {
        return None;
    }
    let k = states.len() - 1;
    let n = states[0].len();
    let mut diffs = Array2::<f64>::zeros((k, n));
    for (row, pair) in states.windows(2).enumerate() {
        for (i, (&next, &prev)) in pair[1].iter().zip(pair[0].iter()).enumerate() {
            diffs[[row, i]] = next.as_f64() - prev.as_f64();
        }
    }
    let gram = diffs.dot(&diffs.t());
    let ones = Array1::<f64>::ones(k);
    let z = match gram.solve(&ones) {
        Ok(z) => z,
        Err(err) => {
            log::trace!("Skipping extrapolation: {err}");
            return None;
        }
    };
    let total = z.sum();
    if !total.is_finite() || total == 0.0 || z.iter().any(|v| !v.is_finite()) {
        log::trace!("Skipping extrapolation: degenerate weights.");
        return None;
    }
    let mut accelerated = Array1::<F>::zeros(n);
    for (weight, state) in z.iter().zip(&states[1..]) {
        accelerated.scaled_add(F::cast(weight / total), state);
    }
    if accelerated.iter().all(|v| v.is_finite()) {
        Some(accelerated)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn extrapolation_moves_towards_the_fixed_point() {
        // x_{k+1} = A x_k + b with a diagonal contraction A.
        let a = array![0.5, 0.8, 0.9, 0.95, 0.3];
        let b = array![1.0, -1.0, 0.5, 2.0, 1.0];
        let limit = &b / &(1.0 - &a);
        let mut x = Array1::<f64>::zeros(5);
        let mut history = IterateHistory::new(3);
        while !history.is_full() {
            history.push(x.view());
            x = &a * &x + &b;
        }
        let last = history.states.back().unwrap().clone();
        let accelerated = history.extrapolate().unwrap();
        let distance = |v: &Array1<f64>| (v - &limit).mapv(|d| d * d).sum().sqrt();
        assert!(distance(&accelerated) < 0.75 * distance(&last));
    }

    #[test]
    fn converged_history_is_rejected() {
        let state = array![1.0, 2.0, 3.0];
        let states = vec![state.clone(), state.clone(), state];
        assert!(anderson_extrapolate(&states).is_none());
    }

    #[test]
    fn history_keeps_depth_plus_one_states() {
        let mut history = IterateHistory::<f64>::new(2);
        for value in 0..5 {
            history.push(array![value as f64].view());
        }
        assert!(history.is_full());
        let stored: Vec<f64> = history.states.iter().map(|s| s[0]).collect();
        assert_eq!(stored, vec![2.0, 3.0, 4.0]);
        history.clear();
        assert!(history.extrapolate().is_none());
    }
}
