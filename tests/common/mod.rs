use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

/// Gaussian design, a target driven by the first `k` features, and the seed's
/// noise at level 0.1.
pub fn regression(n_samples: usize, n_features: usize, k: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Array2<f64> = Array2::from_shape_fn((n_samples, n_features), |_| rng.sample(StandardNormal));
    let w = Array1::from_shape_fn(n_features, |j| match j {
        j if j >= k => 0.0,
        j if j % 3 == 0 => -1.0,
        _ => 2.0,
    });
    let noise = Array1::from_shape_fn(n_samples, |_| 0.1 * rng.sample::<f64, _>(StandardNormal));
    let y = x.dot(&w) + noise;
    (x, y)
}

/// Targets of shape `(n_samples, n_tasks)` sharing the support of the first
/// `k` features.
pub fn multitask_regression(
    n_samples: usize,
    n_features: usize,
    n_tasks: usize,
    k: usize,
    seed: u64,
) -> (Array2<f64>, Array2<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Array2<f64> = Array2::from_shape_fn((n_samples, n_features), |_| rng.sample(StandardNormal));
    let w = Array2::from_shape_fn((n_features, n_tasks), |(j, t)| {
        if j < k { 1.0 + 0.5 * t as f64 - (j % 2) as f64 * 2.5 } else { 0.0 }
    });
    let noise = Array2::from_shape_fn((n_samples, n_tasks), |_| 0.1 * rng.sample::<f64, _>(StandardNormal));
    let y = x.dot(&w) + noise;
    (x, y)
}

/// Labels in {-1, +1} from a sparse logistic model.
pub fn classification(n_samples: usize, n_features: usize, k: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let (x, margin) = regression(n_samples, n_features, k, seed);
    let mut rng = StdRng::seed_from_u64(seed ^ 0xC1A5);
    let y = margin.mapv(|m| {
        let p = 1.0 / (1.0 + (-m).exp());
        if rng.gen_range(0.0..1.0) < p { 1.0 } else { -1.0 }
    });
    (x, y)
}

/// Gaussian design where roughly `density` of the entries are non-zero.
pub fn sparse_design(n_samples: usize, n_features: usize, density: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((n_samples, n_features), |_| {
        if rng.gen_range(0.0..1.0) < density {
            rng.sample(StandardNormal)
        } else {
            0.0
        }
    })
}

pub fn max_abs_diff<'a>(a: impl IntoIterator<Item = &'a f64>, b: impl IntoIterator<Item = &'a f64>) -> f64 {
    a.into_iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}
