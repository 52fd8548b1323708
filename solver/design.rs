//! # Linear Operator Adapter
//!
//! Uniform column access to a dense (column-major) or sparse (CSC) design
//! matrix. An optional [`ImplicitCentering`] describes the columns the solver
//! actually sees,
//!
//! ```text
//! x̃_j = (x_j - μ_j·1) / σ_j
//! ```
//!
//! without ever writing them down: centering a sparse column would fill it in.
//! Every product, norm and Gram entry below applies the affine correction in
//! closed form instead.

use crate::sparse::CscMatrix;
use crate::types::Float;
use ndarray::{Array1, Array2, ArrayView1, ArrayViewMut1, ShapeBuilder};
use ndarray_linalg::error::LinalgError;
use ndarray_linalg::{EigValsh, UPLO};
use thiserror::Error;

/// Errors in the construction of a design operator.
#[derive(Error, Debug)]
pub enum DesignError {
    #[error("CSC column pointer array must have length {expected} (n_cols + 1), but has length {found}.")]
    ColumnPointerLength { expected: usize, found: usize },

    #[error("CSC column pointers must start at 0, be non-decreasing and end at nnz = {nnz}.")]
    MalformedColumnPointers { nnz: usize },

    #[error("CSC row index and value arrays have different lengths ({indices} vs {values}).")]
    IndexValueLengthMismatch { indices: usize, values: usize },

    #[error("CSC row index {index} is out of bounds for a matrix with {n_rows} rows.")]
    RowIndexOutOfBounds { index: usize, n_rows: usize },

    #[error(
        "Centering vectors must have length n_features = {n_features}, but offset has {offset} and scale has {scale} entries."
    )]
    CenteringLength {
        n_features: usize,
        offset: usize,
        scale: usize,
    },

    #[error("Scale entry {index} is {value}; implicit scaling requires strictly positive finite entries.")]
    NonPositiveScale { index: usize, value: f64 },
}

/// Storage behind a [`Design`].
#[derive(Debug, Clone)]
pub enum DesignMatrix<F> {
    /// Dense storage, kept in column-major (Fortran) order.
    Dense(Array2<F>),
    Sparse(CscMatrix<F>),
}

/// Per-column affine correction `x̃_j = (x_j - offset_j) / scale_j`.
#[derive(Debug, Clone)]
pub struct ImplicitCentering<F> {
    offset: Array1<F>,
    scale: Array1<F>,
    /// `1 / scale_j`
    inv_scale: Array1<F>,
    /// `offset_j / scale_j`
    shift: Array1<F>,
    /// Sums of the stored (uncorrected) columns.
    raw_sums: Array1<F>,
}

impl<F: Float> ImplicitCentering<F> {
    pub fn offset(&self) -> ArrayView1<'_, F> {
        self.offset.view()
    }

    pub fn scale(&self) -> ArrayView1<'_, F> {
        self.scale.view()
    }
}

/// A design matrix together with its optional implicit centering.
#[derive(Debug, Clone)]
pub struct Design<F> {
    matrix: DesignMatrix<F>,
    centering: Option<ImplicitCentering<F>>,
}

impl<F: Float> Design<F> {
    /// Wraps a dense matrix, copying it into column-major order if needed.
    pub fn dense(x: Array2<F>) -> Self {
        let x = if x.t().is_standard_layout() {
            x
        } else {
            let mut fortran = Array2::zeros(x.raw_dim().f());
            fortran.assign(&x);
            fortran
        };
        Self {
            matrix: DesignMatrix::Dense(x),
            centering: None,
        }
    }

    pub fn sparse(x: CscMatrix<F>) -> Self {
        Self {
            matrix: DesignMatrix::Sparse(x),
            centering: None,
        }
    }

    /// Attaches an implicit centering/scaling of every column.
    pub fn with_centering(
        mut self,
        offset: Array1<F>,
        scale: Array1<F>,
    ) -> Result<Self, DesignError> {
        let n_features = self.n_features();
        if offset.len() != n_features || scale.len() != n_features {
            return Err(DesignError::CenteringLength {
                n_features,
                offset: offset.len(),
                scale: scale.len(),
            });
        }
        if let Some((index, &value)) = scale
            .iter()
            .enumerate()
            .find(|&(_, &s)| !(s > F::zero() && s.is_finite()))
        {
            return Err(DesignError::NonPositiveScale {
                index,
                value: value.as_f64(),
            });
        }
        let inv_scale = scale.mapv(|s| F::one() / s);
        let shift = &offset * &inv_scale;
        let raw_sums = Array1::from_shape_fn(n_features, |j| self.raw_column_sum(j));
        self.centering = Some(ImplicitCentering {
            offset,
            scale,
            inv_scale,
            shift,
            raw_sums,
        });
        Ok(self)
    }

    pub fn matrix(&self) -> &DesignMatrix<F> {
        &self.matrix
    }

    pub fn centering(&self) -> Option<&ImplicitCentering<F>> {
        self.centering.as_ref()
    }

    pub fn n_samples(&self) -> usize {
        match &self.matrix {
            DesignMatrix::Dense(x) => x.nrows(),
            DesignMatrix::Sparse(x) => x.n_rows(),
        }
    }

    pub fn n_features(&self) -> usize {
        match &self.matrix {
            DesignMatrix::Dense(x) => x.ncols(),
            DesignMatrix::Sparse(x) => x.n_cols(),
        }
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.matrix, DesignMatrix::Sparse(_))
    }

    fn raw_column_sum(&self, j: usize) -> F {
        match &self.matrix {
            DesignMatrix::Dense(x) => x.column(j).sum(),
            DesignMatrix::Sparse(x) => x.column_sum(j),
        }
    }

    /// `Σ_i x̃_ij`
    pub fn column_sum(&self, j: usize) -> F {
        match &self.centering {
            Some(c) => c.inv_scale[j] * c.raw_sums[j] - F::cast(self.n_samples()) * c.shift[j],
            None => self.raw_column_sum(j),
        }
    }

    /// `Σ_i x_ij f(i)` over the stored column, without centering.
    #[inline]
    fn raw_column_dot_with(&self, j: usize, f: impl Fn(usize) -> F) -> F {
        match &self.matrix {
            DesignMatrix::Dense(x) => x
                .column(j)
                .iter()
                .enumerate()
                .map(|(i, &value)| value * f(i))
                .sum(),
            DesignMatrix::Sparse(x) => x.column(j).map(|(i, value)| value * f(i)).sum(),
        }
    }

    /// `x̃_jᵀ v` given the precomputed `Σ_i v_i`.
    ///
    /// The sum is only read when a centering is attached, so callers without
    /// one may pass zero.
    #[inline]
    pub fn column_dot_with_sum(&self, j: usize, v: ArrayView1<F>, v_sum: F) -> F {
        let raw = self.raw_column_dot_with(j, |i| v[i]);
        match &self.centering {
            Some(c) => c.inv_scale[j] * raw - c.shift[j] * v_sum,
            None => raw,
        }
    }

    /// `x̃_jᵀ v`
    #[inline]
    pub fn column_dot(&self, j: usize, v: ArrayView1<F>) -> F {
        let v_sum = if self.centering.is_some() {
            v.sum()
        } else {
            F::zero()
        };
        self.column_dot_with_sum(j, v, v_sum)
    }

    /// `Σ_i x̃_ij f(i)`, for vectors that are cheaper to evaluate lazily than to store.
    pub fn column_dot_with(&self, j: usize, f: impl Fn(usize) -> F) -> F {
        match &self.centering {
            Some(c) => {
                let raw = self.raw_column_dot_with(j, &f);
                let total: F = (0..self.n_samples()).map(&f).sum();
                c.inv_scale[j] * raw - c.shift[j] * total
            }
            None => self.raw_column_dot_with(j, f),
        }
    }

    /// `out += a · x̃_j`
    #[inline]
    pub fn column_axpy(&self, j: usize, a: F, mut out: ArrayViewMut1<F>) {
        let (factor, offset) = match &self.centering {
            Some(c) => (a * c.inv_scale[j], a * c.shift[j]),
            None => (a, F::zero()),
        };
        match &self.matrix {
            DesignMatrix::Dense(x) => out.scaled_add(factor, &x.column(j)),
            DesignMatrix::Sparse(x) => {
                for (i, value) in x.column(j) {
                    out[i] += factor * value;
                }
            }
        }
        if offset != F::zero() {
            out.mapv_inplace(|value| value - offset);
        }
    }

    /// `X̃ w`
    pub fn dot(&self, w: ArrayView1<F>) -> Array1<F> {
        let mut out = Array1::zeros(self.n_samples());
        for (j, &w_j) in w.iter().enumerate() {
            if w_j != F::zero() {
                self.column_axpy(j, w_j, out.view_mut());
            }
        }
        out
    }

    /// `X̃ᵀ v`
    pub fn transpose_dot(&self, v: ArrayView1<F>) -> Array1<F> {
        let v_sum = if self.centering.is_some() {
            v.sum()
        } else {
            F::zero()
        };
        Array1::from_shape_fn(self.n_features(), |j| {
            self.column_dot_with_sum(j, v, v_sum)
        })
    }

    /// `‖x̃_j‖²`
    pub fn column_sq_norm(&self, j: usize) -> F {
        let raw: F = match &self.matrix {
            DesignMatrix::Dense(x) => x.column(j).iter().map(|&value| value * value).sum(),
            DesignMatrix::Sparse(x) => x.column(j).map(|(_, value)| value * value).sum(),
        };
        match &self.centering {
            Some(c) => {
                let n = F::cast(self.n_samples());
                let inv = c.inv_scale[j];
                let shift = c.shift[j];
                let value = inv * inv * raw - F::cast(2.0) * inv * shift * c.raw_sums[j]
                    + n * shift * shift;
                value.max(F::zero())
            }
            None => raw,
        }
    }

    /// `‖x̃_j‖₂` for every column.
    pub fn column_norms(&self) -> Array1<F> {
        Array1::from_shape_fn(self.n_features(), |j| self.column_sq_norm(j).sqrt())
    }

    /// `Σ_i d_i x̃_ij²` given the precomputed `Σ_i d_i`.
    pub fn weighted_column_sq_norm(&self, j: usize, d: ArrayView1<F>, d_sum: F) -> F {
        let (dx2, dx) = match &self.matrix {
            DesignMatrix::Dense(x) => x
                .column(j)
                .iter()
                .zip(d.iter())
                .fold((F::zero(), F::zero()), |(sq, lin), (&value, &weight)| {
                    (sq + weight * value * value, lin + weight * value)
                }),
            DesignMatrix::Sparse(x) => {
                x.column(j)
                    .fold((F::zero(), F::zero()), |(sq, lin), (i, value)| {
                        (sq + d[i] * value * value, lin + d[i] * value)
                    })
            }
        };
        match &self.centering {
            Some(c) => {
                let inv = c.inv_scale[j];
                let shift = c.shift[j];
                let value =
                    inv * inv * dx2 - F::cast(2.0) * inv * shift * dx + shift * shift * d_sum;
                value.max(F::zero())
            }
            None => dx2,
        }
    }

    /// Gram matrix `X̃_Gᵀ X̃_G` of the given columns.
    pub fn gram(&self, columns: &[usize]) -> Array2<F> {
        let k = columns.len();
        let n = self.n_samples();
        let mut gram = Array2::zeros((k, k));
        let mut scattered = Array1::zeros(n);
        for (a, &ja) in columns.iter().enumerate() {
            scattered.fill(F::zero());
            match &self.matrix {
                DesignMatrix::Dense(x) => scattered.assign(&x.column(ja)),
                DesignMatrix::Sparse(x) => {
                    for (i, value) in x.column(ja) {
                        scattered[i] += value;
                    }
                }
            }
            for (b, &jb) in columns.iter().enumerate().skip(a) {
                let raw = self.raw_column_dot_with(jb, |i| scattered[i]);
                let entry = match &self.centering {
                    Some(c) => {
                        c.inv_scale[ja] * c.inv_scale[jb] * raw
                            - c.inv_scale[ja] * c.shift[jb] * c.raw_sums[ja]
                            - c.inv_scale[jb] * c.shift[ja] * c.raw_sums[jb]
                            + F::cast(n) * c.shift[ja] * c.shift[jb]
                    }
                    None => raw,
                };
                gram[[a, b]] = entry;
                gram[[b, a]] = entry;
            }
        }
        gram
    }

    /// Largest singular value of the column block `X̃_G`.
    ///
    /// Computed from the dense eigendecomposition of the `|G| × |G|` Gram
    /// matrix, so the cost is quadratic in the group size. Single columns fall
    /// back to the column norm.
    pub fn operator_norm(&self, columns: &[usize]) -> Result<F, LinalgError> {
        match columns {
            [] => Ok(F::zero()),
            [j] => Ok(self.column_sq_norm(*j).sqrt()),
            _ => {
                let gram = self.gram(columns).mapv(|value| value.as_f64());
                let eigenvalues = gram.eigvalsh(UPLO::Lower)?;
                let largest = eigenvalues.iter().copied().fold(0.0_f64, f64::max);
                Ok(F::cast(largest.sqrt()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Axis, array};

    fn small_design() -> Array2<f64> {
        array![
            [1.0, 0.0, 2.0],
            [0.0, 3.0, 0.0],
            [4.0, 0.0, 5.0],
            [0.0, 1.0, 1.0]
        ]
    }

    fn materialized(x: &Array2<f64>, offset: &Array1<f64>, scale: &Array1<f64>) -> Array2<f64> {
        (x - &offset.view().insert_axis(Axis(0))) / &scale.view().insert_axis(Axis(0))
    }

    #[test]
    fn row_major_input_is_stored_column_major() {
        let design = Design::dense(small_design());
        match design.matrix() {
            DesignMatrix::Dense(x) => assert!(x.t().is_standard_layout()),
            DesignMatrix::Sparse(_) => panic!("Expected dense storage"),
        }
        assert_eq!(design.n_samples(), 4);
        assert_eq!(design.n_features(), 3);
    }

    #[test]
    fn dense_and_sparse_products_agree() {
        let x = small_design();
        let dense = Design::dense(x.clone());
        let sparse = Design::sparse(CscMatrix::from_dense(x.view()));
        let v = array![0.5, -1.0, 2.0, 1.5];
        let w = array![1.0, 0.0, -2.0];

        let expected_t = x.t().dot(&v);
        let expected = x.dot(&w);
        for design in [&dense, &sparse] {
            let xt_v = design.transpose_dot(v.view());
            let x_w = design.dot(w.view());
            for j in 0..3 {
                assert_abs_diff_eq!(xt_v[j], expected_t[j], epsilon = 1e-12);
                assert_abs_diff_eq!(
                    design.column_sq_norm(j),
                    x.column(j).dot(&x.column(j)),
                    epsilon = 1e-12
                );
            }
            for i in 0..4 {
                assert_abs_diff_eq!(x_w[i], expected[i], epsilon = 1e-12);
            }
        }
    }

    #[test]
    fn implicit_centering_matches_materialized_columns() {
        let x = small_design();
        let offset = x.mean_axis(Axis(0)).unwrap();
        let scale = array![2.0, 0.5, 3.0];
        let explicit = materialized(&x, &offset, &scale);

        let sparse = Design::sparse(CscMatrix::from_dense(x.view()))
            .with_centering(offset.clone(), scale.clone())
            .unwrap();
        let reference = Design::dense(explicit.clone());

        let v = array![0.3, -0.7, 1.1, 0.2];
        let d = array![0.25, 0.1, 0.2, 0.05];
        for j in 0..3 {
            assert_abs_diff_eq!(
                sparse.column_dot(j, v.view()),
                reference.column_dot(j, v.view()),
                epsilon = 1e-12
            );
            assert_abs_diff_eq!(
                sparse.column_sq_norm(j),
                reference.column_sq_norm(j),
                epsilon = 1e-12
            );
            assert_abs_diff_eq!(
                sparse.weighted_column_sq_norm(j, d.view(), d.sum()),
                reference.weighted_column_sq_norm(j, d.view(), d.sum()),
                epsilon = 1e-12
            );
            assert_abs_diff_eq!(
                sparse.column_dot_with(j, |i| v[i] * d[i]),
                explicit.column(j).dot(&(&v * &d)),
                epsilon = 1e-12
            );
        }

        let mut out = Array1::zeros(4);
        sparse.column_axpy(2, 1.5, out.view_mut());
        for i in 0..4 {
            assert_abs_diff_eq!(out[i], 1.5 * explicit[[i, 2]], epsilon = 1e-12);
        }

        let gram_implicit = sparse.gram(&[0, 2]);
        let gram_explicit = reference.gram(&[0, 2]);
        for (a, b) in gram_implicit.iter().zip(gram_explicit.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
    }

    #[test]
    fn operator_norm_is_largest_singular_value() {
        let x = array![[1.0, 0.0], [0.0, 2.0], [0.0, 0.0]];
        let design = Design::dense(x);
        assert_abs_diff_eq!(design.operator_norm(&[0, 1]).unwrap(), 2.0, epsilon = 1e-10);
        assert_abs_diff_eq!(design.operator_norm(&[0]).unwrap(), 1.0, epsilon = 1e-12);
        assert_eq!(design.operator_norm(&[]).unwrap(), 0.0);
    }

    #[test]
    fn invalid_centering_is_rejected() {
        let design = Design::dense(small_design());
        let err = design
            .clone()
            .with_centering(array![0.0, 0.0], array![1.0, 1.0])
            .unwrap_err();
        assert!(matches!(
            err,
            DesignError::CenteringLength {
                n_features: 3,
                offset: 2,
                scale: 2
            }
        ));
        let err = design
            .with_centering(array![0.0, 0.0, 0.0], array![1.0, 0.0, 1.0])
            .unwrap_err();
        assert!(matches!(err, DesignError::NonPositiveScale { index: 1, .. }));
    }
}
