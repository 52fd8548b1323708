//! Compressed Sparse Column storage.
//!
//! Coordinate descent visits the design one column at a time, so columns are
//! the unit of access: for column `j` the stored entries live in
//! `values[col_ptrs[j]..col_ptrs[j + 1]]` with their rows in the matching range
//! of `row_indices`.

use crate::design::DesignError;
use crate::types::Float;
use ndarray::{Array2, ArrayView2};

/// Compressed Sparse Column matrix.
#[derive(Debug, Clone)]
pub struct CscMatrix<F> {
    values: Vec<F>,
    row_indices: Vec<usize>,
    /// Length `n_cols + 1`, with `col_ptrs[n_cols] == nnz`.
    col_ptrs: Vec<usize>,
    n_rows: usize,
    n_cols: usize,
}

impl<F: Float> CscMatrix<F> {
    /// Builds a matrix from raw CSC arrays, validating their consistency.
    pub fn try_new(
        n_rows: usize,
        n_cols: usize,
        col_ptrs: Vec<usize>,
        row_indices: Vec<usize>,
        values: Vec<F>,
    ) -> Result<Self, DesignError> {
        if col_ptrs.len() != n_cols + 1 {
            return Err(DesignError::ColumnPointerLength {
                expected: n_cols + 1,
                found: col_ptrs.len(),
            });
        }
        if row_indices.len() != values.len() {
            return Err(DesignError::IndexValueLengthMismatch {
                indices: row_indices.len(),
                values: values.len(),
            });
        }
        let nnz = values.len();
        let well_formed = col_ptrs.first() == Some(&0)
            && col_ptrs.last() == Some(&nnz)
            && col_ptrs.windows(2).all(|pair| pair[0] <= pair[1]);
        if !well_formed {
            return Err(DesignError::MalformedColumnPointers { nnz });
        }
        if let Some(&index) = row_indices.iter().find(|&&row| row >= n_rows) {
            return Err(DesignError::RowIndexOutOfBounds { index, n_rows });
        }
        Ok(Self {
            values,
            row_indices,
            col_ptrs,
            n_rows,
            n_cols,
        })
    }

    /// Compresses a dense matrix, dropping exact zeros.
    pub fn from_dense(dense: ArrayView2<F>) -> Self {
        let (n_rows, n_cols) = dense.dim();
        let mut col_ptrs = Vec::with_capacity(n_cols + 1);
        let mut row_indices = Vec::new();
        let mut values = Vec::new();
        col_ptrs.push(0);
        for column in dense.columns() {
            for (row, &value) in column.iter().enumerate() {
                if value != F::zero() {
                    row_indices.push(row);
                    values.push(value);
                }
            }
            col_ptrs.push(values.len());
        }
        Self {
            values,
            row_indices,
            col_ptrs,
            n_rows,
            n_cols,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.n_cols
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.values.len()
    }

    /// Iterates over the `(row, value)` pairs stored in column `j`.
    #[inline]
    pub fn column(&self, j: usize) -> impl Iterator<Item = (usize, F)> + '_ {
        let range = self.col_ptrs[j]..self.col_ptrs[j + 1];
        self.row_indices[range.clone()]
            .iter()
            .copied()
            .zip(self.values[range].iter().copied())
    }

    /// Sum of the stored entries of column `j`.
    pub fn column_sum(&self, j: usize) -> F {
        self.column(j).map(|(_, value)| value).sum()
    }

    /// Expands back to a dense matrix. Duplicate entries are summed.
    pub fn to_dense(&self) -> Array2<F> {
        let mut dense = Array2::zeros((self.n_rows, self.n_cols));
        for j in 0..self.n_cols {
            for (row, value) in self.column(j) {
                dense[[row, j]] += value;
            }
        }
        dense
    }
}
