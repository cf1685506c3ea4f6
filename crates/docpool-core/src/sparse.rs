//! Sparse vectors and their persisted form.
//!
//! [`SparseVector`] is the in-memory row type used by the feature index:
//! sorted term indices with matching weights. [`SparseRow`] is the wire
//! shape stored next to each document, a single-row CSR matrix:
//!
//! ```json
//! { "weights": [0.6, 0.8], "indices": [3, 17], "indptr": [0, 2], "shape": [1, 42] }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Persisted single-row CSR matrix.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SparseRow {
    pub weights: Vec<f32>,
    pub indices: Vec<u32>,
    pub indptr: Vec<u32>,
    pub shape: (usize, usize),
}

impl SparseRow {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(s: &str) -> Result<Self, IndexError> {
        serde_json::from_str(s).map_err(|e| IndexError::MalformedVector(e.to_string()))
    }
}

/// A sparse row vector with strictly increasing indices.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseVector {
    dim: usize,
    indices: Vec<u32>,
    weights: Vec<f32>,
}

impl SparseVector {
    /// An all-zero vector of the given dimensionality.
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            indices: Vec::new(),
            weights: Vec::new(),
        }
    }

    /// Build from `(index, weight)` pairs. Pairs are sorted, duplicate
    /// indices are summed and zero weights dropped.
    pub fn from_pairs(dim: usize, mut pairs: Vec<(u32, f32)>) -> Self {
        pairs.sort_by_key(|&(i, _)| i);
        let mut indices: Vec<u32> = Vec::with_capacity(pairs.len());
        let mut weights: Vec<f32> = Vec::with_capacity(pairs.len());
        for (i, w) in pairs {
            if indices.last() == Some(&i) {
                if let Some(last) = weights.last_mut() {
                    *last += w;
                }
            } else {
                indices.push(i);
                weights.push(w);
            }
        }
        let (indices, weights): (Vec<u32>, Vec<f32>) = indices
            .into_iter()
            .zip(weights)
            .filter(|&(_, w)| w != 0.0)
            .unzip();
        Self {
            dim,
            indices,
            weights,
        }
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.indices.len()
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn weights(&self) -> &[f32] {
        &self.weights
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.indices.iter().copied().zip(self.weights.iter().copied())
    }

    pub fn norm(&self) -> f32 {
        self.weights.iter().map(|w| w * w).sum::<f32>().sqrt()
    }

    /// Scale to unit length. Zero vectors are left untouched.
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > f32::EPSILON {
            for w in &mut self.weights {
                *w /= norm;
            }
        }
    }

    /// Dot product via a merge over the two sorted index lists.
    pub fn dot(&self, other: &SparseVector) -> f32 {
        let (mut a, mut b) = (0, 0);
        let mut sum = 0.0f32;
        while a < self.indices.len() && b < other.indices.len() {
            match self.indices[a].cmp(&other.indices[b]) {
                std::cmp::Ordering::Less => a += 1,
                std::cmp::Ordering::Greater => b += 1,
                std::cmp::Ordering::Equal => {
                    sum += self.weights[a] * other.weights[b];
                    a += 1;
                    b += 1;
                }
            }
        }
        sum
    }

    /// Cosine similarity in `[-1.0, 1.0]`; `0.0` when either side is zero.
    ///
    /// ```rust
    /// use docpool_core::sparse::SparseVector;
    ///
    /// let a = SparseVector::from_pairs(4, vec![(0, 1.0), (2, 1.0)]);
    /// let b = SparseVector::from_pairs(4, vec![(2, 3.0)]);
    /// let sim = a.cosine(&b);
    /// assert!((sim - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    /// assert_eq!(a.cosine(&SparseVector::zeros(4)), 0.0);
    /// ```
    pub fn cosine(&self, other: &SparseVector) -> f32 {
        let denom = self.norm() * other.norm();
        if denom < f32::EPSILON {
            return 0.0;
        }
        self.dot(other) / denom
    }

    /// Add this row into a dense accumulator. Indices past the end of
    /// `acc` are ignored.
    pub fn accumulate_into(&self, acc: &mut [f32]) {
        for (i, w) in self.iter() {
            if let Some(slot) = acc.get_mut(i as usize) {
                *slot += w;
            }
        }
    }

    pub fn to_row(&self) -> SparseRow {
        SparseRow {
            weights: self.weights.clone(),
            indices: self.indices.clone(),
            indptr: vec![0, self.indices.len() as u32],
            shape: (1, self.dim),
        }
    }

    /// Validate and convert a persisted row.
    pub fn from_row(row: &SparseRow) -> Result<Self, IndexError> {
        let (rows, dim) = row.shape;
        if rows != 1 {
            return Err(IndexError::MalformedVector(format!(
                "expected a single row, got shape ({rows}, {dim})"
            )));
        }
        if row.weights.len() != row.indices.len() {
            return Err(IndexError::MalformedVector(format!(
                "{} weights for {} indices",
                row.weights.len(),
                row.indices.len()
            )));
        }
        if row.indptr != [0, row.indices.len() as u32] {
            return Err(IndexError::MalformedVector(format!(
                "bad indptr {:?}",
                row.indptr
            )));
        }
        if let Some(&bad) = row.indices.iter().find(|&&i| i as usize >= dim) {
            return Err(IndexError::MalformedVector(format!(
                "index {bad} out of bounds for dimension {dim}"
            )));
        }
        if row.weights.iter().any(|w| !w.is_finite()) {
            return Err(IndexError::MalformedVector("non-finite weight".into()));
        }
        let pairs = row
            .indices
            .iter()
            .copied()
            .zip(row.weights.iter().copied())
            .collect();
        Ok(Self::from_pairs(dim, pairs))
    }
}
