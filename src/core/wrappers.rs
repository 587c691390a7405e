//! Trait implementations for faer dense matrices and plain vectors.
//!
//! These impls let `faer::Mat`, `faer::MatRef` and `Vec<T>` flow through the
//! generic solver and adjoint machinery. Inner products optionally use Rayon
//! for shared-memory parallelism; semantically global reductions (norms across
//! a domain-decomposed state) are delegated to a [`crate::parallel::Comm`]
//! through the `global_*` helpers, so the core never assumes a reduction is
//! local.

use crate::core::traits::{Indexing, InnerProduct, MatTransVec, MatVec};
use crate::parallel::Comm;
use faer::{Mat, MatRef};
use num_traits::Float;

impl<T: Float> MatVec<Vec<T>> for Mat<T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        assert_eq!(self.ncols(), x.len(), "input vector x has incorrect length");
        assert_eq!(self.nrows(), y.len(), "output vector y has incorrect length");
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = x
                .iter()
                .enumerate()
                .fold(T::zero(), |acc, (j, &xj)| acc + self[(i, j)] * xj);
        }
    }
}

impl<'a, T: Float> MatVec<Vec<T>> for MatRef<'a, T> {
    fn matvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        assert_eq!(self.ncols(), x.len(), "input vector x has incorrect length");
        assert_eq!(self.nrows(), y.len(), "output vector y has incorrect length");
        for (i, yi) in y.iter_mut().enumerate() {
            *yi = x
                .iter()
                .enumerate()
                .fold(T::zero(), |acc, (j, &xj)| acc + self[(i, j)] * xj);
        }
    }
}

impl<T: Float> MatTransVec<Vec<T>> for Mat<T> {
    fn mattransvec(&self, x: &Vec<T>, y: &mut Vec<T>) {
        assert_eq!(self.nrows(), x.len(), "input vector x has incorrect length");
        assert_eq!(self.ncols(), y.len(), "output vector y has incorrect length");
        for (j, yj) in y.iter_mut().enumerate() {
            *yj = x
                .iter()
                .enumerate()
                .fold(T::zero(), |acc, (i, &xi)| acc + self[(i, j)] * xi);
        }
    }
}

/// Adapter presenting Aᵗ as a forward operator, so transpose systems reuse
/// the same Krylov loop as forward systems.
pub struct TransposeOp<'a, M>(pub &'a M);

impl<'a, M, V> MatVec<V> for TransposeOp<'a, M>
where
    M: MatTransVec<V>,
{
    fn matvec(&self, x: &V, y: &mut V) {
        self.0.mattransvec(x, y);
    }
}

impl<T: Float + From<f64> + Send + Sync> InnerProduct<Vec<T>> for () {
    type Scalar = T;

    fn dot(&self, x: &Vec<T>, y: &Vec<T>) -> T {
        assert_eq!(x.len(), y.len(), "vectors must have the same length");
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            x.as_slice()
                .par_iter()
                .zip(y.as_slice().par_iter())
                .map(|(xi, yi)| *xi * *yi)
                .reduce(|| T::zero(), |acc, v| acc + v)
        }
        #[cfg(not(feature = "rayon"))]
        {
            x.iter()
                .zip(y.iter())
                .map(|(xi, yi)| *xi * *yi)
                .fold(T::zero(), |acc, v| acc + v)
        }
    }

    fn norm(&self, x: &Vec<T>) -> T {
        self.dot(x, x).sqrt()
    }
}

impl<T> Indexing for Vec<T> {
    fn nrows(&self) -> usize {
        self.len()
    }
}

impl<T> Indexing for Mat<T> {
    fn nrows(&self) -> usize {
        self.nrows()
    }
}

/// Global Euclidean norm: local sum of squares, reduced across the external
/// decomposition layer when a communicator is supplied.
pub fn global_norm<C: Comm + ?Sized>(x: &[f64], comm: Option<&C>) -> f64 {
    let local: f64 = x.iter().map(|&v| v * v).sum();
    match comm {
        Some(c) => c.all_reduce(local).sqrt(),
        None => local.sqrt(),
    }
}

/// Global dot product, reduced across the external layer when present.
pub fn global_dot<C: Comm + ?Sized>(x: &[f64], y: &[f64], comm: Option<&C>) -> f64 {
    assert_eq!(x.len(), y.len(), "vectors must have the same length");
    let local: f64 = x.iter().zip(y).map(|(&a, &b)| a * b).sum();
    match comm {
        Some(c) => c.all_reduce(local),
        None => local,
    }
}
