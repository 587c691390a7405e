//! Core linear-algebra and collaborator traits for psikit.

use num_complex::Complex64;

use crate::error::PsiError;

/// Matrix–vector product: y ← A x.
pub trait MatVec<V> {
    /// Compute y = A · x.
    fn matvec(&self, x: &V, y: &mut V);
}

/// Matrix-transpose–vector product: y ← Aᵗ x.
pub trait MatTransVec<V> {
    /// Compute y = Aᵗ · x.
    fn mattransvec(&self, x: &V, y: &mut V);
}

/// Inner products & norms.
pub trait InnerProduct<V> {
    /// Associated scalar type.
    type Scalar: Copy + PartialOrd + From<f64>;
    /// Compute dot(x, y).
    fn dot(&self, x: &V, y: &V) -> Self::Scalar;
    /// Compute ‖x‖₂.
    fn norm(&self, x: &V) -> Self::Scalar;
}

/// Uniform indexing into vectors (dense or sparse).
pub trait Indexing {
    /// Number of rows (or length for a vector).
    fn nrows(&self) -> usize;
}

/// Externally supplied residual function R(u), generic over the scalar type
/// so that the same system can be evaluated with real state (plain solves,
/// finite-difference perturbation) or complex state (complex-step
/// perturbation).
///
/// An evaluation must be pure with respect to global configuration: two calls
/// with the same `u` produce the same residual. A physically invalid state
/// (negative density, pressure, ...) is reported through `Err`, which is fatal
/// for the enclosing Jacobian build or Newton iteration.
pub trait ResidualFn<S> {
    /// Number of degrees of freedom; residual and state both have this length.
    fn ndof(&self) -> usize;
    /// Evaluate r = R(u). `r` has length `ndof()` on entry.
    fn eval(&self, u: &[S], r: &mut [S]) -> Result<(), PsiError>;
}

/// A system whose residual can additionally be evaluated with complex-valued
/// state, as required by complex-step perturbation. The default returns
/// `None`, which makes complex-step a setup-time configuration error rather
/// than a mid-iteration surprise.
///
/// Implementors must guarantee the complex evaluation is an analytic
/// continuation of the real one: no conjugation or absolute-value operations
/// on the state inside the residual.
pub trait PdeSystem: ResidualFn<f64> {
    /// Complex-capable view of this residual, if one exists.
    fn complex_residual(&self) -> Option<&dyn ResidualFn<Complex64>> {
        None
    }
}

/// Scalar algebra of a single Jacobian-column perturbation. One generic
/// column loop in [`crate::jacobian`] is instantiated for `f64`
/// (finite-difference) and `Complex64` (complex-step) through this trait,
/// instead of duplicating the algorithm per numeric type.
pub trait PerturbScalar: Copy {
    /// Whether the unperturbed residual R(u₀) is needed (subtractive
    /// differencing). Complex-step reads the derivative off the imaginary
    /// part and never subtracts.
    const NEEDS_BASE: bool;
    /// Embed a real state entry.
    fn lift(x: f64) -> Self;
    /// The perturbed entry for the active column.
    fn perturbed(x: f64, eps: f64) -> Self;
    /// Recover the real Jacobian entry from a perturbed (and, when
    /// `NEEDS_BASE`, base) residual entry.
    fn column_entry(r_pert: Self, r_base: Self, eps: f64) -> f64;
}

impl PerturbScalar for f64 {
    const NEEDS_BASE: bool = true;

    fn lift(x: f64) -> Self {
        x
    }

    fn perturbed(x: f64, eps: f64) -> Self {
        x + eps
    }

    fn column_entry(r_pert: Self, r_base: Self, eps: f64) -> f64 {
        (r_pert - r_base) / eps
    }
}

impl PerturbScalar for Complex64 {
    const NEEDS_BASE: bool = false;

    fn lift(x: f64) -> Self {
        Complex64::new(x, 0.0)
    }

    fn perturbed(x: f64, eps: f64) -> Self {
        // Purely imaginary perturbation: u + iε e_j.
        Complex64::new(x, eps)
    }

    fn column_entry(r_pert: Self, _r_base: Self, eps: f64) -> f64 {
        r_pert.im / eps
    }
}
