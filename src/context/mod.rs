//! Unified preconditioner/linear-operator context.
//!
//! [`LinearContext`] is the single seam behind which the Newton driver and
//! the adjoint engine solve their correction systems without caring whether
//! the Jacobian is a dense matrix factored directly, a dense matrix handed
//! to a preconditioned Krylov solve, or nothing but a matrix-vector product
//! (matrix-free Krylov). Callers that need an explicit matrix must check the
//! capability flags before assuming one exists.

use bitflags::bitflags;
use faer::Mat;

use crate::config::{JacType, KrylovOptions};
use crate::core::traits::ResidualFn;
use crate::error::PsiError;
use crate::utils::convergence::SolveStats;

pub mod dense_lu;
pub mod krylov;
pub mod matfree;

pub use dense_lu::DenseLuContext;
pub use krylov::KrylovContext;
pub use matfree::MatFreeContext;

bitflags! {
    /// Which parts of the context are matrix-free.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MatFree: u8 {
        /// The linear operator is represented only by its action.
        const LO = 1 << 0;
        /// The preconditioner is represented only by its action.
        const PC = 1 << 1;
    }
}

/// Data a context (re)builds its operator and preconditioner from.
#[derive(Clone, Copy)]
pub enum Linearization<'a> {
    /// An explicitly assembled operator matrix.
    Matrix(&'a Mat<f64>),
    /// A linearization state; only meaningful to matrix-free contexts, which
    /// differentiate the residual around it on the fly.
    State(&'a [f64]),
}

/// Bundled preconditioner and linear operator.
///
/// `calc_lo` must be called with current data before `solve`; `calc_pc` may
/// be skipped on iterations where the caller tolerates a stale
/// preconditioner (the `recalc_prec_freq` policy).
pub trait LinearContext {
    /// (Re)build the linear operator.
    fn calc_lo(&mut self, lin: Linearization<'_>) -> Result<(), PsiError>;

    /// (Re)build the preconditioner.
    fn calc_pc(&mut self, lin: Linearization<'_>) -> Result<(), PsiError>;

    /// Combined rebuild; backends override this when operator and
    /// preconditioner share assembly work.
    fn calc_pc_and_lo(&mut self, lin: Linearization<'_>) -> Result<(), PsiError> {
        self.calc_lo(lin)?;
        self.calc_pc(lin)
    }

    /// z = M⁻¹ r.
    fn apply_pc(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsiError>;

    /// z = M⁻ᵗ r.
    fn apply_pc_transpose(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsiError>;

    /// Solve LO·x = b to the configured tolerances.
    fn solve(&mut self, b: &[f64], x: &mut [f64]) -> Result<SolveStats<f64>, PsiError>;

    /// Solve LOᵗ·x = b to the configured tolerances.
    fn solve_transpose(&mut self, b: &[f64], x: &mut [f64]) -> Result<SolveStats<f64>, PsiError>;

    /// Capability flags.
    fn matfree(&self) -> MatFree;

    fn is_lo_matfree(&self) -> bool {
        self.matfree().contains(MatFree::LO)
    }

    fn is_pc_matfree(&self) -> bool {
        self.matfree().contains(MatFree::PC)
    }

    /// Configure tolerances for iterative solves. Direct backends ignore
    /// this.
    fn set_tolerances(&mut self, opts: &KrylovOptions);

    /// Shift the operator by `shift`·I on top of the last linearization,
    /// used for pseudo-transient continuation. Zero clears the shift.
    fn set_diag_shift(&mut self, shift: f64);

    /// Release held resources (factorization workspace, cached operators).
    /// Safe to call exactly once at end of life; subsequent solves fail.
    fn free(&mut self);
}

/// Construct the context matching `jac_type`.
///
/// The residual function is only captured by the matrix-free variant, which
/// differentiates it directionally; matrix-based variants receive their
/// operator through [`Linearization::Matrix`].
pub fn context_for<'a, F>(
    jac_type: JacType,
    opts: &KrylovOptions,
    f: &'a F,
) -> Result<Box<dyn LinearContext + 'a>, PsiError>
where
    F: ResidualFn<f64> + ?Sized,
{
    match jac_type {
        JacType::Dense => Ok(Box::new(DenseLuContext::new())),
        JacType::Sparse => Err(PsiError::Config(
            "sparse jacobian storage is recognized but not backed by a solver".into(),
        )),
        JacType::MatrixFreeKrylov => Ok(Box::new(MatFreeContext::new(f, opts.clone())?)),
    }
}
