//! Krylov solver interfaces.

use crate::error::PsiError;

/// A preconditioner application M⁻¹r ≈ A⁻¹r, used inside Krylov iterations.
pub trait PcApply<V> {
    /// Apply M⁻¹ to r, writing z = M⁻¹ r.
    fn apply(&self, r: &V, z: &mut V) -> Result<(), PsiError>;
}

pub mod gmres;
pub use gmres::GmresSolver;
