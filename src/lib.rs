//! psikit: Newton/Krylov solver stack and Crank-Nicolson discrete-adjoint engine
//!
//! This crate provides the PDE-agnostic machinery for converging a nonlinear
//! residual system and computing sensitivities of an objective functional by
//! the time-accurate discrete adjoint: dense Jacobian construction by
//! finite-difference or complex-step perturbation, a unified
//! preconditioner/linear-operator context over direct, Krylov and
//! matrix-free backends, a damped Newton driver, an exhaustive per-step
//! checkpoint store, and the backward Crank-Nicolson adjoint sweep.
//! Discretization kernels, meshes and I/O are external collaborators
//! reached through the residual and objective traits.

pub mod parallel;

pub mod adjoint;
pub mod checkpoint;
pub mod config;
pub mod context;
pub mod core;
pub mod error;
pub mod jacobian;
pub mod newton;
pub mod solver;
pub mod utils;

// Re-exports for convenience
pub use adjoint::{AdjointEngine, AdjointSweep, ObjectiveGradient, ParameterPartial};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::*;
pub use context::{
    DenseLuContext, KrylovContext, Linearization, LinearContext, MatFree, MatFreeContext,
    context_for,
};
pub use crate::core::traits::{MatTransVec, MatVec, PdeSystem, PerturbScalar, ResidualFn};
pub use crate::core::wrappers::{TransposeOp, global_dot, global_norm};
pub use error::PsiError;
pub use jacobian::{JacobianBuilder, dense_jacobian};
pub use newton::{NewtonDriver, NewtonReport, NewtonStatus};
pub use solver::{GmresSolver, PcApply};
pub use utils::convergence::{Convergence, SolveStats};
