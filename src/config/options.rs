//! Strongly typed configuration surface for the solver/adjoint core.
//!
//! Every recognized option is an explicit field with a type and a default,
//! validated once at construction instead of being looked up ad hoc during
//! solves.

use std::path::PathBuf;

use crate::error::PsiError;

/// Reference perturbation size for finite-difference Jacobians.
pub const EPS_FD: f64 = 1e-6;
/// Reference perturbation size for complex-step Jacobians.
pub const EPS_CS: f64 = 1e-20;

/// Jacobian storage/solve strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacType {
    /// Dense Jacobian, direct LU solve.
    Dense,
    /// Sparse Jacobian storage. Recognized but not backed by a solver in
    /// this crate; selecting it is a configuration error.
    Sparse,
    /// No materialized Jacobian; Krylov solve through a finite-difference
    /// directional derivative of the residual.
    MatrixFreeKrylov,
}

/// Dense Jacobian perturbation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JacobianMethod {
    /// Real perturbation, (R(u+εeⱼ) − R(u))/ε. First-order in ε, subject to
    /// subtractive cancellation.
    FiniteDifference,
    /// Purely imaginary perturbation, Im(R(u+iεeⱼ))/ε. Accurate to machine
    /// precision; requires a complex-capable residual.
    ComplexStep,
}

/// Options for dense Jacobian construction.
#[derive(Debug, Clone)]
pub struct JacobianOptions {
    pub method: JacobianMethod,
    /// Perturbation size; `None` picks the reference value for the method.
    pub epsilon: Option<f64>,
}

impl Default for JacobianOptions {
    fn default() -> Self {
        Self {
            method: JacobianMethod::FiniteDifference,
            epsilon: None,
        }
    }
}

impl JacobianOptions {
    /// The effective perturbation size.
    pub fn epsilon(&self) -> f64 {
        self.epsilon.unwrap_or(match self.method {
            JacobianMethod::FiniteDifference => EPS_FD,
            JacobianMethod::ComplexStep => EPS_CS,
        })
    }

    pub fn validate(&self) -> Result<(), PsiError> {
        if let Some(eps) = self.epsilon {
            if eps <= 0.0 {
                return Err(PsiError::Config("epsilon must be positive".into()));
            }
        }
        Ok(())
    }
}

/// Newton iteration controls.
#[derive(Debug, Clone)]
pub struct NewtonOptions {
    /// Outer iteration cap; exhausting it is reported, not fatal.
    pub itermax: usize,
    /// Converged when ‖R‖/n < res_tol.
    pub res_tol: f64,
    /// Converged when ‖Δu‖/n < step_tol.
    pub step_tol: f64,
    /// Initial damping factor for the Newton update.
    pub step_fac0: f64,
    /// Multiplicative growth applied to the damping factor while the step
    /// norm is decreasing, capped at 1.
    pub step_growth: f64,
    /// Pseudo-transient continuation: shift the correction operator by
    /// I/euler_tau.
    pub globalize_euler: bool,
    pub euler_tau: f64,
    /// Rebuild the preconditioner every this many iterations; the linear
    /// operator itself is rebuilt every iteration.
    pub recalc_prec_freq: usize,
    /// When set, write the dense Jacobian of every iteration as text into
    /// this directory.
    pub dump_jacobian: Option<PathBuf>,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            itermax: 25,
            res_tol: 1e-10,
            step_tol: 1e-12,
            step_fac0: 0.5,
            step_growth: 1.1,
            globalize_euler: false,
            euler_tau: 1e3,
            recalc_prec_freq: 1,
            dump_jacobian: None,
        }
    }
}

impl NewtonOptions {
    pub fn validate(&self) -> Result<(), PsiError> {
        if self.itermax == 0 {
            return Err(PsiError::Config("itermax must be positive".into()));
        }
        if self.res_tol <= 0.0 || self.step_tol <= 0.0 {
            return Err(PsiError::Config(
                "res_tol and step_tol must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.step_fac0) || self.step_fac0 == 0.0 {
            return Err(PsiError::Config("step_fac0 must lie in (0, 1]".into()));
        }
        if self.step_growth < 1.0 {
            return Err(PsiError::Config("step_growth must be at least 1".into()));
        }
        if self.globalize_euler && self.euler_tau <= 0.0 {
            return Err(PsiError::Config("euler_tau must be positive".into()));
        }
        if self.recalc_prec_freq == 0 {
            return Err(PsiError::Config(
                "recalc_prec_freq must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Krylov solve tolerances (see [`crate::utils::Convergence`]) plus the
/// adaptive-tolerance factor used by the Newton driver.
#[derive(Debug, Clone)]
pub struct KrylovOptions {
    pub rtol: f64,
    pub atol: f64,
    /// Divergence threshold relative to the initial linear residual.
    pub dtol: f64,
    pub itermax: usize,
    /// Adaptive-tolerance factor: the Newton driver solves iteration k with
    /// rtol tightened to min(rtol, gamma·‖R_k‖/‖R₀‖).
    pub gamma: f64,
    /// GMRES restart length.
    pub restart: usize,
}

impl Default for KrylovOptions {
    fn default() -> Self {
        Self {
            rtol: 1e-8,
            atol: 1e-50,
            dtol: 1e5,
            itermax: 1000,
            gamma: 0.9,
            restart: 30,
        }
    }
}

impl KrylovOptions {
    pub fn validate(&self) -> Result<(), PsiError> {
        if self.rtol <= 0.0 || self.atol < 0.0 || self.dtol <= 1.0 {
            return Err(PsiError::Config(
                "krylov tolerances must satisfy rtol > 0, atol >= 0, dtol > 1".into(),
            ));
        }
        if self.itermax == 0 || self.restart == 0 {
            return Err(PsiError::Config(
                "krylov itermax and restart must be positive".into(),
            ));
        }
        if self.gamma <= 0.0 || self.gamma > 1.0 {
            return Err(PsiError::Config("gamma must lie in (0, 1]".into()));
        }
        Ok(())
    }
}

/// Full configuration for one solve session.
#[derive(Debug, Clone, Default)]
pub struct SolverOptions {
    pub jac_type: Option<JacTypeOption>,
    pub jacobian: JacobianOptions,
    pub newton: NewtonOptions,
    pub krylov: KrylovOptions,
}

/// Wrapper so `SolverOptions` can default to dense without an `Option` dance
/// at every use site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JacTypeOption(pub JacType);

impl Default for JacTypeOption {
    fn default() -> Self {
        JacTypeOption(JacType::Dense)
    }
}

impl SolverOptions {
    /// The effective Jacobian strategy.
    pub fn jac_type(&self) -> JacType {
        self.jac_type.unwrap_or_default().0
    }

    /// Reject inconsistent settings before any iteration begins. The driver
    /// and context constructors run the per-section validators themselves;
    /// this covers a fully assembled configuration in one call.
    pub fn validate(&self) -> Result<(), PsiError> {
        self.newton.validate()?;
        self.krylov.validate()?;
        self.jacobian.validate()?;
        if self.jac_type() == JacType::Sparse {
            return Err(PsiError::Config(
                "sparse jacobian storage is recognized but not backed by a solver".into(),
            ));
        }
        Ok(())
    }
}
