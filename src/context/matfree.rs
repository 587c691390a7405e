//! Matrix-free Krylov context.
//!
//! No Jacobian is ever assembled: the linear operator's action J·v is the
//! finite-difference directional derivative of the residual around the
//! current linearization state,
//!
//! ```text
//!   J v ≈ (R(u + h v) − R(u)) / h,   h = ε (1 + ‖u‖) / ‖v‖
//! ```
//!
//! `calc_lo` records the state and evaluates the base residual once; each
//! Krylov iteration then costs one residual evaluation. The preconditioner
//! is the identity and both capability flags report matrix-free.
//!
//! Transpose solves are structurally unavailable here: a directional
//! derivative gives J·v but not Jᵗ·v. Adjoint sweeps need a matrix-based
//! context.

use std::cell::RefCell;

use crate::config::KrylovOptions;
use crate::context::{Linearization, LinearContext, MatFree};
use crate::core::traits::{MatVec, ResidualFn};
use crate::error::PsiError;
use crate::solver::GmresSolver;
use crate::utils::convergence::{Convergence, SolveStats};

pub struct MatFreeContext<'a, F: ResidualFn<f64> + ?Sized> {
    f: &'a F,
    /// Linearization state and its residual, set by `calc_lo`.
    u: Option<Vec<f64>>,
    r_base: Vec<f64>,
    /// Relative perturbation for the directional derivative.
    eps: f64,
    opts: KrylovOptions,
    shift: f64,
    freed: bool,
}

/// Directional-derivative operator handed to the GMRES loop. `MatVec` is
/// infallible, so a residual failure inside a Krylov iteration is parked in
/// the cell and surfaced after the solve returns.
struct FdDirectionalOp<'b, F: ResidualFn<f64> + ?Sized> {
    f: &'b F,
    u: &'b [f64],
    r_base: &'b [f64],
    u_norm: f64,
    eps: f64,
    shift: f64,
    failure: RefCell<Option<PsiError>>,
}

impl<'b, F: ResidualFn<f64> + ?Sized> MatVec<Vec<f64>> for FdDirectionalOp<'b, F> {
    fn matvec(&self, x: &Vec<f64>, y: &mut Vec<f64>) {
        let v_norm = x.iter().map(|&v| v * v).sum::<f64>().sqrt();
        if v_norm == 0.0 {
            y.iter_mut().for_each(|yi| *yi = 0.0);
            return;
        }
        let h = self.eps * (1.0 + self.u_norm) / v_norm;
        let perturbed: Vec<f64> = self.u.iter().zip(x).map(|(&ui, &vi)| ui + h * vi).collect();
        let mut r_pert = vec![0.0; self.u.len()];
        if let Err(e) = self.f.eval(&perturbed, &mut r_pert) {
            *self.failure.borrow_mut() = Some(e);
            y.iter_mut().for_each(|yi| *yi = 0.0);
            return;
        }
        for (((yi, &rp), &rb), &vi) in y.iter_mut().zip(&r_pert).zip(self.r_base).zip(x) {
            *yi = (rp - rb) / h + self.shift * vi;
        }
    }
}

impl<'a, F: ResidualFn<f64> + ?Sized> MatFreeContext<'a, F> {
    pub fn new(f: &'a F, opts: KrylovOptions) -> Result<Self, PsiError> {
        opts.validate()?;
        Ok(Self {
            f,
            u: None,
            r_base: Vec::new(),
            // sqrt of machine epsilon balances truncation against rounding
            eps: f64::EPSILON.sqrt(),
            opts,
            shift: 0.0,
            freed: false,
        })
    }

    /// Override the directional-derivative perturbation size.
    pub fn with_epsilon(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    fn gmres(&self) -> GmresSolver<f64> {
        GmresSolver::new(
            self.opts.restart,
            Convergence {
                rtol: self.opts.rtol,
                atol: self.opts.atol,
                dtol: self.opts.dtol,
                max_iters: self.opts.itermax,
            },
        )
    }
}

impl<'a, F: ResidualFn<f64> + ?Sized> LinearContext for MatFreeContext<'a, F> {
    fn calc_lo(&mut self, lin: Linearization<'_>) -> Result<(), PsiError> {
        if self.freed {
            return Err(PsiError::SolveError("context has been freed".into()));
        }
        match lin {
            Linearization::State(u) => {
                let mut r = vec![0.0; u.len()];
                self.f.eval(u, &mut r)?;
                self.u = Some(u.to_vec());
                self.r_base = r;
                Ok(())
            }
            Linearization::Matrix(_) => Err(PsiError::Unsupported(
                "matrix-free context linearizes around a state, not a matrix",
            )),
        }
    }

    fn calc_pc(&mut self, _lin: Linearization<'_>) -> Result<(), PsiError> {
        // Identity preconditioner; nothing to build.
        Ok(())
    }

    fn apply_pc(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsiError> {
        z.clone_from_slice(r);
        Ok(())
    }

    fn apply_pc_transpose(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsiError> {
        z.clone_from_slice(r);
        Ok(())
    }

    fn solve(&mut self, b: &[f64], x: &mut [f64]) -> Result<SolveStats<f64>, PsiError> {
        let u = self
            .u
            .as_ref()
            .ok_or_else(|| PsiError::SolveError("calc_lo has not been called".into()))?;
        let op = FdDirectionalOp {
            f: self.f,
            u,
            r_base: &self.r_base,
            u_norm: u.iter().map(|&v| v * v).sum::<f64>().sqrt(),
            eps: self.eps,
            shift: self.shift,
            failure: RefCell::new(None),
        };
        let b_v = b.to_vec();
        let mut x_v = x.to_vec();
        let stats = self.gmres().solve(&op, None, &b_v, &mut x_v)?;
        if let Some(e) = op.failure.into_inner() {
            return Err(e);
        }
        x.clone_from_slice(&x_v);
        Ok(stats)
    }

    fn solve_transpose(&mut self, _b: &[f64], _x: &mut [f64]) -> Result<SolveStats<f64>, PsiError> {
        Err(PsiError::Unsupported(
            "transpose action is unavailable for a matrix-free operator",
        ))
    }

    fn matfree(&self) -> MatFree {
        MatFree::LO | MatFree::PC
    }

    fn set_tolerances(&mut self, opts: &KrylovOptions) {
        self.opts = opts.clone();
    }

    fn set_diag_shift(&mut self, shift: f64) {
        self.shift = shift;
    }

    fn free(&mut self) {
        self.u = None;
        self.r_base = Vec::new();
        self.freed = true;
    }
}
