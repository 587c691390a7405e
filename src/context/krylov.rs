//! Matrix-based Krylov context: GMRES over an assembled dense operator with
//! Jacobi (diagonal) preconditioning.
//!
//! Transpose systems go through [`TransposeOp`] so the same GMRES core
//! serves forward Newton corrections and reverse-sweep adjoint solves. The
//! Jacobi preconditioner is diagonal, so its transpose application is the
//! application itself.

use faer::Mat;

use crate::config::KrylovOptions;
use crate::context::{Linearization, LinearContext, MatFree};
use crate::core::wrappers::TransposeOp;
use crate::error::PsiError;
use crate::solver::{GmresSolver, PcApply};
use crate::utils::convergence::{Convergence, SolveStats};

pub struct KrylovContext {
    a: Option<Mat<f64>>,
    inv_diag: Vec<f64>,
    opts: KrylovOptions,
    shift: f64,
}

/// Borrowed Jacobi application handed to the GMRES loop.
struct JacobiApply<'a>(&'a [f64]);

impl<'a> PcApply<Vec<f64>> for JacobiApply<'a> {
    fn apply(&self, r: &Vec<f64>, z: &mut Vec<f64>) -> Result<(), PsiError> {
        for ((zi, &ri), &di) in z.iter_mut().zip(r).zip(self.0) {
            *zi = di * ri;
        }
        Ok(())
    }
}

impl KrylovContext {
    pub fn new(opts: KrylovOptions) -> Result<Self, PsiError> {
        opts.validate()?;
        Ok(Self {
            a: None,
            inv_diag: Vec::new(),
            opts,
            shift: 0.0,
        })
    }

    fn operator(&self) -> Result<Mat<f64>, PsiError> {
        let a = self
            .a
            .as_ref()
            .ok_or_else(|| PsiError::SolveError("calc_lo has not been called".into()))?;
        Ok(if self.shift != 0.0 {
            let s = self.shift;
            Mat::from_fn(a.nrows(), a.ncols(), |i, j| {
                a[(i, j)] + if i == j { s } else { 0.0 }
            })
        } else {
            a.clone()
        })
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

impl LinearContext for KrylovContext {
    fn calc_lo(&mut self, lin: Linearization<'_>) -> Result<(), PsiError> {
        match lin {
            Linearization::Matrix(a) => {
                self.a = Some(a.clone());
                Ok(())
            }
            Linearization::State(_) => Err(PsiError::Unsupported(
                "matrix-based Krylov context requires an assembled matrix",
            )),
        }
    }

    fn calc_pc(&mut self, lin: Linearization<'_>) -> Result<(), PsiError> {
        let a = match lin {
            Linearization::Matrix(a) => a,
            Linearization::State(_) => {
                return Err(PsiError::Unsupported(
                    "matrix-based Krylov context requires an assembled matrix",
                ));
            }
        };
        let s = self.shift;
        self.inv_diag = (0..a.nrows())
            .map(|i| {
                let d = a[(i, i)] + s;
                if d != 0.0 { 1.0 / d } else { 0.0 }
            })
            .collect();
        Ok(())
    }

    fn apply_pc(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsiError> {
        if self.inv_diag.is_empty() {
            return Err(PsiError::SolveError("calc_pc has not been called".into()));
        }
        for ((zi, &ri), &di) in z.iter_mut().zip(r).zip(&self.inv_diag) {
            *zi = di * ri;
        }
        Ok(())
    }

    fn apply_pc_transpose(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsiError> {
        // Diagonal preconditioner: Mᵗ = M.
        self.apply_pc(r, z)
    }

    fn solve(&mut self, b: &[f64], x: &mut [f64]) -> Result<SolveStats<f64>, PsiError> {
        let a = self.operator()?;
        let b_v = b.to_vec();
        let mut x_v = x.to_vec();
        let stats = {
            let pc = JacobiApply(&self.inv_diag);
            let pc_opt: Option<&dyn PcApply<Vec<f64>>> =
                if self.inv_diag.is_empty() { None } else { Some(&pc) };
            self.gmres().solve(&a, pc_opt, &b_v, &mut x_v)?
        };
        x.clone_from_slice(&x_v);
        Ok(stats)
    }

    fn solve_transpose(&mut self, b: &[f64], x: &mut [f64]) -> Result<SolveStats<f64>, PsiError> {
        let a = self.operator()?;
        let at = TransposeOp(&a);
        let b_v = b.to_vec();
        let mut x_v = x.to_vec();
        let stats = {
            let pc = JacobiApply(&self.inv_diag);
            let pc_opt: Option<&dyn PcApply<Vec<f64>>> =
                if self.inv_diag.is_empty() { None } else { Some(&pc) };
            self.gmres().solve(&at, pc_opt, &b_v, &mut x_v)?
        };
        x.clone_from_slice(&x_v);
        Ok(stats)
    }

    fn matfree(&self) -> MatFree {
        MatFree::empty()
    }

    fn set_tolerances(&mut self, opts: &KrylovOptions) {
        self.opts = opts.clone();
    }

    fn set_diag_shift(&mut self, shift: f64) {
        self.shift = shift;
    }

    fn free(&mut self) {
        self.a = None;
        self.inv_diag.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn test_matrix() -> Mat<f64> {
        let rows = [
            [4.0, 1.0, 0.0, 0.0],
            [1.0, 3.0, 1.0, 0.0],
            [0.0, 1.0, 2.0, 1.0],
            [0.0, 0.0, 1.0, 3.0],
        ];
        Mat::from_fn(4, 4, |i, j| rows[i][j])
    }

    #[test]
    fn zero_itermax_is_rejected_at_construction() {
        let opts = KrylovOptions {
            itermax: 0,
            ..Default::default()
        };
        assert!(matches!(
            KrylovContext::new(opts),
            Err(PsiError::Config(_))
        ));
    }

    #[test]
    fn krylov_context_solves_forward_and_transpose() {
        let a = test_matrix();
        let x_true = vec![1.0, 2.0, 3.0, 4.0];
        let mut b = vec![0.0; 4];
        use crate::core::traits::{MatTransVec, MatVec};
        a.matvec(&x_true, &mut b);
        let mut ctx = KrylovContext::new(KrylovOptions::default()).unwrap();
        ctx.calc_pc_and_lo(Linearization::Matrix(&a)).unwrap();
        let mut x = vec![0.0; 4];
        let stats = ctx.solve(&b, &mut x).unwrap();
        assert!(stats.converged);
        for (xi, ei) in x.iter().zip(&x_true) {
            assert_abs_diff_eq!(xi, ei, epsilon = 1e-6);
        }

        let mut bt = vec![0.0; 4];
        a.mattransvec(&x_true, &mut bt);
        let mut xt = vec![0.0; 4];
        let stats = ctx.solve_transpose(&bt, &mut xt).unwrap();
        assert!(stats.converged);
        for (xi, ei) in xt.iter().zip(&x_true) {
            assert_abs_diff_eq!(xi, ei, epsilon = 1e-6);
        }
    }

    #[test]
    fn stale_preconditioner_still_converges() {
        // calc_pc once, then swap in a different operator without rebuilding
        // the preconditioner: the recalc_prec_freq reuse pattern.
        let a = test_matrix();
        let mut ctx = KrylovContext::new(KrylovOptions::default()).unwrap();
        ctx.calc_pc_and_lo(Linearization::Matrix(&a)).unwrap();
        let scaled = Mat::from_fn(4, 4, |i, j| 2.0 * a[(i, j)]);
        ctx.calc_lo(Linearization::Matrix(&scaled)).unwrap();
        let b = vec![1.0, 0.0, 0.0, 1.0];
        let mut x = vec![0.0; 4];
        let stats = ctx.solve(&b, &mut x).unwrap();
        assert!(stats.converged);
        use crate::core::traits::MatVec;
        let mut ax = vec![0.0; 4];
        scaled.matvec(&x, &mut ax);
        for (axi, bi) in ax.iter().zip(&b) {
            assert_abs_diff_eq!(axi, bi, epsilon = 1e-6);
        }
    }
}
