//! Direct dense context: LU with full pivoting from Faer.
//!
//! The operator matrix is factored once per `calc_lo` and the factorization
//! is cached for repeated forward and transpose solves. The preconditioner
//! is the factorization itself (exact), so `apply_pc` and `solve` coincide
//! up to the zero-residual stats.

use faer::linalg::solvers::{FullPivLu, SolveCore};
use faer::{Conj, Mat, MatMut};

use crate::config::KrylovOptions;
use crate::context::{Linearization, LinearContext, MatFree};
use crate::error::PsiError;
use crate::utils::convergence::SolveStats;

pub struct DenseLuContext {
    factor: Option<FullPivLu<f64>>,
    shift: f64,
    /// Last assembled matrix, kept so a shift change can refactor without a
    /// fresh `calc_lo`.
    a: Option<Mat<f64>>,
}

impl DenseLuContext {
    pub fn new() -> Self {
        Self {
            factor: None,
            shift: 0.0,
            a: None,
        }
    }

    fn refactor(&mut self) -> Result<(), PsiError> {
        let a = self
            .a
            .as_ref()
            .ok_or_else(|| PsiError::SolveError("calc_lo has not been called".into()))?;
        let shifted = if self.shift != 0.0 {
            let s = self.shift;
            Mat::from_fn(a.nrows(), a.ncols(), |i, j| {
                a[(i, j)] + if i == j { s } else { 0.0 }
            })
        } else {
            a.clone()
        };
        self.factor = Some(FullPivLu::new(shifted.as_ref()));
        Ok(())
    }

    fn factor(&self) -> Result<&FullPivLu<f64>, PsiError> {
        self.factor
            .as_ref()
            .ok_or_else(|| PsiError::SolveError("calc_lo has not been called".into()))
    }

    fn solve_with(&self, b: &[f64], x: &mut [f64], transpose: bool) -> Result<SolveStats<f64>, PsiError> {
        let factor = self.factor()?;
        x.clone_from_slice(b);
        let n = x.len();
        let x_mat = MatMut::from_column_major_slice_mut(x, n, 1);
        if transpose {
            factor.solve_transpose_in_place_with_conj(Conj::No, x_mat);
        } else {
            factor.solve_in_place_with_conj(Conj::No, x_mat);
        }
        Ok(SolveStats {
            iterations: 1,
            final_residual: 0.0,
            converged: true,
        })
    }
}

impl Default for DenseLuContext {
    fn default() -> Self {
        Self::new()
    }
}

impl LinearContext for DenseLuContext {
    fn calc_lo(&mut self, lin: Linearization<'_>) -> Result<(), PsiError> {
        match lin {
            Linearization::Matrix(a) => {
                self.a = Some(a.clone());
                self.refactor()
            }
            Linearization::State(_) => Err(PsiError::Unsupported(
                "dense LU context requires an assembled matrix",
            )),
        }
    }

    fn calc_pc(&mut self, _lin: Linearization<'_>) -> Result<(), PsiError> {
        // The LU factorization is the preconditioner.
        Ok(())
    }

    fn apply_pc(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsiError> {
        self.solve_with(r, z, false).map(|_| ())
    }

    fn apply_pc_transpose(&self, r: &[f64], z: &mut [f64]) -> Result<(), PsiError> {
        self.solve_with(r, z, true).map(|_| ())
    }

    fn solve(&mut self, b: &[f64], x: &mut [f64]) -> Result<SolveStats<f64>, PsiError> {
        self.solve_with(b, x, false)
    }

    fn solve_transpose(&mut self, b: &[f64], x: &mut [f64]) -> Result<SolveStats<f64>, PsiError> {
        self.solve_with(b, x, true)
    }

    fn matfree(&self) -> MatFree {
        MatFree::empty()
    }

    fn set_tolerances(&mut self, _opts: &KrylovOptions) {
        // Direct solve; tolerances do not apply.
    }

    fn set_diag_shift(&mut self, shift: f64) {
        if shift != self.shift {
            self.shift = shift;
            if self.a.is_some() {
                // a is Some, refactor cannot fail here
                let _ = self.refactor();
            }
        }
    }

    fn free(&mut self) {
        self.factor = None;
        self.a = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn context_with(a: &Mat<f64>) -> DenseLuContext {
        let mut ctx = DenseLuContext::new();
        ctx.calc_pc_and_lo(Linearization::Matrix(a)).unwrap();
        ctx
    }

    #[test]
    fn lu_solves_dense_system() {
        // [[2,1,1],[1,3,2],[1,0,0]] x = [4,5,6] has solution [6,15,-23]
        let a = Mat::from_fn(3, 3, |i, j| match (i, j) {
            (0, 0) => 2.0, (0, 1) => 1.0, (0, 2) => 1.0,
            (1, 0) => 1.0, (1, 1) => 3.0, (1, 2) => 2.0,
            (2, 0) => 1.0, _ => 0.0,
        });
        let mut ctx = context_with(&a);
        let b = vec![4.0, 5.0, 6.0];
        let mut x = vec![0.0; 3];
        let stats = ctx.solve(&b, &mut x).unwrap();
        assert!(stats.converged);
        for (xi, ei) in x.iter().zip(&[6.0, 15.0, -23.0]) {
            assert_abs_diff_eq!(xi, ei, epsilon = 1e-10);
        }
    }

    #[test]
    fn transpose_solve_matches_transposed_system() {
        let a = Mat::from_fn(2, 2, |i, j| [[2.0, 1.0], [0.0, 3.0]][i][j]);
        let at = Mat::from_fn(2, 2, |i, j| a[(j, i)]);
        let b = vec![1.0, 2.0];
        let mut ctx = context_with(&a);
        let mut x_t = vec![0.0; 2];
        ctx.solve_transpose(&b, &mut x_t).unwrap();
        let mut ctx2 = context_with(&at);
        let mut x_ref = vec![0.0; 2];
        ctx2.solve(&b, &mut x_ref).unwrap();
        for (xi, ri) in x_t.iter().zip(&x_ref) {
            assert_abs_diff_eq!(xi, ri, epsilon = 1e-12);
        }
    }

    #[test]
    fn diag_shift_perturbs_the_operator() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 0.0 });
        let mut ctx = context_with(&a);
        ctx.set_diag_shift(1.0); // operator becomes 2 I
        let b = vec![2.0, 4.0];
        let mut x = vec![0.0; 2];
        ctx.solve(&b, &mut x).unwrap();
        assert_abs_diff_eq!(x[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 2.0, epsilon = 1e-12);
    }

    #[test]
    fn solve_after_free_fails() {
        let a = Mat::from_fn(2, 2, |i, j| if i == j { 1.0 } else { 0.0 });
        let mut ctx = context_with(&a);
        ctx.free();
        let mut x = vec![0.0; 2];
        assert!(matches!(
            ctx.solve(&[1.0, 1.0], &mut x),
            Err(PsiError::SolveError(_))
        ));
    }
}
