//! Restarted GMRES with left preconditioning (Saad §6.4).
//!
//! Minimizes the residual over a Krylov subspace built by the Arnoldi
//! process with modified Gram-Schmidt plus one refinement pass, Givens
//! rotations for the least-squares update, happy-breakdown detection, and a
//! divergence guard: residual growth past `dtol`·‖r₀‖ aborts the solve as
//! diverged rather than iterating to the cap.
//!
//! # References
//! - Saad, Y. (2003). Iterative Methods for Sparse Linear Systems, 2nd
//!   Edition. SIAM. §6.4

use crate::core::traits::{InnerProduct, MatVec};
use crate::error::PsiError;
use crate::solver::PcApply;
use crate::utils::convergence::{Convergence, SolveStats};
use num_traits::Float;

/// Restarted GMRES solver.
pub struct GmresSolver<T> {
    /// Number of Arnoldi vectors before restart.
    pub restart: usize,
    /// Convergence criteria.
    pub conv: Convergence<T>,
}

impl<T: Copy + Float> GmresSolver<T> {
    pub fn new(restart: usize, conv: Convergence<T>) -> Self {
        Self { restart, conv }
    }

    /// Apply previous Givens rotations to column `j` of the Hessenberg
    /// matrix, compute the rotation annihilating h[j+1][j], and update g.
    fn apply_givens(h: &mut [Vec<T>], g: &mut [T], cs: &mut [T], sn: &mut [T], j: usize, tiny: T) {
        for i in 0..j {
            let t = cs[i] * h[i][j] + sn[i] * h[i + 1][j];
            h[i + 1][j] = -sn[i] * h[i][j] + cs[i] * h[i + 1][j];
            h[i][j] = t;
        }
        let (hkk, hk1k) = (h[j][j], h[j + 1][j]);
        let r = (hkk * hkk + hk1k * hk1k).sqrt();
        if r.abs() < tiny {
            cs[j] = T::one();
            sn[j] = T::zero();
        } else {
            cs[j] = hkk / r;
            sn[j] = hk1k / r;
        }
        h[j][j] = cs[j] * hkk + sn[j] * hk1k;
        h[j + 1][j] = T::zero();
        let t = cs[j] * g[j] + sn[j] * g[j + 1];
        g[j + 1] = -sn[j] * g[j] + cs[j] * g[j + 1];
        g[j] = t;
    }

    /// Solve the upper-triangular least-squares system Hy = g, with
    /// zero-pivot protection.
    fn back_substitution(h: &[Vec<T>], g: &[T], y: &mut [T], m: usize, tiny: T) {
        for i in (0..m).rev() {
            y[i] = g[i];
            for j in (i + 1)..m {
                y[i] = y[i] - h[i][j] * y[j];
            }
            if h[i][i].abs() > tiny {
                y[i] = y[i] / h[i][i];
            } else {
                y[i] = T::zero();
            }
        }
    }

    /// Solve Ax = b, optionally left-preconditioned.
    ///
    /// `x` carries the initial guess in and the solution out. Returns
    /// [`SolveStats`] on success or when the iteration cap is reached
    /// without divergence; returns `Err(PsiError::SolveDiverged)` when the
    /// residual grows past the divergence threshold.
    pub fn solve<M, V>(
        &mut self,
        a: &M,
        pc: Option<&dyn PcApply<V>>,
        b: &V,
        x: &mut V,
    ) -> Result<SolveStats<T>, PsiError>
    where
        M: MatVec<V>,
        (): InnerProduct<V, Scalar = T>,
        V: AsRef<[T]> + AsMut<[T]> + From<Vec<T>> + Clone,
        T: num_traits::ToPrimitive,
    {
        let n = b.as_ref().len();
        let ip = ();
        let tiny = T::from(1e-14).unwrap_or_else(T::epsilon);
        let mut xk = x.as_ref().to_vec();

        let residual_at = |xk: &[T]| -> V {
            let mut ax = V::from(vec![T::zero(); n]);
            a.matvec(&V::from(xk.to_vec()), &mut ax);
            V::from(
                ax.as_ref()
                    .iter()
                    .zip(b.as_ref())
                    .map(|(&axi, &bi)| bi - axi)
                    .collect::<Vec<_>>(),
            )
        };
        let precondition = |r: &V| -> Result<V, PsiError> {
            match pc {
                Some(pc) => {
                    let mut z = V::from(vec![T::zero(); n]);
                    pc.apply(r, &mut z)?;
                    Ok(z)
                }
                None => Ok(r.clone()),
            }
        };

        let mut r0 = residual_at(&xk);
        let res0 = ip.norm(&r0);
        let mut stats = SolveStats {
            iterations: 0,
            final_residual: res0,
            converged: false,
        };
        if res0 <= self.conv.atol {
            stats.converged = true;
            *x = V::from(xk);
            return Ok(stats);
        }

        let n_outer = self.conv.max_iters.div_ceil(self.restart);
        let mut iteration = 0;
        for _ in 0..n_outer {
            // Arnoldi basis of the (preconditioned) operator.
            let z0 = precondition(&r0)?;
            let z0_norm = ip.norm(&z0);
            if z0_norm.abs() < tiny {
                break;
            }
            let mut basis: Vec<V> = Vec::with_capacity(self.restart + 1);
            basis.push(V::from(
                z0.as_ref().iter().map(|&zi| zi / z0_norm).collect::<Vec<_>>(),
            ));

            let mut h = vec![vec![T::zero(); self.restart]; self.restart + 1];
            let mut g = vec![T::zero(); self.restart + 1];
            g[0] = z0_norm;
            let mut cs = vec![T::zero(); self.restart];
            let mut sn = vec![T::zero(); self.restart];
            let mut m = 0;

            for j in 0..self.restart {
                iteration += 1;
                // w = M⁻¹ A vⱼ, orthogonalized against the basis twice
                // (modified Gram-Schmidt with one refinement pass).
                let mut av = V::from(vec![T::zero(); n]);
                a.matvec(&basis[j], &mut av);
                let mut w = precondition(&av)?;
                for i in 0..=j {
                    h[i][j] = ip.dot(&w, &basis[i]);
                    for (wk, vik) in w.as_mut().iter_mut().zip(basis[i].as_ref()) {
                        *wk = *wk - h[i][j] * *vik;
                    }
                }
                for i in 0..=j {
                    let t = ip.dot(&w, &basis[i]);
                    h[i][j] = h[i][j] + t;
                    for (wk, vik) in w.as_mut().iter_mut().zip(basis[i].as_ref()) {
                        *wk = *wk - t * *vik;
                    }
                }
                h[j + 1][j] = ip.norm(&w);
                let happy = h[j + 1][j].abs() < tiny;
                if !happy {
                    basis.push(V::from(
                        w.as_ref()
                            .iter()
                            .map(|&wi| wi / h[j + 1][j])
                            .collect::<Vec<_>>(),
                    ));
                }

                Self::apply_givens(&mut h, &mut g, &mut cs, &mut sn, j, tiny);
                let res_norm = g[j + 1].abs();
                m = j + 1;
                if self.conv.diverged(res_norm, res0) {
                    return Err(PsiError::SolveDiverged {
                        iteration,
                        residual: res_norm.to_f64().unwrap_or(f64::NAN),
                        threshold: (self.conv.dtol * res0).to_f64().unwrap_or(f64::NAN),
                    });
                }
                // `stop` also covers the iteration cap, so a restart cycle
                // longer than the remaining budget is cut short here and the
                // least-squares update below still runs.
                let (stop, s) = self.conv.check(res_norm, res0, iteration);
                stats = s;
                if stop || happy {
                    break;
                }
            }

            // Least-squares solution and update.
            let mut y = vec![T::zero(); m];
            let h_upper: Vec<Vec<T>> = h.iter().take(m).map(|row| row[..m].to_vec()).collect();
            Self::back_substitution(&h_upper, &g[..m], &mut y, m, tiny);
            for j in 0..m {
                for (xk_i, vj_i) in xk.iter_mut().zip(basis[j].as_ref()) {
                    *xk_i = *xk_i + y[j] * *vj_i;
                }
            }

            // True residual check before restarting.
            r0 = residual_at(&xk);
            let beta = ip.norm(&r0);
            stats.final_residual = beta;
            stats.converged = beta <= self.conv.rtol * res0 || beta <= self.conv.atol;
            if stats.converged || iteration >= self.conv.max_iters {
                break;
            }
        }
        *x = V::from(xk);
        Ok(stats)
    }
}
