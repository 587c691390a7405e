//! Damped Newton iteration for one (pseudo-)time step.
//!
//! Per iteration: evaluate the residual, test convergence, refresh the
//! linear operator (and, on schedule, the preconditioner), solve for the
//! correction, apply a damped update, and adapt the damping factor. The
//! fixed initial damping guards against divergence from a poor early
//! Jacobian estimate (under finite-difference perturbation the cancellation
//! error is proportionally worst far from the solution), and the adaptive
//! growth recovers full Newton steps once progress is monotone.
//!
//! Exhausting `itermax` is not a failure: the last iterate is returned with
//! [`NewtonStatus::MaxIters`] and the final step size and residual norm in
//! the report, leaving the call-it-a-failure decision to the caller.

use crate::config::{KrylovOptions, NewtonOptions};
use crate::context::{Linearization, LinearContext};
use crate::core::traits::ResidualFn;
use crate::core::wrappers::global_norm;
use crate::error::PsiError;
use crate::jacobian::JacobianBuilder;
use crate::parallel::Comm;
use crate::utils::dump;

/// Terminal state of a Newton solve. `Diverged` is reported through
/// `Err(PsiError::SolveDiverged)` by the linear layer instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewtonStatus {
    Converged,
    MaxIters,
}

/// Outcome of one Newton solve; `iterations` counts applied updates.
#[derive(Debug, Clone)]
pub struct NewtonReport {
    pub status: NewtonStatus,
    pub iterations: usize,
    /// ‖R‖/n at exit.
    pub res_norm: f64,
    /// ‖Δu‖/n of the last applied update.
    pub step_norm: f64,
    /// Damping factor at exit.
    pub step_fac: f64,
}

pub struct NewtonDriver {
    pub opts: NewtonOptions,
    pub krylov: KrylovOptions,
}

impl NewtonDriver {
    /// Validates both option sets; a rejected configuration never reaches
    /// the iteration loop.
    pub fn new(opts: NewtonOptions, krylov: KrylovOptions) -> Result<Self, PsiError> {
        opts.validate()?;
        krylov.validate()?;
        Ok(Self { opts, krylov })
    }

    /// Drive `u` toward R(u) = 0.
    ///
    /// The correction systems are solved through `ctx`; when the context is
    /// matrix-free the Jacobian builder is bypassed and the context
    /// linearizes around the current state instead. Global norms are reduced
    /// through `comm` when supplied.
    pub fn solve<F, C, P>(
        &self,
        f: &F,
        jac: &JacobianBuilder<'_>,
        ctx: &mut C,
        u: &mut [f64],
        comm: Option<&P>,
    ) -> Result<NewtonReport, PsiError>
    where
        F: ResidualFn<f64> + ?Sized,
        C: LinearContext + ?Sized,
        P: Comm + ?Sized,
    {
        let n = u.len();
        let nf = n as f64;
        let mut r = vec![0.0; n];
        let mut du = vec![0.0; n];
        let mut step_fac = self.opts.step_fac0;
        let mut prev_step_norm = f64::INFINITY;
        let mut step_norm = f64::INFINITY;
        let mut res0 = None;
        let mut iterations = 0;

        loop {
            f.eval(u, &mut r)?;
            let res_norm = global_norm(&r, comm) / nf;
            let res0 = *res0.get_or_insert(res_norm);

            if res_norm < self.opts.res_tol {
                return Ok(NewtonReport {
                    status: NewtonStatus::Converged,
                    iterations,
                    res_norm,
                    step_norm: if iterations == 0 { 0.0 } else { step_norm },
                    step_fac,
                });
            }
            if iterations >= self.opts.itermax {
                // Non-fatal: report the exhausted-iteration condition and
                // hand back the last iterate.
                return Ok(NewtonReport {
                    status: NewtonStatus::MaxIters,
                    iterations,
                    res_norm,
                    step_norm,
                    step_fac,
                });
            }

            let rebuild_pc = iterations % self.opts.recalc_prec_freq == 0;
            if ctx.is_lo_matfree() {
                let lin = Linearization::State(u);
                if rebuild_pc {
                    ctx.calc_pc_and_lo(lin)?;
                } else {
                    ctx.calc_lo(lin)?;
                }
            } else {
                let j = jac.build(u)?;
                if let Some(dir) = &self.opts.dump_jacobian {
                    dump::write_dense(&dir.join(format!("jac_iter_{iterations}.txt")), &j)?;
                }
                let lin = Linearization::Matrix(&j);
                if rebuild_pc {
                    ctx.calc_pc_and_lo(lin)?;
                } else {
                    ctx.calc_lo(lin)?;
                }
            }
            if self.opts.globalize_euler {
                ctx.set_diag_shift(1.0 / self.opts.euler_tau);
            }

            // Tighten the Krylov tolerance as the outer residual drops.
            let mut ktol = self.krylov.clone();
            ktol.rtol = ktol
                .rtol
                .min(self.krylov.gamma * res_norm / res0)
                .max(ktol.atol);
            ctx.set_tolerances(&ktol);

            let rhs: Vec<f64> = r.iter().map(|&ri| -ri).collect();
            du.iter_mut().for_each(|d| *d = 0.0);
            ctx.solve(&rhs, &mut du)?;

            for (ui, &di) in u.iter_mut().zip(&du) {
                *ui += step_fac * di;
            }
            iterations += 1;

            step_norm = global_norm(&du, comm) / nf;
            if step_norm < self.opts.step_tol {
                let res_norm = {
                    f.eval(u, &mut r)?;
                    global_norm(&r, comm) / nf
                };
                return Ok(NewtonReport {
                    status: NewtonStatus::Converged,
                    iterations,
                    res_norm,
                    step_norm,
                    step_fac,
                });
            }
            if step_norm < prev_step_norm {
                step_fac = (step_fac * self.opts.step_growth).min(1.0);
            }
            prev_step_norm = step_norm;
        }
    }
}
