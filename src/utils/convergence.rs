//! Convergence tracking & tolerance checks for iterative solvers.

use num_traits::Float;

/// Stopping criteria for a Krylov solve: relative and absolute residual
/// tolerances, a divergence threshold, and an iteration cap.
#[derive(Clone, Debug)]
pub struct Convergence<T> {
    /// Relative tolerance: stop when ‖r‖ ≤ rtol·‖r₀‖.
    pub rtol: T,
    /// Absolute tolerance: stop when ‖r‖ ≤ atol.
    pub atol: T,
    /// Divergence threshold: abort when ‖r‖ > dtol·‖r₀‖.
    pub dtol: T,
    pub max_iters: usize,
}

#[derive(Clone, Debug)]
pub struct SolveStats<T> {
    pub iterations: usize,
    pub final_residual: T,
    pub converged: bool,
}

impl<T: Copy + Float> Convergence<T> {
    /// Returns (should_stop, stats) given current `res_norm` and iteration `i`.
    pub fn check(&self, res_norm: T, res0_norm: T, i: usize) -> (bool, SolveStats<T>) {
        let rel = if res0_norm > T::zero() {
            res_norm / res0_norm
        } else {
            res_norm
        };
        let converged = rel <= self.rtol || res_norm <= self.atol;
        let stop = converged || i >= self.max_iters;
        (
            stop,
            SolveStats {
                iterations: i,
                final_residual: res_norm,
                converged,
            },
        )
    }

    /// True when residual growth has crossed the divergence threshold.
    pub fn diverged(&self, res_norm: T, res0_norm: T) -> bool {
        res_norm > self.dtol * res0_norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_tolerance_converges_even_without_relative_drop() {
        let conv = Convergence {
            rtol: 1e-30,
            atol: 1e-8,
            dtol: 1e5,
            max_iters: 10,
        };
        let (stop, stats) = conv.check(1e-9, 1e-9, 1);
        assert!(stop && stats.converged);
    }

    #[test]
    fn divergence_threshold_trips_on_growth() {
        let conv = Convergence {
            rtol: 1e-8,
            atol: 1e-50,
            dtol: 1e3,
            max_iters: 10,
        };
        assert!(conv.diverged(2e3, 1.0));
        assert!(!conv.diverged(0.5, 1.0));
    }
}
