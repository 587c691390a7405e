//! End-to-end scalar advection sensitivity check.
//!
//! Forward: u_t + c·u_x = 0 on [0,1] with upwind differencing and an inflow
//! boundary u(0,t) = A·sin(ωt), integrated by Crank-Nicolson through the
//! Newton driver, checkpointing every step. Objective: J = Σᵢ Δt·u(x_probe)²
//! at the outflow node. dJ/dA is computed once via the adjoint sweep
//! (ψᵗ·(−∂R/∂A)) and once by direct finite differencing of the forward
//! solve on A.
//!
//! The strict-equality assertion is a known-failing regression: the
//! discrepancy shows up already at the terminal-condition step and its
//! origin is unresolved. It is kept ignored as a marker, not assumed fixed.
//! The smoke test below it asserts only what does hold: the sweep runs, the
//! adjoint trajectory is finite and nonzero.

use psikit::{
    AdjointEngine, CheckpointStore, DenseLuContext, JacobianBuilder, JacobianOptions,
    KrylovOptions, NewtonDriver, NewtonOptions, NewtonStatus, ObjectiveGradient,
    ParameterPartial, PdeSystem, PsiError, ResidualFn,
};
use psikit::parallel::SerialComm;

const N: usize = 16;
const C: f64 = 1.0;
const OMEGA: f64 = 4.0;
const DT: f64 = 0.02;
const STEPS: usize = 25;
const PROBE: usize = N - 1;

fn dx() -> f64 {
    1.0 / N as f64
}

/// Spatial residual R(u) at time t: first-order upwind advection with the
/// inflow boundary value A·sin(ωt) feeding node 0.
fn spatial_residual(u: &[f64], t: f64, a: f64, r: &mut [f64]) {
    let inv_dx = 1.0 / dx();
    r[0] = -C * inv_dx * (u[0] - a * (OMEGA * t).sin());
    for k in 1..N {
        r[k] = -C * inv_dx * (u[k] - u[k - 1]);
    }
}

/// ∂R/∂u, independent of t and A for this linear scheme.
fn spatial_jacobian() -> faer::Mat<f64> {
    let inv_dx = 1.0 / dx();
    faer::Mat::from_fn(N, N, |i, j| {
        if i == j {
            -C * inv_dx
        } else if j + 1 == i {
            C * inv_dx
        } else {
            0.0
        }
    })
}

/// Per-step CN residual F(v) = v − u_prev − Δt/2·(R(v, t) + R(u_prev, t−Δt)).
struct CnStepResidual {
    u_prev: Vec<f64>,
    t: f64,
    amplitude: f64,
}

impl ResidualFn<f64> for CnStepResidual {
    fn ndof(&self) -> usize {
        N
    }
    fn eval(&self, v: &[f64], r: &mut [f64]) -> Result<(), PsiError> {
        let mut r_new = vec![0.0; N];
        let mut r_old = vec![0.0; N];
        spatial_residual(v, self.t, self.amplitude, &mut r_new);
        spatial_residual(&self.u_prev, self.t - DT, self.amplitude, &mut r_old);
        for k in 0..N {
            r[k] = v[k] - self.u_prev[k] - 0.5 * DT * (r_new[k] + r_old[k]);
        }
        Ok(())
    }
}
impl PdeSystem for CnStepResidual {}

/// Run the CN forward sweep, returning the objective and a filled store.
fn forward(amplitude: f64) -> (f64, CheckpointStore) {
    let driver = NewtonDriver::new(
        NewtonOptions {
            step_fac0: 1.0,
            res_tol: 1e-12,
            itermax: 20,
            ..Default::default()
        },
        KrylovOptions::default(),
    )
    .unwrap();
    let mut store = CheckpointStore::new();
    let mut u = vec![0.0; N];
    let mut objective = 0.0;
    for i in 1..=STEPS {
        let f = CnStepResidual {
            u_prev: u.clone(),
            t: i as f64 * DT,
            amplitude,
        };
        let jac = JacobianBuilder::from_options(&JacobianOptions::default(), &f).unwrap();
        let mut ctx = DenseLuContext::new();
        let report = driver
            .solve(&f, &jac, &mut ctx, &mut u, None::<&SerialComm>)
            .unwrap();
        assert_eq!(report.status, NewtonStatus::Converged, "step {i}");
        objective += DT * u[PROBE] * u[PROBE];
        store.put(i, u.clone(), Some(spatial_jacobian()));
    }
    (objective, store)
}

struct ProbeObjective;
impl ObjectiveGradient for ProbeObjective {
    fn objective(&self, _step: usize, u: &[f64]) -> f64 {
        DT * u[PROBE] * u[PROBE]
    }
    fn gradient(&self, _step: usize, u: &[f64], g: &mut [f64]) -> Result<(), PsiError> {
        g.fill(0.0);
        g[PROBE] = 2.0 * DT * u[PROBE];
        Ok(())
    }
}

struct InflowAmplitude;
impl ParameterPartial for InflowAmplitude {
    fn dr_dparam(&self, step: usize, _u: &[f64], out: &mut [f64]) -> Result<(), PsiError> {
        out.fill(0.0);
        // Only the inflow node sees A: ∂R₀/∂A = (c/Δx)·sin(ωt).
        let t = step as f64 * DT;
        out[0] = C / dx() * (OMEGA * t).sin();
        Ok(())
    }
}

fn adjoint_djda(amplitude: f64) -> f64 {
    let (_, store) = forward(amplitude);
    // The engine only rebuilds Jacobians for checkpoints without a cached
    // one; the residual here is a stand-in for that path.
    let f = CnStepResidual {
        u_prev: vec![0.0; N],
        t: 0.0,
        amplitude,
    };
    let jac = JacobianBuilder::from_options(&JacobianOptions::default(), &f).unwrap();
    let engine = AdjointEngine::new(DT, jac).unwrap();
    let mut ctx = DenseLuContext::new();
    let sweep = engine.sweep(&store, &ProbeObjective, &mut ctx).unwrap();
    engine.sensitivity(&sweep, &store, &InflowAmplitude).unwrap()
}

fn direct_djda(amplitude: f64) -> f64 {
    let h = 1e-6;
    let (j_plus, _) = forward(amplitude + h);
    let (j_minus, _) = forward(amplitude - h);
    (j_plus - j_minus) / (2.0 * h)
}

// Known-failing regression: the adjoint and direct sensitivities disagree
// even at the terminal-condition step. Preserved, not fixed; see DESIGN.md.
#[test]
#[ignore = "known unsteady-adjoint sensitivity discrepancy, unresolved upstream of the reverse recurrence"]
fn adjoint_sensitivity_matches_direct_differentiation() {
    let amplitude = 1.3;
    let dj_adjoint = adjoint_djda(amplitude);
    let dj_direct = direct_djda(amplitude);
    assert!(
        (dj_adjoint - dj_direct).abs() < 1e-10,
        "adjoint dJ/dA = {dj_adjoint}, direct dJ/dA = {dj_direct}"
    );
}

#[test]
fn adjoint_sweep_over_the_advection_run_completes() {
    let (objective, store) = forward(1.3);
    assert!(objective > 0.0);
    assert_eq!(store.len(), STEPS);
    let f = CnStepResidual {
        u_prev: vec![0.0; N],
        t: 0.0,
        amplitude: 1.3,
    };
    let jac = JacobianBuilder::from_options(&JacobianOptions::default(), &f).unwrap();
    let engine = AdjointEngine::new(DT, jac).unwrap();
    let mut ctx = DenseLuContext::new();
    let sweep = engine.sweep(&store, &ProbeObjective, &mut ctx).unwrap();
    assert_eq!(sweep.psi.len(), STEPS);
    assert!(
        sweep
            .psi
            .iter()
            .all(|p| p.iter().all(|v| v.is_finite()))
    );
    // The terminal adjoint is driven by the probe gradient and is nonzero.
    let psi_n = &sweep.psi[STEPS - 1];
    assert!(psi_n.iter().any(|&v| v != 0.0));
}
