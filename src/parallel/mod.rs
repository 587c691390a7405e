//! Reduction seam for an external domain-decomposition layer.
//!
//! All semantically global arithmetic in this crate (norms, dot products)
//! funnels through [`Comm::all_reduce`], so that a distributed backend can
//! supply the collective while the solver core stays single-logical-thread.
//! The in-crate implementations are trivial: [`SerialComm`] for one process
//! and [`RayonComm`] for shared memory, where a reduction is already global.

pub trait Comm {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;
    fn barrier(&self);
    /// Sum `x` across all cooperating processes.
    fn all_reduce(&self, x: f64) -> f64;
    /// Globally reduced dot product.
    fn dot(&self, a: &[f64], b: &[f64]) -> f64 {
        let local = a.iter().zip(b).map(|(&x, &y)| x * y).sum::<f64>();
        self.all_reduce(local)
    }
}

/// Single-process communicator; every reduction is already global.
pub struct SerialComm;

impl Comm for SerialComm {
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
    fn all_reduce(&self, x: f64) -> f64 {
        x
    }
}

#[cfg(feature = "rayon")]
pub mod rayon_comm;
#[cfg(feature = "rayon")]
pub use rayon_comm::RayonComm;
