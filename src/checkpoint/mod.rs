//! Checkpoint store for the forward sweep.
//!
//! Every converged forward time step is persisted, keyed by step index, so
//! the reverse sweep can visit steps in decreasing order after the forward
//! sweep has completed. Storage is exhaustive, O(n) entries of O(ndof) each
//! (O(ndof²) when the Jacobian is cached), trading memory for simplicity
//! and exactness. Logarithmic-storage/recompute schemes are deliberately not
//! modeled here.
//!
//! The store has an explicit lifetime: created at forward-sweep start,
//! read-only during the reverse sweep, released with [`CheckpointStore::release`]
//! at adjoint-sweep end.

use std::collections::BTreeMap;

use faer::Mat;

use crate::error::PsiError;

/// One forward time step's persisted data.
pub struct Checkpoint {
    pub step: usize,
    pub state: Vec<f64>,
    /// Cached ∂R/∂u at `state`; when absent, the reverse sweep rebuilds it
    /// from the state.
    pub jacobian: Option<Mat<f64>>,
}

#[derive(Default)]
pub struct CheckpointStore {
    steps: BTreeMap<usize, Checkpoint>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist a converged forward step. Re-putting an index overwrites it.
    pub fn put(&mut self, step: usize, state: Vec<f64>, jacobian: Option<Mat<f64>>) {
        self.steps.insert(
            step,
            Checkpoint {
                step,
                state,
                jacobian,
            },
        );
    }

    /// Retrieve step data; an index never stored is a fatal ordering error
    /// for the caller (the forward sweep did not cover it).
    pub fn get(&self, step: usize) -> Result<&Checkpoint, PsiError> {
        self.steps
            .get(&step)
            .ok_or(PsiError::MissingCheckpoint(step))
    }

    pub fn contains(&self, step: usize) -> bool {
        self.steps.contains_key(&step)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Highest step index stored, i.e. the terminal step of the sweep.
    pub fn last_step(&self) -> Option<usize> {
        self.steps.keys().next_back().copied()
    }

    /// Drop all retained data at end of life.
    pub fn release(&mut self) {
        self.steps.clear();
    }
}
