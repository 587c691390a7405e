pub mod convergence;
pub mod dump;

pub use convergence::{Convergence, SolveStats};
