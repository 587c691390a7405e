use thiserror::Error;

// Unified error type for psikit

#[derive(Error, Debug)]
pub enum PsiError {
    #[error("residual evaluation failed: {0}")]
    ResidualEval(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("solve error: {0}")]
    SolveError(String),
    #[error(
        "linear solve diverged at iteration {iteration}: residual {residual:.3e} exceeds dtol x initial ({threshold:.3e})"
    )]
    SolveDiverged {
        iteration: usize,
        residual: f64,
        threshold: f64,
    },
    #[error("missing checkpoint for step {0}")]
    MissingCheckpoint(usize),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
