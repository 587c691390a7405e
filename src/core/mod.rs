pub mod traits;
pub mod wrappers;

pub use traits::{
    Indexing, InnerProduct, MatTransVec, MatVec, PdeSystem, PerturbScalar, ResidualFn,
};
pub use wrappers::{TransposeOp, global_dot, global_norm};
