pub mod options;

pub use options::{
    EPS_CS, EPS_FD, JacType, JacTypeOption, JacobianMethod, JacobianOptions, KrylovOptions,
    NewtonOptions, SolverOptions,
};
