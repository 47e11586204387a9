pub mod linear_solver;
pub mod lm_optimizer;
pub mod statistics;

pub use lm_optimizer::{LMConfig, LeastSquaresModel, optimize};
