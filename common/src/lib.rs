pub mod float_ext;
pub mod log_setup;
pub mod worker_pool;

pub use worker_pool::{Execution, WorkerPool};

pub const EPSILON: f64 = 1e-6;
