#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

//! Working-set coordinate descent with dual extrapolation for sparse
//! generalised linear models: lasso, group lasso, multitask lasso and
//! L1-penalised logistic regression, solved along a regularization path.

pub mod accel;
pub mod cd;
pub mod config;
pub mod data;
pub mod design;
pub mod dual;
pub mod inner;
pub mod loss;
pub mod newton;
pub mod partition;
pub mod path;
pub mod sparse;
pub mod types;
pub mod working_set;

pub use config::{ConfigError, SolverConfig};
pub use design::{Design, DesignError};
pub use partition::{GroupSpec, Partition, PartitionError};
pub use path::{
    ConvergenceWarning, MultiTaskPath, RegularizationPath, alpha_max, alpha_max_for,
    compute_multitask_path, compute_path,
};
pub use sparse::CscMatrix;
pub use types::{Float, ProblemKind, SolverError};
