use thiserror::Error;

use crate::stop_criteria::StopSignal;

/// A result type for driver and problem operations
pub type Result<T> = std::result::Result<T, AlgoError>;

/// An error when setting up or driving an optimization problem
#[derive(Error, Debug)]
pub enum AlgoError {
    /// When a configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// When a value is invalid
    #[error("Invalid value: {0}")]
    InvalidValue(String),
    /// When an algorithm is not suited to the problem at hand
    #[error("The algorithm {algo_name} is not adapted to the problem because {reason}")]
    UnsuitableAlgorithm {
        /// The name of the rejected algorithm
        algo_name: String,
        /// Why the algorithm was rejected
        reason: UnsuitabilityReason,
    },
    /// When a function evaluation fails
    #[error("Evaluation error: {0}")]
    EvalError(String),
    /// When a stopping criterion terminates the driver; caught once by
    /// the driver which then recovers the result from the database
    #[error("Driver stopped: {0}")]
    Terminated(#[from] StopSignal),
    /// When a linear algebra operation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When (de)serialization fails
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),
}

/// Why an algorithm cannot handle a given problem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsuitabilityReason {
    /// The design space does not contain any variable
    EmptyDesignSpace,
    /// The problem has equality constraints the algorithm cannot handle
    EqualityConstraints,
    /// The problem has inequality constraints the algorithm cannot handle
    InequalityConstraints,
    /// The problem is non-linear while the algorithm expects a linear one
    NonLinearProblem,
    /// The problem dimension is below the minimum the algorithm requires
    SmallDimension,
    /// The design space mixes integer variables the algorithm cannot handle
    IntegerVariables,
}

impl std::fmt::Display for UnsuitabilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            UnsuitabilityReason::EmptyDesignSpace => "the design space is empty",
            UnsuitabilityReason::EqualityConstraints => {
                "it cannot handle equality constraints"
            }
            UnsuitabilityReason::InequalityConstraints => {
                "it cannot handle inequality constraints"
            }
            UnsuitabilityReason::NonLinearProblem => {
                "it cannot handle non-linear problems"
            }
            UnsuitabilityReason::SmallDimension => {
                "the dimension of the problem is lower than the minimum it requires"
            }
            UnsuitabilityReason::IntegerVariables => {
                "it cannot handle integer design variables"
            }
        };
        write!(f, "{msg}")
    }
}
