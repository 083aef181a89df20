use thiserror::Error;

/// A result type for MDA operations
pub type Result<T> = std::result::Result<T, MdaError>;

/// An error when building or running an MDA
#[derive(Error, Debug)]
pub enum MdaError {
    /// When a configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// When the disciplines share no variable at all
    #[error(
        "there is no coupling among the disciplines: \
         use a plain execution chain instead of an MDA"
    )]
    NoCoupling,
    /// When a solver needing strong couplings only finds weak ones
    #[error(
        "the disciplines are only weakly coupled: \
         a Newton-Raphson MDA requires strongly coupled variables"
    )]
    WeakCouplingOnly,
    /// When a discipline execution fails
    #[error("the discipline {name} failed: {reason}")]
    DisciplineFailed {
        /// The name of the failing discipline
        name: String,
        /// What went wrong
        reason: String,
    },
    /// When a discipline input is missing from the MDA data
    #[error("the input {name} of the discipline {discipline} is missing")]
    MissingInput {
        /// The missing variable
        name: String,
        /// The discipline expecting it
        discipline: String,
    },
    /// When a discipline does not provide the Jacobian a solver needs
    #[error("the discipline {0} provides no Jacobian")]
    MissingJacobian(String),
    /// When a linear algebra operation fails
    #[error(transparent)]
    LinalgError(#[from] linfa_linalg::LinalgError),
}
