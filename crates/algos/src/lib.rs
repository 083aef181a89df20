//! `mdobox-algos` provides the problem-definition and driver layer of the
//! mdobox MDO toolbox:
//!
//! * a [`Database`] keyed by design vectors which records every function
//!   evaluation exactly once,
//! * a [`DesignSpace`] handling bounds, variable types and normalization,
//! * the [`MdoFunction`] abstraction and its [`NormDbFunction`] wrapper which
//!   adds normalization, caching and stopping-criteria hooks around raw
//!   user functions,
//! * an [`OptimizationProblem`] gathering objective, constraints and
//!   observables over a design space,
//! * two driver libraries sharing the same execution loop:
//!   [`OptimizationLibrary`] for iterative optimizers and [`DoeLibrary`] for
//!   design-of-experiments sampling (serial or thread-parallel).
//!
//! Drivers communicate termination through [`StopSignal`] values carried by
//! [`AlgoError::Terminated`]: stopping criteria raise the signal from within
//! the function wrappers, the driver catches it once and recovers the best
//! point found so far from the database.
//!
//! ```
//! use mdobox_algos::{
//!     DesignSpace, DoeLibrary, DriverOptions, FunctionType, MdoFunction,
//!     OptimizationProblem,
//! };
//! use ndarray::{array, Array1};
//!
//! let space = DesignSpace::new(&array![[-2.0, 3.0], [-2.0, 3.0]]);
//! let obj = MdoFunction::new("rosenbrock", FunctionType::Objective, |x| {
//!     Array1::from_elem(
//!         1,
//!         100. * (x[1] - x[0] * x[0]).powi(2) + (1. - x[0]).powi(2),
//!     )
//! });
//! let mut problem = OptimizationProblem::new(space, obj);
//!
//! let mut lib = DoeLibrary::new();
//! let options = DriverOptions {
//!     n_samples: Some(10),
//!     seed: Some(42),
//!     ..DoeLibrary::default_options()
//! };
//! let result = lib.execute(&mut problem, Some("LHS"), options).unwrap();
//! assert_eq!(result.n_iter, 10);
//! ```
#![warn(missing_docs)]

mod database;
mod design_space;
mod driver;
mod errors;
mod first_order;
mod function;
mod options;
mod problem;
mod result;
mod stop_criteria;

pub use crate::database::*;
pub use crate::design_space::*;
pub use crate::driver::*;
pub use crate::errors::*;
pub use crate::first_order::*;
pub use crate::function::*;
pub use crate::options::*;
pub use crate::problem::*;
pub use crate::result::*;
pub use crate::stop_criteria::*;
