//! `mdobox-mda` solves the coupled-discipline analyses of an MDO process.
//!
//! A [`Discipline`] is a named mapping from input variables to output
//! variables; when the output of one discipline feeds another (or itself)
//! the variables are coupled and a fixed point must be found. The
//! [`CouplingStructure`] detects the couplings and tells strong couplings
//! (cycles) from weak ones (one-way feeds); the solvers iterate on the
//! coupling variables until the residual drops below tolerance:
//!
//! * [`MdaGaussSeidel`] executes the disciplines in sequence, feeding each
//!   the freshest values, with optional over-relaxation,
//! * [`MdaNewtonRaphson`] solves the coupling residual with Newton steps
//!   built from the discipline Jacobians,
//! * [`MdaSequential`] chains inner MDAs and stops at the first converged
//!   one; [`MdaGSNewton`] is the usual Gauss-Seidel-then-Newton chain.
//!
//! ```
//! use mdobox_mda::{CallableDiscipline, Mda, MdaGaussSeidel};
//! use ndarray::array;
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let d1 = CallableDiscipline::new("d1", &["z", "j"], &["i"], |data| {
//!     Ok(HashMap::from([("i".to_string(), &data["z"] + &data["j"])]))
//! });
//! let d2 = CallableDiscipline::new("d2", &["i"], &["j"], |data| {
//!     Ok(HashMap::from([("j".to_string(), 1.0 - &data["i"] * 0.3)]))
//! });
//! let mut mda = MdaGaussSeidel::new(vec![Arc::new(d1), Arc::new(d2)]).unwrap();
//! let out = mda
//!     .execute(&HashMap::from([
//!         ("z".to_string(), array![2.0]),
//!         ("j".to_string(), array![0.0]),
//!     ]))
//!     .unwrap();
//! assert!((out["i"][0] - 3.0 / 1.3).abs() < 1e-5);
//! ```
#![warn(missing_docs)]

mod base;
mod coupling;
mod discipline;
mod errors;
mod gauss_seidel;
mod newton;
mod sequential;

pub use crate::base::*;
pub use crate::coupling::*;
pub use crate::discipline::*;
pub use crate::errors::*;
pub use crate::gauss_seidel::*;
pub use crate::newton::*;
pub use crate::sequential::*;
