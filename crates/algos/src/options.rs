//! Driver options shared by the optimization and DOE libraries.

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::errors::{AlgoError, Result};

/// The options of a driver run.
///
/// Unknown option names are rejected when resolving from JSON, so a typo
/// in an option name fails instead of being silently ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DriverOptions {
    /// The evaluation budget; required for optimizers, derived from
    /// `n_samples` for DOE runs when unset
    pub max_iter: Option<usize>,
    /// Relative tolerance on the objective stopping criterion
    pub ftol_rel: f64,
    /// Absolute tolerance on the objective stopping criterion
    pub ftol_abs: f64,
    /// Relative tolerance on the design-vector stopping criterion
    pub xtol_rel: f64,
    /// Absolute tolerance on the design-vector stopping criterion
    pub xtol_abs: f64,
    /// Absolute tolerance on the KKT residual norm criterion
    pub kkt_tol_abs: Option<f64>,
    /// Relative tolerance on the KKT residual norm criterion, scaled by
    /// the first recorded residual norm
    pub kkt_tol_rel: Option<f64>,
    /// The number of last design vectors over which the x and f
    /// tolerances are checked
    pub stop_crit_n_x: usize,
    /// The wall-clock budget in seconds; non-positive disables it
    pub max_time: f64,
    /// Whether the driver works in the unit hypercube
    pub normalize_design_space: bool,
    /// Whether evaluations go through the database cache
    pub use_database: bool,
    /// Whether integer-typed components are rounded before evaluation
    pub round_ints: bool,
    /// Whether DOE runs also evaluate the function Jacobians
    pub eval_jac: bool,
    /// The number of samples of a DOE run
    pub n_samples: Option<usize>,
    /// The number of threads evaluating DOE samples
    pub n_processes: usize,
    /// Seconds to wait between two parallel sample submissions;
    /// non-positive disables it
    pub wait_time_between_samples: f64,
    /// The seed of the DOE random generator; unseeded when `None`
    pub seed: Option<u64>,
    /// The samples of a custom DOE, as physical design vectors
    pub samples: Option<Array2<f64>>,
    /// Override of the problem inequality feasibility tolerance
    pub ineq_tolerance: Option<f64>,
    /// Override of the problem equality feasibility tolerance
    pub eq_tolerance: Option<f64>,
    /// Whether the iteration counters are reset before the run; keeping
    /// them allows warm-started runs to share a global budget
    pub reset_iteration_counters: bool,
    /// Force running an algorithm which does not handle integer
    /// variables on a space that has some
    pub skip_int_check: bool,
}

impl Default for DriverOptions {
    fn default() -> Self {
        DriverOptions {
            max_iter: None,
            ftol_rel: 0.,
            ftol_abs: 0.,
            xtol_rel: 0.,
            xtol_abs: 0.,
            kkt_tol_abs: None,
            kkt_tol_rel: None,
            stop_crit_n_x: 3,
            max_time: 0.,
            normalize_design_space: true,
            use_database: true,
            round_ints: true,
            eval_jac: false,
            n_samples: None,
            n_processes: 1,
            wait_time_between_samples: 0.,
            seed: None,
            samples: None,
            ineq_tolerance: None,
            eq_tolerance: None,
            reset_iteration_counters: true,
            skip_int_check: false,
        }
    }
}

impl DriverOptions {
    /// Resolve options from a JSON object, overriding the given defaults.
    ///
    /// An unknown or ill-typed option name is an error.
    pub fn from_json(value: serde_json::Value, defaults: DriverOptions) -> Result<Self> {
        let mut base = serde_json::to_value(defaults)?;
        let overrides = match value {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(AlgoError::InvalidValue(format!(
                    "driver options must be a JSON object, got {other}"
                )))
            }
        };
        match &mut base {
            serde_json::Value::Object(map) => map.extend(overrides),
            _ => unreachable!("DriverOptions serializes to an object"),
        }
        Ok(serde_json::from_value(base)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let options = DriverOptions::default();
        assert!(options.normalize_design_space);
        assert!(options.use_database);
        assert_eq!(options.stop_crit_n_x, 3);
        assert_eq!(options.n_processes, 1);
    }

    #[test]
    fn test_from_json_overrides_defaults() {
        let options = DriverOptions::from_json(
            json!({"max_iter": 50, "ftol_rel": 1e-9, "seed": 42}),
            DriverOptions::default(),
        )
        .unwrap();
        assert_eq!(options.max_iter, Some(50));
        assert_eq!(options.seed, Some(42));
        assert_eq!(options.ftol_rel, 1e-9);
        // untouched defaults survive
        assert!(options.use_database);
    }

    #[test]
    fn test_unknown_option_is_rejected() {
        let err = DriverOptions::from_json(
            json!({"max_itr": 50}),
            DriverOptions::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_itr"));
    }

    #[test]
    fn test_non_object_is_rejected() {
        assert!(DriverOptions::from_json(json!(42), DriverOptions::default()).is_err());
    }
}
