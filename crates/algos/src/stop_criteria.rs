//! Stopping criteria of the driver layer.
//!
//! Criteria are checked from within the function wrappers and the driver
//! callbacks; when one fires it raises a [`StopSignal`] which travels up as
//! [`AlgoError::Terminated`](crate::AlgoError::Terminated) and is caught
//! exactly once by the driver.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use ndarray::Array1;
use thiserror::Error;

use crate::database::Database;

/// A signal raised when a stopping criterion terminates the driver.
///
/// The `Display` implementation is the user-facing termination message
/// reported in the driver result.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StopSignal {
    /// The evaluation budget is exhausted
    #[error("Maximum number of iterations reached.")]
    MaxIterReached,
    /// A design vector contains NaN components
    #[error("Design variables are NaN.")]
    DesvarIsNan,
    /// A function value or gradient contains NaN while `stop_if_nan` is set
    #[error("Function value or gradient is NaN and stop_if_nan is set to true.")]
    FunctionIsNan,
    /// The last design vectors are closer than the x tolerances
    #[error(
        "Successive iterates of the design variables are closer than \
         xtol_rel or xtol_abs."
    )]
    XtolReached,
    /// The last objective values are closer than the f tolerances
    #[error(
        "Successive iterates of the objective function are closer than \
         ftol_rel or ftol_abs."
    )]
    FtolReached,
    /// The wall-clock budget is exhausted
    #[error("Maximum time reached: {0:.2} seconds.")]
    MaxTimeReached(f64),
    /// The KKT residual norm is below the tolerances
    #[error(
        "The KKT residual norm is smaller than the tolerance kkt_tol_abs \
         or kkt_tol_rel."
    )]
    KktReached,
}

/// A thread-safe evaluation counter shared between the problem, its function
/// wrappers and the driver.
#[derive(Debug, Default)]
pub struct IterationCounter {
    current: AtomicUsize,
    maximum: AtomicUsize,
}

impl IterationCounter {
    /// The current iteration number.
    pub fn current(&self) -> usize {
        self.current.load(Ordering::SeqCst)
    }

    /// The maximum number of iterations; zero means unset.
    pub fn max_iter(&self) -> usize {
        self.maximum.load(Ordering::SeqCst)
    }

    /// Set the maximum number of iterations.
    pub fn set_max_iter(&self, max_iter: usize) {
        self.maximum.store(max_iter, Ordering::SeqCst);
    }

    /// Reset the current iteration number to zero.
    pub fn reset(&self) {
        self.current.store(0, Ordering::SeqCst);
    }

    /// Increment the current iteration number and return the new value.
    pub fn increment(&self) -> usize {
        self.current.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether the evaluation budget is exhausted.
    pub fn is_max_reached(&self) -> bool {
        let max_iter = self.maximum.load(Ordering::SeqCst);
        max_iter > 0 && self.current.load(Ordering::SeqCst) >= max_iter
    }
}

/// Whether the wall-clock budget `max_time` (in seconds) is exhausted;
/// a non-positive `max_time` disables the criterion.
pub fn is_max_time_reached(start_time: Instant, max_time: f64) -> bool {
    max_time > 0. && start_time.elapsed().as_secs_f64() > max_time
}

/// Whether the `n_x` last design vectors stored in the database all lie
/// within `xtol_abs + xtol_rel * |average|` of their average, componentwise.
pub fn is_x_tol_reached(
    database: &Database,
    xtol_rel: f64,
    xtol_abs: f64,
    n_x: usize,
) -> bool {
    if xtol_rel <= 0. && xtol_abs <= 0. {
        return false;
    }
    let history = database.last_x_history(n_x);
    if history.len() < n_x {
        return false;
    }
    let dim = history[0].len();
    let mut average = Array1::<f64>::zeros(dim);
    for x in &history {
        average += x;
    }
    average /= n_x as f64;
    history.iter().all(|x| {
        x.iter()
            .zip(average.iter())
            .all(|(&xi, &ai)| (xi - ai).abs() <= xtol_abs + xtol_rel * ai.abs())
    })
}

/// Whether the objective values at the `n_x` last design vectors all lie
/// within `ftol_abs + ftol_rel * |average|` of their average.
pub fn is_f_tol_reached(
    database: &Database,
    objective_name: &str,
    ftol_rel: f64,
    ftol_abs: f64,
    n_x: usize,
) -> bool {
    if ftol_rel <= 0. && ftol_abs <= 0. {
        return false;
    }
    let history = database.last_x_history(n_x);
    if history.len() < n_x {
        return false;
    }
    let mut values = Vec::with_capacity(n_x);
    for x in &history {
        match database
            .get_function_value(objective_name, &x.view())
            .and_then(|v| v.scalar())
        {
            Some(v) => values.push(v),
            None => return false,
        }
    }
    let average = values.iter().sum::<f64>() / n_x as f64;
    values
        .iter()
        .all(|&v| (v - average).abs() <= ftol_abs + ftol_rel * average.abs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::FunctionValue;
    use ndarray::array;
    use std::collections::HashMap;

    fn store_point(db: &Database, x: f64, f: f64) {
        let mut record = HashMap::new();
        record.insert("f".to_string(), FunctionValue::Scalar(f));
        db.store(&array![x].view(), record);
    }

    #[test]
    fn test_counter() {
        let counter = IterationCounter::default();
        counter.set_max_iter(2);
        assert!(!counter.is_max_reached());
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert!(counter.is_max_reached());
        counter.reset();
        assert!(!counter.is_max_reached());
        assert_eq!(counter.current(), 0);
    }

    #[test]
    fn test_x_tol_needs_enough_points() {
        let db = Database::new();
        store_point(&db, 1.0, 2.0);
        store_point(&db, 1.0 + 1e-12, 2.0);
        assert!(!is_x_tol_reached(&db, 1e-8, 1e-8, 3));
        store_point(&db, 1.0 - 1e-12, 2.0);
        assert!(is_x_tol_reached(&db, 1e-8, 1e-8, 3));
    }

    #[test]
    fn test_x_tol_not_reached_on_spread_points() {
        let db = Database::new();
        store_point(&db, 0.0, 1.0);
        store_point(&db, 0.5, 1.0);
        store_point(&db, 1.0, 1.0);
        assert!(!is_x_tol_reached(&db, 1e-8, 1e-8, 3));
    }

    #[test]
    fn test_f_tol_reached() {
        let db = Database::new();
        store_point(&db, 0.0, 3.0);
        store_point(&db, 0.5, 3.0 + 1e-12);
        store_point(&db, 1.0, 3.0 - 1e-12);
        assert!(is_f_tol_reached(&db, "f", 1e-8, 0., 3));
        assert!(!is_f_tol_reached(&db, "g", 1e-8, 0., 3));
    }

    #[test]
    fn test_disabled_tolerances() {
        let db = Database::new();
        store_point(&db, 1.0, 2.0);
        assert!(!is_x_tol_reached(&db, 0., 0., 1));
        assert!(!is_f_tol_reached(&db, "f", 0., 0., 1));
    }

    #[test]
    fn test_signal_messages() {
        assert_eq!(
            StopSignal::MaxIterReached.to_string(),
            "Maximum number of iterations reached."
        );
        assert_eq!(
            StopSignal::DesvarIsNan.to_string(),
            "Design variables are NaN."
        );
    }
}
