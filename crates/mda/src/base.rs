//! Common machinery of the MDA solvers: the trait they share and the
//! residual bookkeeping.

use log::{debug, info};

use crate::discipline::DisciplineData;
use crate::errors::Result;

/// How the raw residual norm is scaled before the convergence test.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResidualScaling {
    /// Divide by the residual norm of the first iteration, so the
    /// tolerance reads as a relative reduction
    #[default]
    InitialResidualNorm,
    /// Use the raw norm as is
    NoScaling,
}

/// A solver of coupled-discipline analyses.
pub trait Mda {
    /// The solver name, used in logs.
    fn name(&self) -> &str;

    /// The convergence tolerance on the scaled residual norm.
    fn tolerance(&self) -> f64;

    /// The scaled residual norm of the last iteration.
    fn normed_residual(&self) -> f64;

    /// The scaled residual norms of all iterations of the last run (or of
    /// all runs, when history reset is disabled).
    fn residual_history(&self) -> &[f64];

    /// Solve the coupled analysis from the given input data and return
    /// the data completed with the converged coupling variables and
    /// discipline outputs.
    fn execute(&mut self, data: &DisciplineData) -> Result<DisciplineData>;
}

/// The residual bookkeeping shared by the MDA solvers.
#[derive(Clone, Debug)]
pub(crate) struct ResidualTracker {
    pub tolerance: f64,
    pub max_iter: usize,
    pub scaling: ResidualScaling,
    pub log_convergence: bool,
    pub reset_history_each_run: bool,
    history: Vec<f64>,
    normed_residual: f64,
    initial_norm: Option<f64>,
}

impl ResidualTracker {
    pub fn new(tolerance: f64, max_iter: usize) -> Self {
        ResidualTracker {
            tolerance,
            max_iter,
            scaling: ResidualScaling::default(),
            log_convergence: false,
            reset_history_each_run: true,
            history: vec![],
            normed_residual: f64::INFINITY,
            initial_norm: None,
        }
    }

    /// Prepare for a new run.
    pub fn start_run(&mut self) {
        if self.reset_history_each_run {
            self.history.clear();
        }
        self.normed_residual = f64::INFINITY;
        self.initial_norm = None;
    }

    /// Record a raw residual norm and return the scaled one.
    pub fn update(&mut self, raw_norm: f64, name: &str, iteration: usize) -> f64 {
        let normed = match self.scaling {
            ResidualScaling::NoScaling => raw_norm,
            ResidualScaling::InitialResidualNorm => {
                let initial = *self.initial_norm.get_or_insert(raw_norm);
                if initial > 0. {
                    raw_norm / initial
                } else {
                    0.
                }
            }
        };
        self.normed_residual = normed;
        self.history.push(normed);
        if self.log_convergence {
            info!(
                "{name} iteration {iteration}: residual = {normed:.6e} \
                 (tolerance: {:.6e})",
                self.tolerance
            );
        } else {
            debug!("{name} iteration {iteration}: residual = {normed:.6e}");
        }
        normed
    }

    pub fn is_converged(&self) -> bool {
        self.normed_residual <= self.tolerance
    }

    pub fn normed_residual(&self) -> f64 {
        self.normed_residual
    }

    pub fn history(&self) -> &[f64] {
        &self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_initial_norm_scaling() {
        let mut tracker = ResidualTracker::new(1e-6, 10);
        tracker.start_run();
        assert_abs_diff_eq!(tracker.update(4.0, "mda", 1), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(tracker.update(2.0, "mda", 2), 0.5, epsilon = 1e-12);
        assert!(!tracker.is_converged());
        tracker.update(1e-7, "mda", 3);
        assert!(tracker.is_converged());
        assert_eq!(tracker.history().len(), 3);
    }

    #[test]
    fn test_no_scaling() {
        let mut tracker = ResidualTracker::new(1e-6, 10);
        tracker.scaling = ResidualScaling::NoScaling;
        tracker.start_run();
        assert_abs_diff_eq!(tracker.update(4.0, "mda", 1), 4.0, epsilon = 1e-12);
    }

    #[test]
    fn test_zero_initial_residual_is_converged() {
        let mut tracker = ResidualTracker::new(1e-6, 10);
        tracker.start_run();
        assert_abs_diff_eq!(tracker.update(0.0, "mda", 1), 0.0, epsilon = 1e-12);
        assert!(tracker.is_converged());
    }

    #[test]
    fn test_history_kept_across_runs_when_not_reset() {
        let mut tracker = ResidualTracker::new(1e-6, 10);
        tracker.reset_history_each_run = false;
        tracker.start_run();
        tracker.update(1.0, "mda", 1);
        tracker.start_run();
        tracker.update(1.0, "mda", 1);
        assert_eq!(tracker.history().len(), 2);
    }
}
