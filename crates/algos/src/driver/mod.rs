//! The driver layer: libraries of algorithms sharing one execution loop.
//!
//! A driver run always follows the same state machine, whether it samples
//! or optimizes: resolve the algorithm, check it suits the problem,
//! preprocess the functions, register the stopping-criteria callbacks,
//! run, catch at most one [`StopSignal`](crate::StopSignal) and recover the
//! result from the database.

mod doe;
mod opt;

pub use doe::*;
pub use opt::*;

use std::time::Instant;

use log::{debug, info, warn};

use crate::errors::{AlgoError, Result, UnsuitabilityReason};
use crate::options::DriverOptions;
use crate::problem::{CallbackId, OptimizationProblem};
use crate::result::OptimizationResult;
use crate::stop_criteria::{
    is_f_tol_reached, is_max_time_reached, is_x_tol_reached, StopSignal,
};

/// Resolve the algorithm name of a run: the explicit one, or the name kept
/// from a previous run on the same library.
pub(crate) fn resolve_algo_name(
    explicit: Option<&str>,
    kept: &Option<String>,
    available: &[String],
) -> Result<String> {
    let name = explicit
        .map(str::to_string)
        .or_else(|| kept.clone())
        .ok_or_else(|| {
            AlgoError::InvalidConfig("no algorithm name was given".to_string())
        })?;
    if available.iter().any(|n| n == &name) {
        Ok(name)
    } else {
        let mut names = available.to_vec();
        names.sort();
        Err(AlgoError::InvalidValue(format!(
            "the algorithm {name} is not available; available algorithms: {}",
            names.join(", ")
        )))
    }
}

/// Check the algorithm against integer-typed design variables; with
/// `skip_int_check` the mismatch is only logged.
pub(crate) fn check_integer_variables(
    problem: &OptimizationProblem,
    algo_name: &str,
    handle_integer_variables: bool,
    skip_int_check: bool,
) -> Result<()> {
    if !problem.design_space().has_integer_variables() || handle_integer_variables {
        return Ok(());
    }
    if skip_int_check {
        warn!(
            "The algorithm {algo_name} does not handle integer variables; \
             running anyway because skip_int_check is set"
        );
        Ok(())
    } else {
        Err(AlgoError::UnsuitableAlgorithm {
            algo_name: algo_name.to_string(),
            reason: UnsuitabilityReason::IntegerVariables,
        })
    }
}

/// Apply the problem-level option overrides (tolerances, NaN policy,
/// counters) and check the evaluation budget.
pub(crate) fn setup_problem(
    problem: &mut OptimizationProblem,
    options: &DriverOptions,
    max_iter: usize,
) -> Result<()> {
    if max_iter < 1 {
        return Err(AlgoError::InvalidValue(format!(
            "the maximum number of iterations must be at least 1, got {max_iter}"
        )));
    }
    problem.check()?;
    if options.ineq_tolerance.is_some() || options.eq_tolerance.is_some() {
        let ineq = options
            .ineq_tolerance
            .unwrap_or_else(|| problem.ineq_tolerance());
        let eq = options.eq_tolerance.unwrap_or_else(|| problem.eq_tolerance());
        problem.set_tolerances(ineq, eq);
    }
    if options.reset_iteration_counters {
        problem.counter().reset();
    }
    problem.counter().set_max_iter(max_iter);
    Ok(())
}

/// Register the iteration callback shared by all drivers: it counts the
/// new design vector, logs the progress and checks the wall-clock budget
/// and, for optimizers, the x and f tolerances.
pub(crate) fn register_iteration_callback(
    problem: &OptimizationProblem,
    options: &DriverOptions,
    start_time: Instant,
    check_f_x_tolerances: bool,
) -> CallbackId {
    let counter = problem.counter().clone();
    let database = problem.database().clone();
    let objective_name = problem.objective().name().to_string();
    let max_time = options.max_time;
    let (ftol_rel, ftol_abs) = (options.ftol_rel, options.ftol_abs);
    let (xtol_rel, xtol_abs) = (options.xtol_rel, options.xtol_abs);
    let n_x = options.stop_crit_n_x;

    problem.callbacks().add_new_iter_callback(move |x| {
        let iteration = counter.increment();
        match database
            .get_function_value(&objective_name, &x.view())
            .and_then(|v| v.scalar())
        {
            Some(value) => info!(
                "Iteration {}/{}: {} = {:.6e}",
                iteration,
                counter.max_iter(),
                objective_name,
                value
            ),
            None => debug!("Iteration {}/{}", iteration, counter.max_iter()),
        }
        if is_max_time_reached(start_time, max_time) {
            return Err(StopSignal::MaxTimeReached(max_time));
        }
        if check_f_x_tolerances {
            if is_x_tol_reached(&database, xtol_rel, xtol_abs, n_x) {
                return Err(StopSignal::XtolReached);
            }
            if is_f_tol_reached(&database, &objective_name, ftol_rel, ftol_abs, n_x) {
                return Err(StopSignal::FtolReached);
            }
        }
        Ok(())
    })
}

/// Register the database listener evaluating the observables once per new
/// design vector. A failing observable is logged, not fatal.
pub(crate) fn register_observable_listener(
    problem: &OptimizationProblem,
) -> Result<Option<crate::database::ListenerId>> {
    let observables = problem.wrapped()?.observables.clone();
    if observables.is_empty() {
        return Ok(None);
    }
    let space = problem.design_space().clone();
    let id = problem.database().add_new_iter_listener(move |x| {
        for observable in &observables {
            let x_eval = if observable.expects_normalized() {
                match space.normalize_vect(&x.view()) {
                    Ok(x_n) => x_n,
                    Err(err) => {
                        warn!("Cannot evaluate the observables: {err}");
                        return;
                    }
                }
            } else {
                x.clone()
            };
            if let Err(err) = observable.evaluate(&x_eval.view()) {
                warn!(
                    "Problem when evaluating the observable {}: {err}",
                    observable.name()
                );
            }
        }
    });
    Ok(Some(id))
}

/// Turn the outcome of a run into a result, catching at most one
/// termination signal; other errors propagate.
pub(crate) fn recover_result(
    problem: &OptimizationProblem,
    outcome: Result<String>,
    algo_name: &str,
) -> Result<OptimizationResult> {
    let message = match outcome {
        Ok(message) => message,
        Err(AlgoError::Terminated(signal)) => {
            info!("Driver stopped: {signal}");
            signal.to_string()
        }
        Err(other) => return Err(other),
    };
    Ok(OptimizationResult::from_problem(problem, message, algo_name))
}

/// Move the design space current value to the best point found and log
/// the result.
pub(crate) fn finalize_run(problem: &mut OptimizationProblem, result: &OptimizationResult) {
    if let Some(x_opt) = &result.x_opt {
        problem.design_space_mut().set_current_value(x_opt.clone());
    }
    info!("{result}");
}

/// Whether normalization can be applied to the problem design space.
pub(crate) fn normalization_eligible(
    problem: &OptimizationProblem,
    options: &DriverOptions,
) -> bool {
    if !options.normalize_design_space {
        return false;
    }
    let unbounded = problem.design_space().unbounded_components();
    if unbounded.is_empty() {
        true
    } else {
        warn!(
            "The design space cannot be normalized: components {unbounded:?} \
             have an infinite bound; running in the physical space"
        );
        false
    }
}
