//! The library of optimization algorithms.
//!
//! The built-in `PGD_BACKTRACKING` algorithm is a projected gradient
//! descent with an Armijo backtracking line search, for bound-constrained
//! smooth problems. It carries no stopping logic of its own: termination
//! always comes from the stopping criteria raised through the function
//! wrappers (budget, tolerances, KKT residual).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use linfa_linalg::norm::Norm;
use log::{debug, info};
use ndarray::Array1;

use crate::errors::{AlgoError, Result, UnsuitabilityReason};
use crate::first_order::{is_kkt_norm_reached, KktCriterion};
use crate::options::DriverOptions;
use crate::problem::{OptimizationProblem, ProblemType};
use crate::result::OptimizationResult;
use crate::stop_criteria::StopSignal;

use super::{
    check_integer_variables, finalize_run, normalization_eligible, recover_result,
    register_iteration_callback, register_observable_listener, resolve_algo_name,
    setup_problem,
};

/// The name of the built-in projected gradient descent.
pub const PGD_BACKTRACKING: &str = "PGD_BACKTRACKING";

// Armijo sufficient-decrease factor of the line search.
const ARMIJO_C1: f64 = 1e-4;

// Number of step halvings before the line search gives up.
const MAX_HALVINGS: usize = 30;

/// The static description of an optimization algorithm.
#[derive(Clone, Debug)]
pub struct OptAlgorithmDescription {
    /// The algorithm name
    pub name: String,
    /// Whether integer design variables are handled
    pub handle_integer_variables: bool,
    /// Whether the algorithm needs function gradients
    pub require_gradient: bool,
    /// Whether equality constraints are handled
    pub handle_equality_constraints: bool,
    /// Whether inequality constraints are handled
    pub handle_inequality_constraints: bool,
    /// The nature of the problems the algorithm targets
    pub problem_type: ProblemType,
}

/// The library of optimization algorithms.
#[derive(Default)]
pub struct OptimizationLibrary {
    descriptions: HashMap<String, OptAlgorithmDescription>,
    algo_name: Option<String>,
}

impl OptimizationLibrary {
    /// Create the library with its built-in algorithms.
    pub fn new() -> Self {
        let mut descriptions = HashMap::new();
        descriptions.insert(
            PGD_BACKTRACKING.to_string(),
            OptAlgorithmDescription {
                name: PGD_BACKTRACKING.to_string(),
                handle_integer_variables: false,
                require_gradient: true,
                handle_equality_constraints: false,
                handle_inequality_constraints: false,
                problem_type: ProblemType::NonLinear,
            },
        );
        OptimizationLibrary {
            descriptions,
            algo_name: None,
        }
    }

    /// The default options of an optimization run.
    pub fn default_options() -> DriverOptions {
        DriverOptions::default()
    }

    /// The names of the available algorithms.
    pub fn algo_names(&self) -> Vec<String> {
        self.descriptions.keys().cloned().collect()
    }

    /// The description of an algorithm, if available.
    pub fn description(&self, algo_name: &str) -> Option<&OptAlgorithmDescription> {
        self.descriptions.get(algo_name)
    }

    /// Why the algorithm cannot handle the problem, `None` when it can.
    pub fn unsuitability_reason(
        description: &OptAlgorithmDescription,
        problem: &OptimizationProblem,
    ) -> Option<UnsuitabilityReason> {
        if problem.design_space().is_empty() {
            return Some(UnsuitabilityReason::EmptyDesignSpace);
        }
        if problem.has_eq_constraints() && !description.handle_equality_constraints {
            return Some(UnsuitabilityReason::EqualityConstraints);
        }
        if problem.has_ineq_constraints() && !description.handle_inequality_constraints {
            return Some(UnsuitabilityReason::InequalityConstraints);
        }
        if problem.pb_type() == ProblemType::NonLinear
            && description.problem_type == ProblemType::Linear
        {
            return Some(UnsuitabilityReason::NonLinearProblem);
        }
        None
    }

    /// Solve the problem with the given algorithm.
    ///
    /// When `algo_name` is `None` the name of the previous run on this
    /// library is reused; having none is an error.
    pub fn execute(
        &mut self,
        problem: &mut OptimizationProblem,
        algo_name: Option<&str>,
        options: DriverOptions,
    ) -> Result<OptimizationResult> {
        let algo_name = resolve_algo_name(algo_name, &self.algo_name, &self.algo_names())?;
        self.algo_name = Some(algo_name.clone());
        let description = self.descriptions[&algo_name].clone();

        if let Some(reason) = Self::unsuitability_reason(&description, problem) {
            return Err(AlgoError::UnsuitableAlgorithm { algo_name, reason });
        }
        check_integer_variables(
            problem,
            &algo_name,
            description.handle_integer_variables,
            options.skip_int_check,
        )?;
        if description.require_gradient && !problem.objective().has_jac() {
            return Err(AlgoError::InvalidConfig(format!(
                "the algorithm {algo_name} requires gradients but the objective {} \
                 has no Jacobian",
                problem.objective().name()
            )));
        }

        let max_iter = options.max_iter.ok_or_else(|| {
            AlgoError::InvalidValue(
                "the maximum number of iterations is not set".to_string(),
            )
        })?;
        setup_problem(problem, &options, max_iter)?;

        let normalize = normalization_eligible(problem, &options);
        problem.preprocess_functions(normalize, options.use_database, options.round_ints);
        info!("Running {algo_name} on {problem:?}");

        let start_time = Instant::now();
        let iteration_callback =
            register_iteration_callback(problem, &options, start_time, true);
        let kkt_callback = self.register_kkt_callback(problem, &options, &description);
        let observable_listener = register_observable_listener(problem)?;

        let outcome = match Self::pre_run(problem, &description) {
            Ok(()) => match algo_name.as_str() {
                PGD_BACKTRACKING => Self::run_pgd(problem),
                // registry and dispatch are kept consistent
                _ => unreachable!("unregistered algorithm {algo_name}"),
            },
            Err(err) => Err(err),
        };

        problem.callbacks().remove(iteration_callback);
        if let Some(id) = kkt_callback {
            problem.callbacks().remove(id);
        }
        if let Some(id) = observable_listener {
            problem.database().remove_listener(id);
        }

        let result = recover_result(problem, outcome, &algo_name)?;
        finalize_run(problem, &result);
        Ok(result)
    }

    /// Register the KKT store callback when a KKT tolerance is set.
    fn register_kkt_callback(
        &self,
        problem: &OptimizationProblem,
        options: &DriverOptions,
        description: &OptAlgorithmDescription,
    ) -> Option<crate::problem::CallbackId> {
        if options.kkt_tol_abs.is_none() && options.kkt_tol_rel.is_none() {
            return None;
        }
        if !description.require_gradient {
            return None;
        }
        let criterion = KktCriterion::from_problem(problem);
        let reference_norm: Arc<Mutex<Option<f64>>> = Arc::new(Mutex::new(None));
        let (kkt_tol_abs, kkt_tol_rel) = (options.kkt_tol_abs, options.kkt_tol_rel);
        Some(problem.callbacks().add_store_callback(move |x| {
            if let Some(norm) = criterion.residual_norm(&x.view()) {
                let mut reference = reference_norm.lock().unwrap();
                if reference.is_none() {
                    *reference = Some(norm);
                }
                debug!("KKT residual norm: {norm:.6e}");
                if is_kkt_norm_reached(norm, *reference, kkt_tol_abs, kkt_tol_rel) {
                    return Err(StopSignal::KktReached);
                }
            }
            Ok(())
        }))
    }

    /// Evaluate the problem functions at the initial design vector.
    fn pre_run(
        problem: &mut OptimizationProblem,
        description: &OptAlgorithmDescription,
    ) -> Result<()> {
        let x0 = problem.initial_x();
        problem.evaluate_functions(&x0.view(), description.require_gradient, false)?;
        Ok(())
    }

    /// The projected gradient descent loop.
    ///
    /// Runs in the wrapper space (unit hypercube when normalized) and
    /// relies on the stopping criteria for termination; it only returns by
    /// itself when the projected step underflows.
    fn run_pgd(problem: &OptimizationProblem) -> Result<String> {
        let wrapped = problem.wrapped()?;
        let objective = &wrapped.objective;
        let space = problem.design_space();
        let (lower, upper) = if wrapped.normalized {
            (
                Array1::zeros(space.dimension()),
                Array1::ones(space.dimension()),
            )
        } else {
            (space.lower_bounds().clone(), space.upper_bounds().clone())
        };
        let project = |x: &Array1<f64>| -> Array1<f64> {
            x.iter()
                .zip(lower.iter().zip(upper.iter()))
                .map(|(&xi, (&l, &u))| xi.max(l).min(u))
                .collect()
        };

        let x0 = space
            .current_value()
            .cloned()
            .expect("the current value is initialized by pre_run");
        let mut x = if wrapped.normalized {
            space.normalize_vect(&x0.view())?
        } else {
            x0
        };
        let mut f = objective
            .evaluate(&x.view())?
            .scalar()
            .ok_or_else(|| {
                AlgoError::InvalidValue("the objective value is not scalar".to_string())
            })?;

        loop {
            let jac = objective.jacobian(&x.view())?;
            let grad = jac.row(0).to_owned();

            let mut alpha = 1.0;
            let mut accepted = None;
            for _ in 0..MAX_HALVINGS {
                let x_new = project(&(&x - &(&grad * alpha)));
                let step = &x - &x_new;
                let step_norm = step.norm_l2();
                if step_norm <= f64::EPSILON {
                    return Ok(
                        "The projected gradient step underflowed; the iterate is \
                         first-order stationary."
                            .to_string(),
                    );
                }
                let f_new = objective.evaluate(&x_new.view())?.scalar().ok_or_else(|| {
                    AlgoError::InvalidValue(
                        "the objective value is not scalar".to_string(),
                    )
                })?;
                // projection guarantees grad . step > 0
                if f_new <= f - ARMIJO_C1 * grad.dot(&step) {
                    accepted = Some((x_new, f_new));
                    break;
                }
                alpha *= 0.5;
            }
            match accepted {
                Some((x_new, f_new)) => {
                    debug!("Accepted step to {x_new} with objective {f_new:.6e}");
                    x = x_new;
                    f = f_new;
                }
                None => {
                    return Ok(
                        "The line search found no decrease; the iterate is \
                         first-order stationary."
                            .to_string(),
                    )
                }
            }
        }
    }
}
