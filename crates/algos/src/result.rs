//! The result of a driver run, recovered from the evaluation database.

use std::collections::HashMap;

use ndarray::Array1;

use crate::database::FunctionValue;
use crate::function::FunctionType;
use crate::problem::OptimizationProblem;

/// The outcome of a driver run.
///
/// Whatever terminated the run, the result is recovered from the database:
/// the best point is the feasible entry with the lowest objective value or,
/// when no entry is feasible, the entry with the smallest constraint
/// violation.
#[derive(Clone, Debug, Default)]
pub struct OptimizationResult {
    /// The best design vector found, `None` when nothing was evaluated
    pub x_opt: Option<Array1<f64>>,
    /// The objective value at the best point
    pub f_opt: Option<f64>,
    /// The constraint values at the best point
    pub constraint_values: HashMap<String, FunctionValue>,
    /// Whether the best point satisfies the constraints within tolerances
    pub is_feasible: bool,
    /// The user-facing termination message
    pub message: String,
    /// The name of the algorithm which produced the result
    pub algo_name: String,
    /// The number of iterations, i.e. of distinct evaluated design vectors
    pub n_iter: usize,
    /// The number of calls to the raw objective function
    pub n_obj_calls: usize,
}

impl OptimizationResult {
    /// Recover the result of a run from the problem database.
    pub fn from_problem(
        problem: &OptimizationProblem,
        message: impl Into<String>,
        algo_name: impl Into<String>,
    ) -> Self {
        let obj_name = problem.objective().name();
        let ineq_tol = problem.ineq_tolerance();
        let eq_tol = problem.eq_tolerance();

        let mut best: Option<(Array1<f64>, f64, HashMap<String, FunctionValue>)> = None;
        let mut best_feasible = false;
        let mut best_violation = f64::INFINITY;

        for (x, record) in problem.database().entries() {
            let f = match record.get(obj_name).and_then(|v| v.scalar()) {
                Some(f) if !f.is_nan() => f,
                _ => continue,
            };
            let mut cstr_values = HashMap::new();
            let mut violation = 0.;
            let mut feasible = true;
            let mut complete = true;
            for constraint in problem.constraints() {
                let value = match record.get(constraint.name()) {
                    Some(v) => v.clone(),
                    None => {
                        complete = false;
                        break;
                    }
                };
                if let Some(components) = value.vector() {
                    for &c in components.iter() {
                        let excess = match constraint.f_type() {
                            FunctionType::EqConstraint => (c.abs() - eq_tol).max(0.),
                            _ => (c - ineq_tol).max(0.),
                        };
                        if excess > 0. {
                            feasible = false;
                            violation += excess * excess;
                        }
                    }
                }
                cstr_values.insert(constraint.name().to_string(), value);
            }
            if !complete {
                continue;
            }

            let better = match (&best, feasible, best_feasible) {
                (None, _, _) => true,
                (Some(_), true, false) => true,
                (Some(_), false, true) => false,
                (Some((_, best_f, _)), true, true) => f < *best_f,
                (Some(_), false, false) => violation < best_violation,
            };
            if better {
                best = Some((x, f, cstr_values));
                best_feasible = feasible;
                best_violation = violation;
            }
        }

        let (x_opt, f_opt, constraint_values) = match best {
            Some((x, f, c)) => (Some(x), Some(f), c),
            None => (None, None, HashMap::new()),
        };
        OptimizationResult {
            x_opt,
            f_opt,
            constraint_values,
            is_feasible: best_feasible,
            message: message.into(),
            algo_name: algo_name.into(),
            n_iter: problem.counter().current(),
            n_obj_calls: problem.objective().n_calls(),
        }
    }
}

impl std::fmt::Display for OptimizationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Optimization result:")?;
        writeln!(f, "   Algorithm: {}", self.algo_name)?;
        writeln!(f, "   Message: {}", self.message)?;
        writeln!(f, "   Number of iterations: {}", self.n_iter)?;
        match (&self.x_opt, self.f_opt) {
            (Some(x), Some(obj)) => {
                writeln!(f, "   Objective: {obj}")?;
                writeln!(f, "   Feasible: {}", self.is_feasible)?;
                write!(f, "   Design vector: {x}")
            }
            _ => write!(f, "   No design vector was evaluated"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::FunctionRecord;
    use crate::design_space::DesignSpace;
    use crate::function::MdoFunction;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn store(problem: &OptimizationProblem, x: f64, entries: Vec<(&str, f64)>) {
        let mut record = FunctionRecord::new();
        for (name, value) in entries {
            record.insert(name.to_string(), FunctionValue::Scalar(value));
        }
        problem.database().store(&array![x].view(), record);
    }

    fn constrained_problem() -> OptimizationProblem {
        let space = DesignSpace::new(&array![[0.0, 10.0]]);
        let obj = MdoFunction::new("f", FunctionType::Objective, |x| {
            Array1::from_elem(1, x[0])
        });
        let mut problem = OptimizationProblem::new(space, obj);
        problem.add_constraint(MdoFunction::new(
            "g",
            FunctionType::IneqConstraint,
            |x| Array1::from_elem(1, 1.0 - x[0]),
        ));
        problem
    }

    #[test]
    fn test_best_feasible_point_wins() {
        let problem = constrained_problem();
        // infeasible but lowest objective
        store(&problem, 0.0, vec![("f", 0.0), ("g", 1.0)]);
        // feasible
        store(&problem, 2.0, vec![("f", 2.0), ("g", -1.0)]);
        store(&problem, 3.0, vec![("f", 3.0), ("g", -2.0)]);

        let result = OptimizationResult::from_problem(&problem, "done", "TEST");
        assert!(result.is_feasible);
        assert_abs_diff_eq!(result.x_opt.unwrap(), array![2.0], epsilon = 1e-12);
        assert_abs_diff_eq!(result.f_opt.unwrap(), 2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_least_infeasible_point_when_nothing_feasible() {
        let problem = constrained_problem();
        store(&problem, 0.0, vec![("f", 0.0), ("g", 1.0)]);
        store(&problem, 0.5, vec![("f", 0.5), ("g", 0.5)]);

        let result = OptimizationResult::from_problem(&problem, "done", "TEST");
        assert!(!result.is_feasible);
        assert_abs_diff_eq!(result.x_opt.unwrap(), array![0.5], epsilon = 1e-12);
    }

    #[test]
    fn test_empty_database_gives_no_point() {
        let problem = constrained_problem();
        let result = OptimizationResult::from_problem(&problem, "done", "TEST");
        assert!(result.x_opt.is_none());
        assert!(result.f_opt.is_none());
        assert!(!result.is_feasible);
    }

    #[test]
    fn test_nan_objective_entries_are_skipped() {
        let problem = constrained_problem();
        store(&problem, 1.0, vec![("f", f64::NAN), ("g", -0.5)]);
        store(&problem, 2.0, vec![("f", 2.0), ("g", -1.0)]);
        let result = OptimizationResult::from_problem(&problem, "done", "TEST");
        assert_abs_diff_eq!(result.x_opt.unwrap(), array![2.0], epsilon = 1e-12);
    }
}
