//! First-order optimality measure used by the KKT stopping criterion.
//!
//! The residual is computed from database entries only: the criterion can
//! fire only once the objective gradient (and the gradients of the active
//! constraints) are stored at the current design vector.

use std::sync::Arc;

use linfa_linalg::cholesky::*;
use linfa_linalg::norm::Norm;
use linfa_linalg::triangular::*;
use ndarray::{Array1, Array2, ArrayView1, Axis};

use crate::database::{Database, FunctionValue};
use crate::function::FunctionType;
use crate::problem::OptimizationProblem;

// Tikhonov factor keeping the normal equations positive definite when
// active gradients are collinear.
const RIDGE: f64 = 1e-12;

// A bound is considered active within this distance.
const BOUND_ACTIVITY_TOL: f64 = 1e-8;

/// The state the KKT criterion needs, snapshotted from a problem so it can
/// be captured by a `'static` driver callback.
#[derive(Clone)]
pub struct KktCriterion {
    objective_name: String,
    constraints: Vec<(String, FunctionType)>,
    lower: Array1<f64>,
    upper: Array1<f64>,
    ineq_tolerance: f64,
    database: Arc<Database>,
}

impl KktCriterion {
    /// Snapshot the problem state the criterion reads.
    pub fn from_problem(problem: &OptimizationProblem) -> Self {
        KktCriterion {
            objective_name: problem.objective().name().to_string(),
            constraints: problem
                .constraints()
                .iter()
                .map(|c| (c.name().to_string(), c.f_type()))
                .collect(),
            lower: problem.design_space().lower_bounds().clone(),
            upper: problem.design_space().upper_bounds().clone(),
            ineq_tolerance: problem.ineq_tolerance(),
            database: problem.database().clone(),
        }
    }

    /// Compute the KKT residual norm at a physical design vector from the
    /// database records, or `None` when a required value or gradient is
    /// missing.
    ///
    /// Active inequality rows get non-negative multipliers; the residual
    /// is the norm of the projected gradient of the Lagrangian.
    pub fn residual_norm(&self, x: &ArrayView1<f64>) -> Option<f64> {
        let obj_grad_name = Database::gradient_name(&self.objective_name);
        let grad = match self.database.get_function_value(&obj_grad_name, x)? {
            FunctionValue::Matrix(jac) if jac.nrows() == 1 => jac.row(0).to_owned(),
            FunctionValue::Vector(g) => g,
            _ => return None,
        };
        let dim = grad.len();

        // Active constraint gradients and whether their multiplier is signed
        let mut rows: Vec<Array1<f64>> = vec![];
        let mut is_inequality: Vec<bool> = vec![];

        for (name, f_type) in &self.constraints {
            let value = self.database.get_function_value(name, x)?.vector()?;
            let jac = self
                .database
                .get_function_value(&Database::gradient_name(name), x)?
                .matrix()?
                .clone();
            if jac.ncols() != dim || jac.nrows() != value.len() {
                return None;
            }
            for (i, &v) in value.iter().enumerate() {
                let active = match f_type {
                    FunctionType::IneqConstraint => v >= -self.ineq_tolerance,
                    _ => true,
                };
                if active {
                    rows.push(jac.row(i).to_owned());
                    is_inequality.push(*f_type == FunctionType::IneqConstraint);
                }
            }
        }

        // Active bounds act as inequality constraints l - x <= 0 and x - u <= 0
        for i in 0..dim {
            if self.lower[i].is_finite() && (x[i] - self.lower[i]).abs() <= BOUND_ACTIVITY_TOL {
                let mut row = Array1::zeros(dim);
                row[i] = -1.0;
                rows.push(row);
                is_inequality.push(true);
            }
            if self.upper[i].is_finite() && (self.upper[i] - x[i]).abs() <= BOUND_ACTIVITY_TOL {
                let mut row = Array1::zeros(dim);
                row[i] = 1.0;
                rows.push(row);
                is_inequality.push(true);
            }
        }

        if rows.is_empty() {
            return Some(grad.norm_l2());
        }

        // Least-squares multipliers of min ||grad + A^t lambda||, with
        // inequality multipliers clamped to be non-negative
        let n_active = rows.len();
        let mut a = Array2::zeros((n_active, dim));
        for (i, row) in rows.iter().enumerate() {
            a.row_mut(i).assign(row);
        }
        let gram = a.dot(&a.t()) + Array2::<f64>::eye(n_active) * RIDGE;
        let chol = gram.cholesky().ok()?;
        let rhs = (-a.dot(&grad)).insert_axis(Axis(1));
        let z = chol.solve_triangular(&rhs, UPLO::Lower).ok()?;
        let mut lambda = chol
            .t()
            .solve_triangular(&z, UPLO::Upper)
            .ok()?
            .remove_axis(Axis(1));
        for (l, &ineq) in lambda.iter_mut().zip(is_inequality.iter()) {
            if ineq && *l < 0. {
                *l = 0.;
            }
        }

        let residual = &grad + &a.t().dot(&lambda);
        Some(residual.norm_l2())
    }
}

/// Whether the KKT residual norm satisfies the absolute tolerance or the
/// relative tolerance scaled by the first recorded residual norm.
pub fn is_kkt_norm_reached(
    residual_norm: f64,
    reference_norm: Option<f64>,
    kkt_tol_abs: Option<f64>,
    kkt_tol_rel: Option<f64>,
) -> bool {
    if let Some(tol) = kkt_tol_abs {
        if residual_norm <= tol {
            return true;
        }
    }
    if let (Some(tol), Some(reference)) = (kkt_tol_rel, reference_norm) {
        if residual_norm <= tol * reference {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::FunctionRecord;
    use crate::design_space::DesignSpace;
    use crate::function::MdoFunction;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn store(
        problem: &OptimizationProblem,
        x: &Array1<f64>,
        entries: Vec<(&str, FunctionValue)>,
    ) {
        let mut record = FunctionRecord::new();
        for (name, value) in entries {
            record.insert(name.to_string(), value);
        }
        problem.database().store(&x.view(), record);
    }

    fn unconstrained() -> OptimizationProblem {
        let space = DesignSpace::new(&array![[-10.0, 10.0], [-10.0, 10.0]]);
        let obj = MdoFunction::new("f", FunctionType::Objective, |x| {
            Array1::from_elem(1, x.iter().map(|v| v * v).sum())
        });
        OptimizationProblem::new(space, obj)
    }

    #[test]
    fn test_unconstrained_residual_is_gradient_norm() {
        let problem = unconstrained();
        let x = array![3.0, 4.0];
        store(
            &problem,
            &x,
            vec![
                ("f", FunctionValue::Scalar(25.0)),
                ("@f", FunctionValue::Matrix(array![[6.0, 8.0]])),
            ],
        );
        let norm = KktCriterion::from_problem(&problem).residual_norm(&x.view()).unwrap();
        assert_abs_diff_eq!(norm, 10.0, epsilon = 1e-12);
    }

    #[test]
    fn test_missing_gradient_gives_none() {
        let problem = unconstrained();
        let x = array![1.0, 1.0];
        store(&problem, &x, vec![("f", FunctionValue::Scalar(2.0))]);
        assert!(KktCriterion::from_problem(&problem)
            .residual_norm(&x.view())
            .is_none());
    }

    #[test]
    fn test_active_bound_absorbs_gradient() {
        // minimum of f(x) = x on [0, 1] is at the active lower bound
        let space = DesignSpace::new(&array![[0.0, 1.0]]);
        let obj = MdoFunction::new("f", FunctionType::Objective, |x| {
            Array1::from_elem(1, x[0])
        });
        let problem = OptimizationProblem::new(space, obj);
        let x = array![0.0];
        store(
            &problem,
            &x,
            vec![
                ("f", FunctionValue::Scalar(0.0)),
                ("@f", FunctionValue::Matrix(array![[1.0]])),
            ],
        );
        let norm = KktCriterion::from_problem(&problem).residual_norm(&x.view()).unwrap();
        assert_abs_diff_eq!(norm, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_active_inequality_constraint() {
        // minimize x0 + x1 subject to 1 - x0 - x1 <= 0; optimum on the
        // constraint with multiplier 1
        let space = DesignSpace::new(&array![[-10.0, 10.0], [-10.0, 10.0]]);
        let obj = MdoFunction::new("f", FunctionType::Objective, |x| {
            Array1::from_elem(1, x[0] + x[1])
        });
        let mut problem = OptimizationProblem::new(space, obj);
        problem.add_constraint(MdoFunction::new(
            "g",
            FunctionType::IneqConstraint,
            |x| Array1::from_elem(1, 1.0 - x[0] - x[1]),
        ));
        let x = array![0.5, 0.5];
        store(
            &problem,
            &x,
            vec![
                ("f", FunctionValue::Scalar(1.0)),
                ("@f", FunctionValue::Matrix(array![[1.0, 1.0]])),
                ("g", FunctionValue::Scalar(0.0)),
                ("@g", FunctionValue::Matrix(array![[-1.0, -1.0]])),
            ],
        );
        let norm = KktCriterion::from_problem(&problem).residual_norm(&x.view()).unwrap();
        assert_abs_diff_eq!(norm, 0.0, epsilon = 1e-5);
    }

    #[test]
    fn test_tolerance_logic() {
        assert!(is_kkt_norm_reached(1e-7, None, Some(1e-6), None));
        assert!(!is_kkt_norm_reached(1e-5, None, Some(1e-6), None));
        assert!(is_kkt_norm_reached(1e-4, Some(1.0), None, Some(1e-3)));
        assert!(!is_kkt_norm_reached(1e-4, None, None, Some(1e-3)));
    }
}
