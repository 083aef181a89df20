//! Newton-Raphson MDA: solve the coupling residual with Newton steps
//! built from the discipline Jacobians.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use linfa_linalg::cholesky::*;
use linfa_linalg::triangular::*;
use log::warn;
use ndarray::{s, Array1, Array2, Axis};

use crate::base::{Mda, ResidualScaling, ResidualTracker};
use crate::coupling::CouplingStructure;
use crate::discipline::{check_inputs, Discipline, DisciplineData};
use crate::errors::{MdaError, Result};
use crate::gauss_seidel::{DEFAULT_MAX_ITER, DEFAULT_TOLERANCE};

/// Default over-relaxation factor of the Newton steps.
pub const DEFAULT_NEWTON_RELAXATION: f64 = 0.99;

const RIDGE: f64 = 1e-12;

/// A Newton-Raphson solver over the strongly coupled variables.
///
/// Each iteration executes and linearizes all the disciplines on the same
/// coupling values, stacks the coupling residual `G(y) - y` and solves the
/// Newton system `(dG/dy - I) dy = -(G(y) - y)` assembled from the
/// discipline Jacobian blocks. The disciplines must implement
/// [`linearize`](Discipline::linearize) for their coupling variables.
///
/// The caller provides initial guesses for all the strongly coupled
/// variables; a missing one is reported as a missing input.
pub struct MdaNewtonRaphson {
    name: String,
    disciplines: Vec<Arc<dyn Discipline>>,
    strong: Vec<String>,
    tracker: ResidualTracker,
    relaxation: f64,
}

impl MdaNewtonRaphson {
    /// Constructor given the coupled disciplines.
    ///
    /// Disciplines sharing no variable are an error, and so are
    /// disciplines whose couplings are all weak: the latter are resolved
    /// by a plain ordered execution, not by Newton iterations.
    pub fn new(disciplines: Vec<Arc<dyn Discipline>>) -> Result<Self> {
        let structure = CouplingStructure::new(&disciplines);
        if structure.all_couplings().is_empty() {
            return Err(MdaError::NoCoupling);
        }
        if structure.strong_couplings().is_empty() {
            return Err(MdaError::WeakCouplingOnly);
        }
        Ok(MdaNewtonRaphson {
            name: "MDANewtonRaphson".to_string(),
            strong: structure.strong_couplings().to_vec(),
            disciplines,
            tracker: ResidualTracker::new(DEFAULT_TOLERANCE, DEFAULT_MAX_ITER),
            relaxation: DEFAULT_NEWTON_RELAXATION,
        })
    }

    /// Set the convergence tolerance.
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tracker.tolerance = tolerance;
        self
    }

    /// Set the iteration budget.
    pub fn max_mda_iter(mut self, max_iter: usize) -> Self {
        self.tracker.max_iter = max_iter;
        self
    }

    /// Set the residual scaling.
    pub fn scaling(mut self, scaling: ResidualScaling) -> Self {
        self.tracker.scaling = scaling;
        self
    }

    /// Log the convergence at the info level.
    pub fn log_convergence(mut self, log_convergence: bool) -> Self {
        self.tracker.log_convergence = log_convergence;
        self
    }

    /// Set the relaxation factor applied to the Newton steps, in (0, 2).
    ///
    /// **Panics** when the factor is out of range.
    pub fn relaxation(mut self, relaxation: f64) -> Self {
        if relaxation <= 0. || relaxation >= 2. {
            panic!("the relaxation factor must lie in (0, 2), got {relaxation}");
        }
        self.relaxation = relaxation;
        self
    }

    /// Keep the residual history across runs.
    pub fn keep_history(mut self) -> Self {
        self.tracker.reset_history_each_run = false;
        self
    }

    /// The strongly coupled variable names, sorted.
    pub fn coupling_names(&self) -> &[String] {
        &self.strong
    }

    /// Solve `m dy = -r` through the normal equations with a small ridge.
    fn newton_step(m: &Array2<f64>, r: &Array1<f64>) -> Result<Array1<f64>> {
        let n = r.len();
        let gram = m.t().dot(m) + Array2::<f64>::eye(n) * RIDGE;
        let rhs = m.t().dot(&r.mapv(|v| -v)).insert_axis(Axis(1));
        let chol = gram.cholesky()?;
        let z = chol.solve_triangular(&rhs, UPLO::Lower)?;
        let dy = chol
            .t()
            .solve_triangular(&z, UPLO::Upper)?
            .remove_axis(Axis(1));
        Ok(dy)
    }
}

impl fmt::Debug for MdaNewtonRaphson {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdaNewtonRaphson")
            .field("name", &self.name)
            .field("strong", &self.strong)
            .field("tracker", &self.tracker)
            .field("relaxation", &self.relaxation)
            .finish()
    }
}

impl Mda for MdaNewtonRaphson {
    fn name(&self) -> &str {
        &self.name
    }

    fn tolerance(&self) -> f64 {
        self.tracker.tolerance
    }

    fn normed_residual(&self) -> f64 {
        self.tracker.normed_residual()
    }

    fn residual_history(&self) -> &[f64] {
        self.tracker.history()
    }

    fn execute(&mut self, data: &DisciplineData) -> Result<DisciplineData> {
        self.tracker.start_run();
        let mut local = data.clone();
        let mut iteration = 0;

        loop {
            iteration += 1;
            // all disciplines see the same coupling values (Jacobi sweep)
            let mut computed = DisciplineData::new();
            let mut jacobians = vec![];
            for discipline in &self.disciplines {
                check_inputs(discipline.as_ref(), &local)?;
                computed.extend(discipline.execute(&local)?);
                jacobians.push(discipline.linearize(&local)?);
            }

            // layout of the stacked coupling vector
            let mut offsets: HashMap<String, (usize, usize)> = HashMap::new();
            let mut total = 0;
            for name in &self.strong {
                let len = computed
                    .get(name)
                    .ok_or_else(|| {
                        MdaError::InvalidConfig(format!(
                            "the coupling variable {name} was not computed"
                        ))
                    })?
                    .len();
                offsets.insert(name.clone(), (total, len));
                total += len;
            }

            let mut residual = Array1::zeros(total);
            for name in &self.strong {
                let (offset, len) = offsets[name];
                let current = local.get(name).ok_or_else(|| MdaError::MissingInput {
                    name: name.clone(),
                    discipline: self.name.clone(),
                })?;
                residual
                    .slice_mut(s![offset..offset + len])
                    .assign(&(&computed[name] - current));
            }
            self.tracker
                .update(residual.dot(&residual).sqrt(), &self.name, iteration);

            // non-coupling outputs follow the current coupling values
            for (name, value) in &computed {
                if !self.strong.contains(name) {
                    local.insert(name.clone(), value.clone());
                }
            }

            if self.tracker.is_converged() {
                for name in &self.strong {
                    local.insert(name.clone(), computed[name].clone());
                }
                return Ok(local);
            }
            if iteration >= self.tracker.max_iter {
                warn!(
                    "{} did not converge in {} iterations (residual: {:.6e})",
                    self.name,
                    self.tracker.max_iter,
                    self.tracker.normed_residual()
                );
                return Ok(local);
            }

            // Newton system (dG/dy - I) dy = -(G(y) - y)
            let mut m = Array2::zeros((total, total));
            for jacobian in &jacobians {
                for (out_name, blocks) in jacobian {
                    let Some(&(row, n_rows)) = offsets.get(out_name) else {
                        continue;
                    };
                    for (in_name, block) in blocks {
                        let Some(&(col, n_cols)) = offsets.get(in_name) else {
                            continue;
                        };
                        if block.shape() != [n_rows, n_cols] {
                            return Err(MdaError::InvalidConfig(format!(
                                "the Jacobian block d{out_name}/d{in_name} has shape \
                                 {:?} instead of ({n_rows}, {n_cols})",
                                block.shape()
                            )));
                        }
                        m.slice_mut(s![row..row + n_rows, col..col + n_cols])
                            .assign(block);
                    }
                }
            }
            for i in 0..total {
                m[[i, i]] -= 1.0;
            }

            let step = match Self::newton_step(&m, &residual) {
                Ok(step) => step,
                Err(err) => {
                    warn!(
                        "{}: the Newton system could not be solved ({err}), \
                         falling back to a fixed-point step",
                        self.name
                    );
                    residual.clone()
                }
            };

            let mut updates = Vec::with_capacity(self.strong.len());
            for name in &self.strong {
                let (offset, len) = offsets[name];
                let delta = step
                    .slice(s![offset..offset + len])
                    .mapv(|v| v * self.relaxation);
                updates.push((name.clone(), &local[name] + &delta));
            }
            for (name, value) in updates {
                local.insert(name, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discipline::CallableDiscipline;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn linear_disciplines() -> Vec<Arc<dyn Discipline>> {
        // fixed point: i = z + j, j = 1 - 0.3 i, so with z = 2:
        // i* = 3 / 1.3, j* = 1 - 0.3 i*
        let d1 = CallableDiscipline::new("d1", &["z", "j"], &["i"], |data| {
            Ok(HashMap::from([("i".to_string(), &data["z"] + &data["j"])]))
        })
        .with_linearize(|_| {
            Ok(HashMap::from([(
                "i".to_string(),
                HashMap::from([
                    ("z".to_string(), array![[1.0]]),
                    ("j".to_string(), array![[1.0]]),
                ]),
            )]))
        });
        let d2 = CallableDiscipline::new("d2", &["i"], &["j"], |data| {
            Ok(HashMap::from([("j".to_string(), 1.0 - &data["i"] * 0.3)]))
        })
        .with_linearize(|_| {
            Ok(HashMap::from([(
                "j".to_string(),
                HashMap::from([("i".to_string(), array![[-0.3]])]),
            )]))
        });
        vec![Arc::new(d1), Arc::new(d2)]
    }

    fn initial_data() -> DisciplineData {
        HashMap::from([
            ("z".to_string(), array![2.0]),
            ("i".to_string(), array![0.0]),
            ("j".to_string(), array![0.0]),
        ])
    }

    #[test]
    fn test_newton_converges_in_one_full_step() {
        // the disciplines are linear, so a full Newton step is exact
        let mut mda = MdaNewtonRaphson::new(linear_disciplines())
            .unwrap()
            .relaxation(1.0)
            .tolerance(1e-10);
        let out = mda.execute(&initial_data()).unwrap();
        assert_abs_diff_eq!(out["i"][0], 3.0 / 1.3, epsilon = 1e-9);
        assert_abs_diff_eq!(out["j"][0], 1.0 - 0.9 / 1.3, epsilon = 1e-9);
        assert_eq!(mda.residual_history().len(), 2);
        assert!(mda.normed_residual() <= 1e-10);
    }

    #[test]
    fn test_default_relaxation_converges() {
        let mut mda = MdaNewtonRaphson::new(linear_disciplines())
            .unwrap()
            .tolerance(1e-5)
            .max_mda_iter(20);
        let out = mda.execute(&initial_data()).unwrap();
        assert_abs_diff_eq!(out["i"][0], 3.0 / 1.3, epsilon = 1e-4);
        // the damped steps contract the residual by 1 - relaxation
        assert!(mda.residual_history().len() > 2);
    }

    #[test]
    fn test_weakly_coupled_disciplines_are_rejected() {
        let d1 = CallableDiscipline::new("d1", &["a"], &["b"], |_| {
            Ok(DisciplineData::new())
        });
        let d2 = CallableDiscipline::new("d2", &["b"], &["c"], |_| {
            Ok(DisciplineData::new())
        });
        let err = MdaNewtonRaphson::new(vec![Arc::new(d1), Arc::new(d2)]).unwrap_err();
        assert!(matches!(err, MdaError::WeakCouplingOnly));
    }

    #[test]
    fn test_uncoupled_disciplines_are_rejected() {
        let d1 = CallableDiscipline::new("d1", &["a"], &["b"], |_| {
            Ok(DisciplineData::new())
        });
        let d2 = CallableDiscipline::new("d2", &["c"], &["d"], |_| {
            Ok(DisciplineData::new())
        });
        let err = MdaNewtonRaphson::new(vec![Arc::new(d1), Arc::new(d2)]).unwrap_err();
        assert!(matches!(err, MdaError::NoCoupling));
    }

    #[test]
    fn test_missing_jacobian_is_reported() {
        let d1 = CallableDiscipline::new("d1", &["z", "j"], &["i"], |data| {
            Ok(HashMap::from([("i".to_string(), &data["z"] + &data["j"])]))
        });
        let d2 = CallableDiscipline::new("d2", &["i"], &["j"], |data| {
            Ok(HashMap::from([("j".to_string(), 1.0 - &data["i"] * 0.3)]))
        });
        let mut mda = MdaNewtonRaphson::new(vec![Arc::new(d1), Arc::new(d2)]).unwrap();
        let err = mda.execute(&initial_data()).unwrap_err();
        assert!(matches!(err, MdaError::MissingJacobian(_)));
    }

    #[test]
    fn test_missing_initial_coupling_is_reported() {
        let mut mda = MdaNewtonRaphson::new(linear_disciplines()).unwrap();
        let data = HashMap::from([
            ("z".to_string(), array![2.0]),
            ("j".to_string(), array![0.0]),
        ]);
        let err = mda.execute(&data).unwrap_err();
        assert!(matches!(err, MdaError::MissingInput { .. }));
    }
}
