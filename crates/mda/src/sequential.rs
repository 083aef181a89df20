//! Sequential MDA compositions: chain inner solvers on the same data and
//! stop at the first converged one.

use std::fmt;
use std::sync::Arc;

use log::debug;

use crate::base::{Mda, ResidualScaling};
use crate::discipline::{Discipline, DisciplineData};
use crate::errors::{MdaError, Result};
use crate::gauss_seidel::{MdaGaussSeidel, DEFAULT_MAX_ITER, DEFAULT_TOLERANCE};
use crate::newton::MdaNewtonRaphson;

/// A chain of inner MDA solvers.
///
/// The solvers run in order on the accumulating data; the chain stops as
/// soon as one of them converges, so a cheap solver can warm-start an
/// expensive one. The residual history concatenates the inner histories.
pub struct MdaSequential {
    name: String,
    inner: Vec<Box<dyn Mda>>,
    tolerance: f64,
    normed_residual: f64,
    history: Vec<f64>,
}

impl MdaSequential {
    /// Constructor given the inner solvers, run in order.
    pub fn new(inner: Vec<Box<dyn Mda>>) -> Result<Self> {
        if inner.is_empty() {
            return Err(MdaError::InvalidConfig(
                "a sequential MDA needs at least one inner MDA".to_string(),
            ));
        }
        Ok(MdaSequential {
            name: "MDASequential".to_string(),
            inner,
            tolerance: DEFAULT_TOLERANCE,
            normed_residual: f64::INFINITY,
            history: vec![],
        })
    }

    /// Set the convergence tolerance reported by the chain.
    ///
    /// The inner solvers keep their own tolerances, which drive the early
    /// stop of the chain.
    pub fn tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

impl fmt::Debug for MdaSequential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdaSequential")
            .field("name", &self.name)
            .field(
                "inner",
                &self.inner.iter().map(|mda| mda.name()).collect::<Vec<_>>(),
            )
            .field("tolerance", &self.tolerance)
            .finish()
    }
}

impl Mda for MdaSequential {
    fn name(&self) -> &str {
        &self.name
    }

    fn tolerance(&self) -> f64 {
        self.tolerance
    }

    fn normed_residual(&self) -> f64 {
        self.normed_residual
    }

    fn residual_history(&self) -> &[f64] {
        &self.history
    }

    fn execute(&mut self, data: &DisciplineData) -> Result<DisciplineData> {
        self.history.clear();
        self.normed_residual = f64::INFINITY;
        let mut local = data.clone();
        for mda in &mut self.inner {
            local = mda.execute(&local)?;
            self.history.extend_from_slice(mda.residual_history());
            self.normed_residual = mda.normed_residual();
            if mda.normed_residual() <= mda.tolerance() {
                debug!("{}: {} converged, stopping the chain", self.name, mda.name());
                break;
            }
        }
        Ok(local)
    }
}

/// The usual Gauss-Seidel-then-Newton chain: a few fixed-point sweeps
/// bring the couplings close enough for the Newton iterations to converge
/// quadratically.
pub struct MdaGSNewton {
    name: String,
    inner: MdaSequential,
}

impl MdaGSNewton {
    /// Constructor given the coupled disciplines, with the default
    /// tolerance and iteration budget for both inner solvers.
    pub fn new(disciplines: Vec<Arc<dyn Discipline>>) -> Result<Self> {
        Self::with_settings(disciplines, DEFAULT_TOLERANCE, DEFAULT_MAX_ITER)
    }

    /// Constructor with a shared tolerance and per-solver iteration
    /// budget.
    pub fn with_settings(
        disciplines: Vec<Arc<dyn Discipline>>,
        tolerance: f64,
        max_iter: usize,
    ) -> Result<Self> {
        let gauss_seidel = MdaGaussSeidel::new(disciplines.clone())?
            .tolerance(tolerance)
            .max_mda_iter(max_iter);
        let newton = MdaNewtonRaphson::new(disciplines)?
            .tolerance(tolerance)
            .max_mda_iter(max_iter)
            // Gauss-Seidel leaves the couplings close, full steps are safe
            .relaxation(1.0)
            .scaling(ResidualScaling::NoScaling);
        Ok(MdaGSNewton {
            name: "MDAGSNewton".to_string(),
            inner: MdaSequential::new(vec![Box::new(gauss_seidel), Box::new(newton)])?
                .tolerance(tolerance),
        })
    }
}

impl fmt::Debug for MdaGSNewton {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MdaGSNewton")
            .field("name", &self.name)
            .field("inner", &self.inner)
            .finish()
    }
}

impl Mda for MdaGSNewton {
    fn name(&self) -> &str {
        &self.name
    }

    fn tolerance(&self) -> f64 {
        // fully qualified: the inherent builder of the same name would
        // shadow the trait getter
        Mda::tolerance(&self.inner)
    }

    fn normed_residual(&self) -> f64 {
        self.inner.normed_residual()
    }

    fn residual_history(&self) -> &[f64] {
        self.inner.residual_history()
    }

    fn execute(&mut self, data: &DisciplineData) -> Result<DisciplineData> {
        self.inner.execute(data)
    }
}
