//! Functions attached to an optimization problem.
//!
//! An [`MdoFunction`] is the raw user function: it always takes a physical
//! design vector. The driver never calls it directly but through a
//! [`NormDbFunction`] wrapper built by
//! [`OptimizationProblem::preprocess_functions`](crate::OptimizationProblem::preprocess_functions),
//! which layers unnormalization, integer rounding, NaN guards, database
//! caching and the stopping-criteria hooks on top of it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use ndarray::{Array1, Array2, ArrayView1};

use crate::database::{Database, DesignKey, FunctionValue};
use crate::design_space::DesignSpace;
use crate::errors::{AlgoError, Result};
use crate::problem::CallbackRegistry;
use crate::stop_criteria::{IterationCounter, StopSignal};

/// The role of a function in an optimization problem.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionType {
    /// The objective to minimize
    Objective,
    /// An inequality constraint, feasible when non-positive
    IneqConstraint,
    /// An equality constraint, feasible when zero
    EqConstraint,
    /// An observable, evaluated and recorded but not driving the algorithm
    Observable,
}

type EvalFn = Arc<dyn Fn(&ArrayView1<f64>) -> Result<Array1<f64>> + Send + Sync>;
type JacFn = Arc<dyn Fn(&ArrayView1<f64>) -> Result<Array2<f64>> + Send + Sync>;

/// A named function over physical design vectors, with an optional Jacobian.
///
/// Cloning is cheap and clones share the same call counter.
#[derive(Clone)]
pub struct MdoFunction {
    name: String,
    f_type: FunctionType,
    func: EvalFn,
    jac: Option<JacFn>,
    n_calls: Arc<AtomicUsize>,
}

impl MdoFunction {
    /// Constructor given an infallible function.
    pub fn new(
        name: impl Into<String>,
        f_type: FunctionType,
        func: impl Fn(&ArrayView1<f64>) -> Array1<f64> + Send + Sync + 'static,
    ) -> Self {
        Self::from_fallible(name, f_type, move |x| Ok(func(x)))
    }

    /// Constructor given a function which may fail, e.g. a wrapped solver.
    pub fn from_fallible(
        name: impl Into<String>,
        f_type: FunctionType,
        func: impl Fn(&ArrayView1<f64>) -> Result<Array1<f64>> + Send + Sync + 'static,
    ) -> Self {
        MdoFunction {
            name: name.into(),
            f_type,
            func: Arc::new(func),
            jac: None,
            n_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Attach the analytic Jacobian, a (n_outputs, n_inputs) matrix.
    pub fn with_jac(
        mut self,
        jac: impl Fn(&ArrayView1<f64>) -> Array2<f64> + Send + Sync + 'static,
    ) -> Self {
        self.jac = Some(Arc::new(move |x| Ok(jac(x))));
        self
    }

    /// The function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The role of the function in the problem.
    pub fn f_type(&self) -> FunctionType {
        self.f_type
    }

    /// Whether an analytic Jacobian is attached.
    pub fn has_jac(&self) -> bool {
        self.jac.is_some()
    }

    /// The number of calls to the underlying function, cache misses only.
    pub fn n_calls(&self) -> usize {
        self.n_calls.load(Ordering::SeqCst)
    }

    /// Evaluate at a physical design vector.
    pub fn evaluate(&self, x: &ArrayView1<f64>) -> Result<Array1<f64>> {
        self.n_calls.fetch_add(1, Ordering::SeqCst);
        (self.func)(x)
    }

    /// Evaluate the Jacobian at a physical design vector.
    pub fn jacobian(&self, x: &ArrayView1<f64>) -> Result<Array2<f64>> {
        match &self.jac {
            Some(jac) => jac(x),
            None => Err(AlgoError::InvalidConfig(format!(
                "the function {} has no Jacobian",
                self.name
            ))),
        }
    }
}

impl std::fmt::Debug for MdoFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MdoFunction")
            .field("name", &self.name)
            .field("f_type", &self.f_type)
            .field("has_jac", &self.has_jac())
            .finish()
    }
}

/// The driver-facing view of an [`MdoFunction`].
///
/// Depending on its configuration the wrapper:
/// * rejects NaN design vectors with [`StopSignal::DesvarIsNan`],
/// * unnormalizes the input from the unit hypercube,
/// * rounds integer-typed components,
/// * looks the value up in the database and only calls the raw function on
///   a cache miss,
/// * raises [`StopSignal::MaxIterReached`] instead of evaluating a new
///   point once the evaluation budget is exhausted,
/// * stores the result and runs the driver callbacks.
///
/// Values are always stored at the physical (unnormalized, rounded) design
/// vector, so the database reads the same whatever the normalization
/// setting of the run.
#[derive(Clone)]
pub struct NormDbFunction {
    func: MdoFunction,
    normalize: bool,
    round_ints: bool,
    stop_if_nan: bool,
    use_database: bool,
    trigger_callbacks: bool,
    space: DesignSpace,
    database: Arc<Database>,
    counter: Arc<IterationCounter>,
    callbacks: Arc<CallbackRegistry>,
}

impl NormDbFunction {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        func: MdoFunction,
        normalize: bool,
        round_ints: bool,
        stop_if_nan: bool,
        use_database: bool,
        space: DesignSpace,
        database: Arc<Database>,
        counter: Arc<IterationCounter>,
        callbacks: Arc<CallbackRegistry>,
    ) -> Self {
        let trigger_callbacks = func.f_type() != FunctionType::Observable;
        NormDbFunction {
            func,
            normalize,
            round_ints,
            stop_if_nan,
            use_database,
            trigger_callbacks,
            space,
            database,
            counter,
            callbacks,
        }
    }

    /// The name of the wrapped function.
    pub fn name(&self) -> &str {
        self.func.name()
    }

    /// The role of the wrapped function.
    pub fn f_type(&self) -> FunctionType {
        self.func.f_type()
    }

    /// Whether the wrapper expects design vectors in the unit hypercube.
    pub fn expects_normalized(&self) -> bool {
        self.normalize
    }

    /// Whether an analytic Jacobian is attached.
    pub fn has_jac(&self) -> bool {
        self.func.has_jac()
    }

    fn to_physical(&self, x_vect: &ArrayView1<f64>) -> Result<Array1<f64>> {
        if x_vect.iter().any(|v| v.is_nan()) {
            return Err(StopSignal::DesvarIsNan.into());
        }
        let x_u = if self.normalize {
            self.space.unnormalize_vect(x_vect)?
        } else {
            x_vect.to_owned()
        };
        if self.round_ints {
            Ok(self.space.round_vect(&x_u.view()))
        } else {
            Ok(x_u)
        }
    }

    /// Check the budget before evaluating at a design vector that is not
    /// in the database yet.
    fn check_budget(&self, key: &DesignKey) -> Result<()> {
        if !self.database.contains_non_empty(key) && self.counter.is_max_reached() {
            Err(StopSignal::MaxIterReached.into())
        } else {
            Ok(())
        }
    }

    fn store_and_notify(&self, x_u: &Array1<f64>, name: &str, value: FunctionValue) -> Result<()> {
        let mut record = crate::database::FunctionRecord::new();
        record.insert(name.to_string(), value);
        let new_point = self.database.store(&x_u.view(), record);
        if self.trigger_callbacks {
            if new_point {
                self.callbacks.run_new_iter(x_u)?;
            }
            self.callbacks.run_store(x_u)?;
        }
        Ok(())
    }

    /// Evaluate the wrapped function.
    ///
    /// `x_vect` lives in the unit hypercube when the wrapper normalizes,
    /// in the physical space otherwise.
    pub fn evaluate(&self, x_vect: &ArrayView1<f64>) -> Result<FunctionValue> {
        let x_u = self.to_physical(x_vect)?;
        let key = DesignKey::from_x(&x_u.view());

        if self.use_database {
            if let Some(value) = self
                .database
                .get_function_value_at_key(self.func.name(), &key)
            {
                return Ok(value);
            }
            self.check_budget(&key)?;
        }

        let output = self.func.evaluate(&x_u.view())?;
        if self.stop_if_nan && output.iter().any(|v| v.is_nan()) {
            return Err(StopSignal::FunctionIsNan.into());
        }
        let value = FunctionValue::from(output);

        if self.use_database {
            self.store_and_notify(&x_u, self.func.name(), value.clone())?;
        }
        Ok(value)
    }

    /// Evaluate the Jacobian of the wrapped function.
    ///
    /// The Jacobian is stored in the database in physical space under the
    /// gradient name and returned in the space the wrapper works in.
    pub fn jacobian(&self, x_vect: &ArrayView1<f64>) -> Result<Array2<f64>> {
        let x_u = self.to_physical(x_vect)?;
        let key = DesignKey::from_x(&x_u.view());
        let grad_name = Database::gradient_name(self.func.name());

        let jac_u = match self
            .use_database
            .then(|| self.database.get_function_value_at_key(&grad_name, &key))
            .flatten()
        {
            Some(FunctionValue::Matrix(jac)) => jac,
            Some(_) => {
                return Err(AlgoError::InvalidValue(format!(
                    "the database entry {grad_name} is not a Jacobian"
                )))
            }
            None => {
                if self.use_database {
                    self.check_budget(&key)?;
                }
                let jac = self.func.jacobian(&x_u.view())?;
                if self.stop_if_nan && jac.iter().any(|v| v.is_nan()) {
                    return Err(StopSignal::FunctionIsNan.into());
                }
                if self.use_database {
                    self.store_and_notify(&x_u, &grad_name, FunctionValue::Matrix(jac.clone()))?;
                }
                jac
            }
        };

        if self.normalize {
            self.space.normalize_grad(&jac_u.view())
        } else {
            Ok(jac_u)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn sum_of_squares() -> MdoFunction {
        MdoFunction::new("f", FunctionType::Objective, |x| {
            Array1::from_elem(1, x.iter().map(|v| v * v).sum())
        })
        .with_jac(|x| {
            Array2::from_shape_vec((1, x.len()), x.iter().map(|v| 2. * v).collect()).unwrap()
        })
    }

    fn wrapper(func: MdoFunction, normalize: bool, space: DesignSpace) -> NormDbFunction {
        NormDbFunction::new(
            func,
            normalize,
            true,
            true,
            true,
            space,
            Arc::new(Database::new()),
            Arc::new(IterationCounter::default()),
            Arc::new(CallbackRegistry::default()),
        )
    }

    #[test]
    fn test_caching_calls_the_function_once() {
        let func = sum_of_squares();
        let space = DesignSpace::new(&array![[-1.0, 1.0], [-1.0, 1.0]]);
        let wrapped = wrapper(func.clone(), false, space);

        let x = array![0.5, 0.5];
        let v1 = wrapped.evaluate(&x.view()).unwrap();
        let v2 = wrapped.evaluate(&x.view()).unwrap();
        assert_eq!(v1, v2);
        assert_eq!(func.n_calls(), 1);
    }

    #[test]
    fn test_normalized_evaluation() {
        let func = sum_of_squares();
        let space = DesignSpace::new(&array![[0.0, 2.0]]);
        let wrapped = wrapper(func, true, space);

        // 0.75 in the unit hypercube is 1.5 in [0, 2]
        let value = wrapped.evaluate(&array![0.75].view()).unwrap();
        assert_abs_diff_eq!(value.scalar().unwrap(), 2.25, epsilon = 1e-12);
        // the database records the physical point
        assert!(wrapped
            .database
            .get_function_value("f", &array![1.5].view())
            .is_some());
    }

    #[test]
    fn test_normalized_jacobian() {
        let func = sum_of_squares();
        let space = DesignSpace::new(&array![[0.0, 2.0]]);
        let wrapped = wrapper(func, true, space);

        let jac = wrapped.jacobian(&array![0.75].view()).unwrap();
        // d f / d x_n = (d f / d x_u) * width = 2 * 1.5 * 2
        assert_abs_diff_eq!(jac[[0, 0]], 6.0, epsilon = 1e-12);
        // stored in physical space
        let stored = wrapped
            .database
            .get_function_value("@f", &array![1.5].view())
            .unwrap();
        assert_abs_diff_eq!(stored.matrix().unwrap()[[0, 0]], 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_design_vector_raises() {
        let func = sum_of_squares();
        let space = DesignSpace::new(&array![[0.0, 1.0]]);
        let wrapped = wrapper(func, false, space);
        let err = wrapped.evaluate(&array![f64::NAN].view()).unwrap_err();
        assert!(matches!(
            err,
            AlgoError::Terminated(StopSignal::DesvarIsNan)
        ));
    }

    #[test]
    fn test_nan_output_raises_when_stop_if_nan() {
        let func = MdoFunction::new("f", FunctionType::Objective, |_| {
            Array1::from_elem(1, f64::NAN)
        });
        let space = DesignSpace::new(&array![[0.0, 1.0]]);
        let wrapped = wrapper(func, false, space);
        let err = wrapped.evaluate(&array![0.5].view()).unwrap_err();
        assert!(matches!(
            err,
            AlgoError::Terminated(StopSignal::FunctionIsNan)
        ));
    }

    #[test]
    fn test_budget_raises_before_new_point_only() {
        let func = sum_of_squares();
        let space = DesignSpace::new(&array![[0.0, 1.0]]);
        let wrapped = wrapper(func, false, space);
        wrapped.counter.set_max_iter(1);

        wrapped.evaluate(&array![0.5].view()).unwrap();
        wrapped.counter.increment();
        // cached point still readable after the budget is exhausted
        wrapped.evaluate(&array![0.5].view()).unwrap();
        let err = wrapped.evaluate(&array![0.6].view()).unwrap_err();
        assert!(matches!(
            err,
            AlgoError::Terminated(StopSignal::MaxIterReached)
        ));
    }

    #[test]
    fn test_integer_rounding_merges_cache_entries() {
        let func = sum_of_squares();
        let space = DesignSpace::new(&array![[0.0, 10.0]])
            .with_types(vec![crate::design_space::VariableType::Integer]);
        let wrapped = wrapper(func.clone(), false, space);

        wrapped.evaluate(&array![2.4].view()).unwrap();
        wrapped.evaluate(&array![1.6].view()).unwrap();
        assert_eq!(func.n_calls(), 1);
        assert_eq!(wrapped.database.n_entries(), 1);
    }
}
