//! The definition of an optimization problem: a design space, an objective,
//! constraints and observables, plus the shared state a driver run needs
//! (database, iteration counter, callback registry).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ndarray::{Array1, Array2, ArrayView1};

use crate::database::{Database, FunctionValue};
use crate::design_space::DesignSpace;
use crate::errors::{AlgoError, Result};
use crate::function::{FunctionType, MdoFunction, NormDbFunction};
use crate::stop_criteria::{IterationCounter, StopSignal};

/// The nature of the optimization problem.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProblemType {
    /// Objective and constraints are all linear
    Linear,
    /// At least one function is non-linear
    #[default]
    NonLinear,
}

/// An identifier returned when registering a driver callback, used to
/// deregister it later.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CallbackId(usize);

type Callback =
    Arc<dyn Fn(&Array1<f64>) -> std::result::Result<(), StopSignal> + Send + Sync>;

/// Driver callbacks run by the function wrappers around database stores.
///
/// New-iteration callbacks run once per design vector, right after its
/// record first becomes non-empty; store callbacks run after every store.
/// A callback terminates the run by returning a [`StopSignal`].
#[derive(Default)]
pub struct CallbackRegistry {
    inner: Mutex<CallbackSet>,
}

#[derive(Default)]
struct CallbackSet {
    next_id: usize,
    new_iter: Vec<(usize, Callback)>,
    store: Vec<(usize, Callback)>,
}

impl CallbackRegistry {
    /// Register a callback run once per new design vector.
    pub fn add_new_iter_callback(
        &self,
        callback: impl Fn(&Array1<f64>) -> std::result::Result<(), StopSignal>
            + Send
            + Sync
            + 'static,
    ) -> CallbackId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.new_iter.push((id, Arc::new(callback)));
        CallbackId(id)
    }

    /// Register a callback run after every store.
    pub fn add_store_callback(
        &self,
        callback: impl Fn(&Array1<f64>) -> std::result::Result<(), StopSignal>
            + Send
            + Sync
            + 'static,
    ) -> CallbackId {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.store.push((id, Arc::new(callback)));
        CallbackId(id)
    }

    /// Deregister a callback; returns whether it was registered.
    pub fn remove(&self, id: CallbackId) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let n_before = inner.new_iter.len() + inner.store.len();
        inner.new_iter.retain(|(cid, _)| *cid != id.0);
        inner.store.retain(|(cid, _)| *cid != id.0);
        n_before != inner.new_iter.len() + inner.store.len()
    }

    pub(crate) fn run_new_iter(&self, x: &Array1<f64>) -> Result<()> {
        let callbacks: Vec<Callback> = {
            let inner = self.inner.lock().unwrap();
            inner.new_iter.iter().map(|(_, c)| c.clone()).collect()
        };
        for callback in callbacks {
            callback(x)?;
        }
        Ok(())
    }

    pub(crate) fn run_store(&self, x: &Array1<f64>) -> Result<()> {
        let callbacks: Vec<Callback> = {
            let inner = self.inner.lock().unwrap();
            inner.store.iter().map(|(_, c)| c.clone()).collect()
        };
        for callback in callbacks {
            callback(x)?;
        }
        Ok(())
    }
}

/// The function wrappers built by
/// [`OptimizationProblem::preprocess_functions`].
pub struct WrappedFunctions {
    /// The wrapped objective
    pub objective: NormDbFunction,
    /// The wrapped constraints
    pub constraints: Vec<NormDbFunction>,
    /// The wrapped observables
    pub observables: Vec<NormDbFunction>,
    /// Whether the wrappers expect design vectors in the unit hypercube
    pub normalized: bool,
}

/// An optimization problem over a bounded design space.
pub struct OptimizationProblem {
    design_space: DesignSpace,
    objective: MdoFunction,
    constraints: Vec<MdoFunction>,
    observables: Vec<MdoFunction>,
    database: Arc<Database>,
    counter: Arc<IterationCounter>,
    callbacks: Arc<CallbackRegistry>,
    stop_if_nan: bool,
    ineq_tolerance: f64,
    eq_tolerance: f64,
    pb_type: ProblemType,
    wrapped: Option<WrappedFunctions>,
}

impl OptimizationProblem {
    /// Feasibility tolerance applied to constraints by default.
    pub const DEFAULT_CSTR_TOL: f64 = 1e-4;

    /// Constructor given a design space and the objective to minimize.
    pub fn new(design_space: DesignSpace, objective: MdoFunction) -> Self {
        OptimizationProblem {
            design_space,
            objective,
            constraints: vec![],
            observables: vec![],
            database: Arc::new(Database::new()),
            counter: Arc::new(IterationCounter::default()),
            callbacks: Arc::new(CallbackRegistry::default()),
            stop_if_nan: true,
            ineq_tolerance: Self::DEFAULT_CSTR_TOL,
            eq_tolerance: Self::DEFAULT_CSTR_TOL,
            pb_type: ProblemType::default(),
            wrapped: None,
        }
    }

    /// Add a constraint.
    ///
    /// **Panics** if the function type is not a constraint type.
    pub fn add_constraint(&mut self, constraint: MdoFunction) {
        match constraint.f_type() {
            FunctionType::IneqConstraint | FunctionType::EqConstraint => {
                self.constraints.push(constraint)
            }
            other => panic!("cannot add a function of type {other:?} as a constraint"),
        }
    }

    /// Add an observable, evaluated and recorded alongside the objective.
    pub fn add_observable(&mut self, observable: MdoFunction) {
        self.observables.push(observable);
    }

    /// The design space.
    pub fn design_space(&self) -> &DesignSpace {
        &self.design_space
    }

    /// The design space, mutably.
    pub fn design_space_mut(&mut self) -> &mut DesignSpace {
        &mut self.design_space
    }

    /// The evaluation database.
    pub fn database(&self) -> &Arc<Database> {
        &self.database
    }

    /// The shared iteration counter.
    pub fn counter(&self) -> &Arc<IterationCounter> {
        &self.counter
    }

    /// The driver callback registry.
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    /// The raw objective.
    pub fn objective(&self) -> &MdoFunction {
        &self.objective
    }

    /// The raw constraints.
    pub fn constraints(&self) -> &[MdoFunction] {
        &self.constraints
    }

    /// The raw observables.
    pub fn observables(&self) -> &[MdoFunction] {
        &self.observables
    }

    /// Whether the problem has at least one equality constraint.
    pub fn has_eq_constraints(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| c.f_type() == FunctionType::EqConstraint)
    }

    /// Whether the problem has at least one inequality constraint.
    pub fn has_ineq_constraints(&self) -> bool {
        self.constraints
            .iter()
            .any(|c| c.f_type() == FunctionType::IneqConstraint)
    }

    /// The nature of the problem, linear or non-linear.
    pub fn pb_type(&self) -> ProblemType {
        self.pb_type
    }

    /// Declare the nature of the problem.
    pub fn set_pb_type(&mut self, pb_type: ProblemType) {
        self.pb_type = pb_type;
    }

    /// Whether NaN outputs terminate the run.
    pub fn stop_if_nan(&self) -> bool {
        self.stop_if_nan
    }

    /// Set whether NaN outputs terminate the run.
    pub fn set_stop_if_nan(&mut self, stop_if_nan: bool) {
        self.stop_if_nan = stop_if_nan;
    }

    /// The inequality feasibility tolerance.
    pub fn ineq_tolerance(&self) -> f64 {
        self.ineq_tolerance
    }

    /// The equality feasibility tolerance.
    pub fn eq_tolerance(&self) -> f64 {
        self.eq_tolerance
    }

    /// Set the constraint feasibility tolerances.
    pub fn set_tolerances(&mut self, ineq_tolerance: f64, eq_tolerance: f64) {
        self.ineq_tolerance = ineq_tolerance;
        self.eq_tolerance = eq_tolerance;
    }

    /// Check that the problem is well-formed.
    pub fn check(&self) -> Result<()> {
        if self.design_space.is_empty() {
            return Err(AlgoError::InvalidConfig(
                "the design space is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Build the [`NormDbFunction`] wrappers around the raw functions.
    ///
    /// Calling it again rebuilds the wrappers, e.g. with another
    /// normalization setting; the database is kept.
    pub fn preprocess_functions(
        &mut self,
        normalize: bool,
        use_database: bool,
        round_ints: bool,
    ) {
        let wrap = |func: &MdoFunction| {
            NormDbFunction::new(
                func.clone(),
                normalize,
                round_ints,
                self.stop_if_nan,
                use_database,
                self.design_space.clone(),
                self.database.clone(),
                self.counter.clone(),
                self.callbacks.clone(),
            )
        };
        self.wrapped = Some(WrappedFunctions {
            objective: wrap(&self.objective),
            constraints: self.constraints.iter().map(wrap).collect(),
            observables: self.observables.iter().map(wrap).collect(),
            normalized: normalize,
        });
    }

    /// The function wrappers; an error when
    /// [`preprocess_functions`](Self::preprocess_functions) was not called.
    pub fn wrapped(&self) -> Result<&WrappedFunctions> {
        self.wrapped.as_ref().ok_or_else(|| {
            AlgoError::InvalidConfig(
                "the problem functions are not preprocessed".to_string(),
            )
        })
    }

    /// Evaluate the problem functions at a physical design vector.
    ///
    /// Returns the function values and, when `eval_jac` is set, the
    /// physical-space Jacobians keyed by gradient name.
    pub fn evaluate_functions(
        &self,
        x: &ArrayView1<f64>,
        eval_jac: bool,
        eval_observables: bool,
    ) -> Result<(
        HashMap<String, FunctionValue>,
        HashMap<String, Array2<f64>>,
    )> {
        let wrapped = self.wrapped()?;
        let x_eval: Array1<f64> = if wrapped.normalized {
            self.design_space.normalize_vect(x)?
        } else {
            x.to_owned()
        };

        let mut values = HashMap::new();
        let mut jacobians = HashMap::new();

        let mut functions: Vec<&NormDbFunction> = vec![&wrapped.objective];
        functions.extend(wrapped.constraints.iter());
        if eval_observables {
            functions.extend(wrapped.observables.iter());
        }

        for func in functions {
            let value = func.evaluate(&x_eval.view())?;
            values.insert(func.name().to_string(), value);
            if eval_jac && func.has_jac() && func.f_type() != FunctionType::Observable {
                let jac = func.jacobian(&x_eval.view())?;
                let jac_u = if wrapped.normalized {
                    self.design_space.unnormalize_grad(&jac.view())?
                } else {
                    jac
                };
                jacobians.insert(Database::gradient_name(func.name()), jac_u);
            }
        }
        Ok((values, jacobians))
    }

    /// The physical design vector a driver run starts from, initializing
    /// the current value to the middle of the bounds when missing.
    pub fn initial_x(&mut self) -> Array1<f64> {
        self.design_space.initialize_missing_current_value();
        self.design_space
            .current_value()
            .cloned()
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for OptimizationProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationProblem")
            .field("objective", &self.objective.name())
            .field(
                "constraints",
                &self
                    .constraints
                    .iter()
                    .map(|c| c.name())
                    .collect::<Vec<_>>(),
            )
            .field("dimension", &self.design_space.dimension())
            .field("pb_type", &self.pb_type)
            .finish()
    }
}
