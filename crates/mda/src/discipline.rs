//! The discipline abstraction: a named mapping from input variables to
//! output variables, with an optional Jacobian.

use std::collections::HashMap;

use ndarray::{Array1, Array2};

use crate::errors::{MdaError, Result};

/// The data exchanged between disciplines: variable name to value.
pub type DisciplineData = HashMap<String, Array1<f64>>;

/// Discipline Jacobian blocks: output name to input name to the
/// (output dimension, input dimension) partial derivative matrix.
pub type JacobianData = HashMap<String, HashMap<String, Array2<f64>>>;

/// A simulation unit of an MDO process.
///
/// A discipline is opaque to the solvers: only its input and output names
/// and its execution are visible. Implementations must be thread-safe;
/// [`execute`](Discipline::execute) takes `&self` so a discipline can be
/// shared between solvers.
pub trait Discipline: Send + Sync {
    /// The discipline name, used in logs and error messages.
    fn name(&self) -> &str;

    /// The names of the input variables.
    fn input_names(&self) -> &[String];

    /// The names of the output variables.
    fn output_names(&self) -> &[String];

    /// Whether all the given variables are inputs of the discipline.
    fn is_all_inputs_existing(&self, names: &[String]) -> bool {
        names.iter().all(|name| self.input_names().contains(name))
    }

    /// Whether all the given variables are outputs of the discipline.
    fn is_all_outputs_existing(&self, names: &[String]) -> bool {
        names.iter().all(|name| self.output_names().contains(name))
    }

    /// Compute the outputs from the inputs.
    ///
    /// `inputs` holds at least the variables of
    /// [`input_names`](Discipline::input_names); extra entries are allowed
    /// and ignored.
    fn execute(&self, inputs: &DisciplineData) -> Result<DisciplineData>;

    /// Compute the Jacobian blocks of the outputs with respect to the
    /// inputs.
    ///
    /// The default implementation reports the discipline as
    /// non-differentiable, which Newton-based solvers turn into an error.
    fn linearize(&self, inputs: &DisciplineData) -> Result<JacobianData> {
        let _ = inputs;
        Err(MdaError::MissingJacobian(self.name().to_string()))
    }
}

/// Check that all discipline inputs are present, with a precise error.
pub(crate) fn check_inputs(discipline: &dyn Discipline, data: &DisciplineData) -> Result<()> {
    for name in discipline.input_names() {
        if !data.contains_key(name) {
            return Err(MdaError::MissingInput {
                name: name.clone(),
                discipline: discipline.name().to_string(),
            });
        }
    }
    Ok(())
}

type ExecuteFn = Box<dyn Fn(&DisciplineData) -> Result<DisciplineData> + Send + Sync>;
type LinearizeFn = Box<dyn Fn(&DisciplineData) -> Result<JacobianData> + Send + Sync>;

/// A discipline wrapping plain callables, the usual way to plug an
/// external solver or an analytic model into an MDA.
pub struct CallableDiscipline {
    name: String,
    input_names: Vec<String>,
    output_names: Vec<String>,
    execute: ExecuteFn,
    linearize: Option<LinearizeFn>,
}

impl CallableDiscipline {
    /// Constructor given the variable names and the execution callable.
    pub fn new(
        name: impl Into<String>,
        input_names: &[&str],
        output_names: &[&str],
        execute: impl Fn(&DisciplineData) -> Result<DisciplineData> + Send + Sync + 'static,
    ) -> Self {
        CallableDiscipline {
            name: name.into(),
            input_names: input_names.iter().map(|s| s.to_string()).collect(),
            output_names: output_names.iter().map(|s| s.to_string()).collect(),
            execute: Box::new(execute),
            linearize: None,
        }
    }

    /// Attach the linearization callable.
    pub fn with_linearize(
        mut self,
        linearize: impl Fn(&DisciplineData) -> Result<JacobianData> + Send + Sync + 'static,
    ) -> Self {
        self.linearize = Some(Box::new(linearize));
        self
    }
}

impl Discipline for CallableDiscipline {
    fn name(&self) -> &str {
        &self.name
    }

    fn input_names(&self) -> &[String] {
        &self.input_names
    }

    fn output_names(&self) -> &[String] {
        &self.output_names
    }

    fn execute(&self, inputs: &DisciplineData) -> Result<DisciplineData> {
        (self.execute)(inputs)
    }

    fn linearize(&self, inputs: &DisciplineData) -> Result<JacobianData> {
        match &self.linearize {
            Some(linearize) => linearize(inputs),
            None => Err(MdaError::MissingJacobian(self.name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_callable_discipline() {
        let d = CallableDiscipline::new("double", &["x"], &["y"], |data| {
            Ok(HashMap::from([("y".to_string(), &data["x"] * 2.0)]))
        });
        assert_eq!(d.name(), "double");
        assert_eq!(d.input_names(), ["x".to_string()]);
        let out = d
            .execute(&HashMap::from([("x".to_string(), array![1.5])]))
            .unwrap();
        assert_eq!(out["y"], array![3.0]);
        assert!(matches!(
            d.linearize(&DisciplineData::new()),
            Err(MdaError::MissingJacobian(_))
        ));
    }

    #[test]
    fn test_variable_membership() {
        let d = CallableDiscipline::new("d", &["a", "b"], &["c"], |_| {
            Ok(DisciplineData::new())
        });
        assert!(d.is_all_inputs_existing(&["a".to_string(), "b".to_string()]));
        assert!(!d.is_all_inputs_existing(&["a".to_string(), "c".to_string()]));
        assert!(d.is_all_outputs_existing(&["c".to_string()]));
        assert!(!d.is_all_outputs_existing(&["a".to_string()]));
        assert!(d.is_all_outputs_existing(&[]));
    }

    #[test]
    fn test_check_inputs() {
        let d = CallableDiscipline::new("d", &["a", "b"], &["c"], |_| {
            Ok(DisciplineData::new())
        });
        let data = HashMap::from([("a".to_string(), array![0.0])]);
        let err = check_inputs(&d, &data).unwrap_err();
        assert!(err.to_string().contains('b'));
    }
}
