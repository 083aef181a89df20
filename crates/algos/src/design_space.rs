//! The design space of an optimization problem: bounds, variable types,
//! current value and the normalization mappings between the physical space
//! and the unit hypercube.

use ndarray::{Array1, Array2, ArrayBase, ArrayView1, ArrayView2, Axis, Data, Ix2};
use serde::{Deserialize, Serialize};

use crate::errors::{AlgoError, Result};

/// The type of a design variable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    /// A continuous variable
    #[default]
    Float,
    /// A variable constrained to integer values
    Integer,
}

/// A bounded design space with typed variables and an optional current value.
///
/// Normalization maps the components with finite bounds onto `[0, 1]`;
/// asking for it on a space with unbounded components is an error.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DesignSpace {
    lower: Array1<f64>,
    upper: Array1<f64>,
    types: Vec<VariableType>,
    names: Vec<String>,
    current: Option<Array1<f64>>,
}

impl DesignSpace {
    /// Constructor given bounds as a (nx, 2) matrix \[\[lower bound, upper bound\], ...\].
    ///
    /// **Panics** if xlimits number of columns is different from 2 or if a
    /// lower bound exceeds its upper bound.
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = f64>, Ix2>) -> Self {
        if xlimits.ncols() != 2 {
            panic!("xlimits must have 2 columns (lower, upper)");
        }
        let lower = xlimits.column(0).to_owned();
        let upper = xlimits.column(1).to_owned();
        Self::from_bounds(lower, upper)
    }

    /// Constructor given lower and upper bound vectors.
    ///
    /// **Panics** if the bounds have different lengths or if a lower bound
    /// exceeds its upper bound.
    pub fn from_bounds(lower: Array1<f64>, upper: Array1<f64>) -> Self {
        if lower.len() != upper.len() {
            panic!(
                "lower bounds dimension ({}) does not match upper bounds dimension ({})",
                lower.len(),
                upper.len()
            );
        }
        for (i, (&l, &u)) in lower.iter().zip(upper.iter()).enumerate() {
            if l > u {
                panic!("lower bound {l} exceeds upper bound {u} for component {i}");
            }
        }
        let dim = lower.len();
        DesignSpace {
            lower,
            upper,
            types: vec![VariableType::Float; dim],
            names: (0..dim).map(|i| format!("x_{i}")).collect(),
            current: None,
        }
    }

    /// A unit hypercube design space of the given dimension.
    pub fn unit(dimension: usize) -> Self {
        Self::from_bounds(Array1::zeros(dimension), Array1::ones(dimension))
    }

    /// Set the variable types.
    ///
    /// **Panics** if the number of types does not match the dimension.
    pub fn with_types(mut self, types: Vec<VariableType>) -> Self {
        if types.len() != self.dimension() {
            panic!(
                "got {} variable types for a {}-dimensional space",
                types.len(),
                self.dimension()
            );
        }
        self.types = types;
        self
    }

    /// Set the variable names.
    ///
    /// **Panics** if the number of names does not match the dimension.
    pub fn with_names(mut self, names: Vec<String>) -> Self {
        if names.len() != self.dimension() {
            panic!(
                "got {} variable names for a {}-dimensional space",
                names.len(),
                self.dimension()
            );
        }
        self.names = names;
        self
    }

    /// Set the current value.
    pub fn with_current_value(mut self, x: Array1<f64>) -> Self {
        self.set_current_value(x);
        self
    }

    /// The number of design variables.
    pub fn dimension(&self) -> usize {
        self.lower.len()
    }

    /// Whether the space contains no variable.
    pub fn is_empty(&self) -> bool {
        self.lower.is_empty()
    }

    /// The lower bounds.
    pub fn lower_bounds(&self) -> &Array1<f64> {
        &self.lower
    }

    /// The upper bounds.
    pub fn upper_bounds(&self) -> &Array1<f64> {
        &self.upper
    }

    /// The bounds as a (nx, 2) matrix, the layout the DOE samplers expect.
    pub fn xlimits(&self) -> Array2<f64> {
        let mut xlimits = Array2::zeros((self.dimension(), 2));
        xlimits.column_mut(0).assign(&self.lower);
        xlimits.column_mut(1).assign(&self.upper);
        xlimits
    }

    /// The variable names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// The variable types.
    pub fn types(&self) -> &[VariableType] {
        &self.types
    }

    /// Whether at least one variable is integer-typed.
    pub fn has_integer_variables(&self) -> bool {
        self.types.iter().any(|t| *t == VariableType::Integer)
    }

    /// The current value, if set.
    pub fn current_value(&self) -> Option<&Array1<f64>> {
        self.current.as_ref()
    }

    /// Set the current value.
    ///
    /// **Panics** if the dimension does not match.
    pub fn set_current_value(&mut self, x: Array1<f64>) {
        if x.len() != self.dimension() {
            panic!(
                "current value dimension ({}) does not match design space dimension ({})",
                x.len(),
                self.dimension()
            );
        }
        self.current = Some(x);
    }

    /// Set the current value to the middle of the bounds when missing;
    /// components with an infinite bound default to zero.
    pub fn initialize_missing_current_value(&mut self) {
        if self.current.is_some() {
            return;
        }
        let mid = self
            .lower
            .iter()
            .zip(self.upper.iter())
            .map(|(&l, &u)| {
                if l.is_finite() && u.is_finite() {
                    0.5 * (l + u)
                } else {
                    0.
                }
            })
            .collect();
        self.current = Some(self.round_vect_owned(mid));
    }

    /// The indices of the components with an infinite bound.
    pub fn unbounded_components(&self) -> Vec<usize> {
        self.lower
            .iter()
            .zip(self.upper.iter())
            .enumerate()
            .filter(|(_, (l, u))| !l.is_finite() || !u.is_finite())
            .map(|(i, _)| i)
            .collect()
    }

    /// Round the integer-typed components to the nearest integer.
    pub fn round_vect(&self, x: &ArrayView1<f64>) -> Array1<f64> {
        self.round_vect_owned(x.to_owned())
    }

    fn round_vect_owned(&self, mut x: Array1<f64>) -> Array1<f64> {
        for (xi, t) in x.iter_mut().zip(self.types.iter()) {
            if *t == VariableType::Integer {
                *xi = xi.round();
            }
        }
        x
    }

    /// Clip a design vector into the bounds, componentwise.
    pub fn project_into_bounds(&self, x: &ArrayView1<f64>) -> Array1<f64> {
        x.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&xi, (&l, &u))| xi.max(l).min(u))
            .collect()
    }

    fn check_normalizable(&self) -> Result<()> {
        let unbounded = self.unbounded_components();
        if unbounded.is_empty() {
            Ok(())
        } else {
            Err(AlgoError::InvalidValue(format!(
                "the design space cannot be normalized: components {unbounded:?} \
                 have an infinite bound"
            )))
        }
    }

    /// Map a physical design vector onto the unit hypercube.
    ///
    /// Components with equal bounds map to zero.
    pub fn normalize_vect(&self, x: &ArrayView1<f64>) -> Result<Array1<f64>> {
        self.check_normalizable()?;
        Ok(x.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&xi, (&l, &u))| if u > l { (xi - l) / (u - l) } else { 0. })
            .collect())
    }

    /// Map a unit-hypercube design vector back to the physical space.
    pub fn unnormalize_vect(&self, x: &ArrayView1<f64>) -> Result<Array1<f64>> {
        self.check_normalizable()?;
        Ok(x.iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .map(|(&xi, (&l, &u))| l + xi * (u - l))
            .collect())
    }

    /// Convert a physical-space Jacobian into the normalized space:
    /// column `i` is multiplied by the width of the `i`th bounds.
    pub fn normalize_grad(&self, jac: &ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check_normalizable()?;
        let mut out = jac.to_owned();
        for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            col *= self.upper[j] - self.lower[j];
        }
        Ok(out)
    }

    /// Convert a normalized-space Jacobian back to the physical space:
    /// column `i` is divided by the width of the `i`th bounds.
    pub fn unnormalize_grad(&self, jac: &ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check_normalizable()?;
        let mut out = jac.to_owned();
        for (j, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            let width = self.upper[j] - self.lower[j];
            if width > 0. {
                col /= width;
            }
        }
        Ok(out)
    }
}

/// A sampling space given to [`compute_doe`](crate::DoeLibrary::compute_doe):
/// either a full design space or a bare dimension standing for the unit
/// hypercube.
#[derive(Clone, Debug)]
pub enum VariableSpace {
    /// An explicit design space
    Space(DesignSpace),
    /// A dimension, understood as the unit hypercube of that dimension
    Dimension(usize),
}

impl From<DesignSpace> for VariableSpace {
    fn from(space: DesignSpace) -> Self {
        VariableSpace::Space(space)
    }
}

impl From<usize> for VariableSpace {
    fn from(dimension: usize) -> Self {
        VariableSpace::Dimension(dimension)
    }
}

impl VariableSpace {
    /// The underlying design space.
    pub fn into_design_space(self) -> DesignSpace {
        match self {
            VariableSpace::Space(space) => space,
            VariableSpace::Dimension(dim) => DesignSpace::unit(dim),
        }
    }
}
