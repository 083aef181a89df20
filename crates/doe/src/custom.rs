use crate::SamplingMethod;
use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix2, s};

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// A DoE made of samples provided by the user, given in the unit hypercube.
///
/// Used by the custom DOE driver to feed user-defined sample sets through
/// the same machinery as the generated designs.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Custom<F: Float> {
    /// Sampling space definition as a (nx, 2) matrix
    /// The ith row is the [lower_bound, upper_bound] of xi, the ith component of x
    xlimits: Array2<F>,
    /// User samples in the unit hypercube, as a (ns, nx) matrix
    unit_samples: Array2<F>,
}

impl<F: Float> Custom<F> {
    /// Constructor given a sampling space and the unit-hypercube samples.
    ///
    /// **Panics** if xlimits number of columns is different from 2 or if the
    /// samples dimension does not match the sampling space dimension.
    pub fn new(
        xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>,
        unit_samples: &ArrayBase<impl Data<Elem = F>, Ix2>,
    ) -> Self {
        if xlimits.ncols() != 2 {
            panic!("xlimits must have 2 columns (lower, upper)");
        }
        if unit_samples.ncols() != xlimits.nrows() {
            panic!(
                "samples dimension ({}) does not match sampling space dimension ({})",
                unit_samples.ncols(),
                xlimits.nrows()
            );
        }
        Custom {
            xlimits: xlimits.to_owned(),
            unit_samples: unit_samples.to_owned(),
        }
    }

    /// The number of samples provided by the user.
    pub fn n_samples(&self) -> usize {
        self.unit_samples.nrows()
    }
}

impl<F: Float> SamplingMethod<F> for Custom<F> {
    fn bounds(&self) -> &Array2<F> {
        &self.xlimits
    }

    fn sample_unit(&self, ns: usize) -> Array2<F> {
        if ns > self.unit_samples.nrows() {
            panic!(
                "requested {} samples but only {} were provided",
                ns,
                self.unit_samples.nrows()
            );
        }
        self.unit_samples.slice(s![0..ns, ..]).to_owned()
    }
}
