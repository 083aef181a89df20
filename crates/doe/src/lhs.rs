use std::sync::{Arc, RwLock};

use crate::SamplingMethod;
use linfa::Float;
use ndarray::{Array2, ArrayBase, Data, Ix2};
use ndarray_rand::rand::seq::SliceRandom;
use ndarray_rand::rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256Plus;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// Kinds of Latin Hypercube designs
#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub enum LhsKind {
    /// Sample is chosen randomly within its stratum
    #[default]
    Classic,
    /// Sample is the center of its stratum
    Centered,
}

type RngRef<R> = Arc<RwLock<R>>;

/// The Latin Hypercube design divides each dimension in `ns` strata and
/// draws one sample per stratum such that each one-dimensional projection
/// of the DoE contains exactly one sample per stratum.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct Lhs<F: Float, R: Rng> {
    /// Sampling space definition as a (nx, 2) matrix
    /// The ith row is the [lower_bound, upper_bound] of xi, the ith component of x
    xlimits: Array2<F>,
    /// The kind of LHS
    kind: LhsKind,
    /// Random generator used for reproducibility
    rng: RngRef<R>,
}

impl<F: Float> Lhs<F, Xoshiro256Plus> {
    /// Constructor given a sampling space as a (nx, 2) matrix \[\[lower bound, upper bound\], ...\]
    ///
    /// ```
    /// use mdobox_doe::Lhs;
    /// use ndarray::arr2;
    ///
    /// let doe = Lhs::new(&arr2(&[[0.0, 1.0], [5.0, 10.0]]));
    /// ```
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Self {
        Self::new_with_rng(xlimits, Xoshiro256Plus::from_entropy())
    }
}

impl<F: Float, R: Rng> Lhs<F, R> {
    /// Constructor given a sampling space and a random generator for reproducibility.
    ///
    /// **Panics** if xlimits number of columns is different from 2.
    pub fn new_with_rng(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>, rng: R) -> Self {
        if xlimits.ncols() != 2 {
            panic!("xlimits must have 2 columns (lower, upper)");
        }
        Lhs {
            xlimits: xlimits.to_owned(),
            kind: LhsKind::default(),
            rng: Arc::new(RwLock::new(rng)),
        }
    }

    /// Set the kind of LHS
    pub fn kind(mut self, kind: LhsKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set random generator
    pub fn with_rng<R2: Rng>(self, rng: R2) -> Lhs<F, R2> {
        Lhs {
            xlimits: self.xlimits,
            kind: self.kind,
            rng: Arc::new(RwLock::new(rng)),
        }
    }
}

impl<F: Float, R: Rng> SamplingMethod<F> for Lhs<F, R> {
    fn bounds(&self) -> &Array2<F> {
        &self.xlimits
    }

    fn sample_unit(&self, ns: usize) -> Array2<F> {
        let nx = self.xlimits.nrows();
        let mut rng = self.rng.write().unwrap();
        let mut doe = Array2::zeros((ns, nx));
        for j in 0..nx {
            let mut strata: Vec<usize> = (0..ns).collect();
            strata.shuffle(&mut *rng);
            for (i, stratum) in strata.iter().enumerate() {
                let offset = match self.kind {
                    LhsKind::Classic => rng.gen::<f64>(),
                    LhsKind::Centered => 0.5,
                };
                doe[[i, j]] = F::cast((*stratum as f64 + offset) / ns as f64);
            }
        }
        doe
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    /// Each column of a LHS must contain exactly one sample per stratum
    fn assert_latin<F: Float>(unit: &Array2<F>) {
        let ns = unit.nrows();
        for col in unit.columns() {
            let mut strata: Vec<usize> = col
                .iter()
                .map(|&v| (v.to_f64().unwrap() * ns as f64).floor() as usize)
                .collect();
            strata.sort_unstable();
            assert_eq!(strata, (0..ns).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_lhs_classic() {
        let xlimits = arr2(&[[5., 10.], [0., 1.], [-4., 3.]]);
        let unit = Lhs::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(42))
            .sample_unit(10);
        assert_latin(&unit);
    }

    #[test]
    fn test_lhs_centered() {
        let xlimits = arr2(&[[0f64, 1.], [0., 1.]]);
        let unit = Lhs::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(42))
            .kind(LhsKind::Centered)
            .sample_unit(4);
        assert_latin(&unit);
        // Centered samples sit in the middle of their stratum
        for &v in unit.iter() {
            let scaled = v * 4.;
            assert!((scaled - scaled.floor() - 0.5).abs() < 1e-12);
        }
    }

    #[test]
    fn test_lhs_scaling() {
        let xlimits = arr2(&[[5., 10.]]);
        let samples = Lhs::new(&xlimits)
            .with_rng(Xoshiro256Plus::seed_from_u64(42))
            .sample(8);
        for &v in samples.iter() {
            assert!((5. ..=10.).contains(&v));
        }
    }

    #[cfg(feature = "serializable")]
    #[test]
    fn test_lhs_serde() {
        let xlimits = arr2(&[[5., 10.], [0., 1.]]);
        let lhs: Lhs<f64, Xoshiro256Plus> =
            Lhs::new(&xlimits).with_rng(Xoshiro256Plus::seed_from_u64(42));
        let json = serde_json::to_string(&lhs).expect("lhs serialized");
        let lhs2: Lhs<f64, Xoshiro256Plus> = serde_json::from_str(&json).expect("lhs deserialized");
        assert_eq!(lhs.sample(5), lhs2.sample(5));
    }
}
