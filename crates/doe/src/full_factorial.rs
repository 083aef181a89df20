use crate::SamplingMethod;
use linfa::Float;
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2, s};
use ndarray_stats::QuantileExt;

#[cfg(feature = "serializable")]
use serde::{Deserialize, Serialize};

/// The FullFactorial design takes all combinations of evenly spread levels
/// along each component of the sampling space.
///
/// The number of levels per component is chosen as evenly as possible so
/// that the grid holds at least `ns` points, then the grid is truncated to
/// the first `ns` rows.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serializable", derive(Serialize, Deserialize))]
pub struct FullFactorial<F: Float> {
    /// Sampling space definition as a (nx, 2) matrix
    /// The ith row is the [lower_bound, upper_bound] of xi, the ith component of x
    xlimits: Array2<F>,
}

impl<F: Float> FullFactorial<F> {
    /// Constructor given a sampling space as a (nx, 2) matrix \[\[lower bound, upper bound\], ...\]
    ///
    /// ```
    /// use mdobox_doe::FullFactorial;
    /// use ndarray::arr2;
    ///
    /// let doe = FullFactorial::new(&arr2(&[[0.0, 1.0], [5.0, 10.0]]));
    /// ```
    pub fn new(xlimits: &ArrayBase<impl Data<Elem = F>, Ix2>) -> Self {
        if xlimits.ncols() != 2 {
            panic!("xlimits must have 2 columns (lower, upper)");
        }
        FullFactorial {
            xlimits: xlimits.to_owned(),
        }
    }

    /// Distribute levels among the `nx` components so that the resulting
    /// grid counts at least `ns` points.
    fn levels(&self, ns: usize) -> Array1<usize> {
        let nx = self.xlimits.nrows();
        let weights: Array1<F> = Array1::ones(nx) / F::cast(nx);
        let mut levels: Array1<usize> = Array1::ones(nx);
        while levels.fold(1, |acc, &n| acc * n) < ns {
            let shares = &levels.mapv(|v| F::cast(v)) / F::cast(levels.sum());
            let lagging = (&weights - &shares).argmax().unwrap();
            levels[lagging] += 1;
        }
        levels
    }
}

impl<F: Float> SamplingMethod<F> for FullFactorial<F> {
    fn bounds(&self) -> &Array2<F> {
        &self.xlimits
    }

    fn sample_unit(&self, ns: usize) -> Array2<F> {
        let nx = self.xlimits.nrows();
        let levels = self.levels(ns);
        let nrows = levels.fold(1, |acc, &n| acc * n);
        let mut doe = Array2::<F>::zeros((nrows, nx));

        // Lexicographic grid: the jth column repeats each level value
        // `level_repeat` times and the whole pattern `range_repeat` times.
        let mut level_repeat = nrows;
        let mut range_repeat = 1;
        for j in 0..nx {
            let n = levels[j];
            level_repeat /= n;
            let mut pattern = Array1::zeros(level_repeat * n);
            for i in 0..n {
                let value = if n > 1 {
                    F::cast(i) / F::cast(n - 1)
                } else {
                    F::cast(i)
                };
                pattern
                    .slice_mut(s![i * level_repeat..(i + 1) * level_repeat])
                    .fill(value);
            }
            for k in 0..range_repeat {
                doe.slice_mut(s![n * level_repeat * k..n * level_repeat * (k + 1), j])
                    .assign(&pattern);
            }
            range_repeat *= n;
        }
        doe.slice(s![0..ns, ..]).to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{arr2, array};

    #[test]
    fn test_full_factorial() {
        let xlimits = arr2(&[[5., 10.], [0., 1.]]);
        let expected = array![
            [5., 0.],
            [5., 0.5],
            [5., 1.],
            [7.5, 0.],
            [7.5, 0.5],
            [7.5, 1.],
            [10., 0.],
            [10., 0.5],
            [10., 1.],
        ];
        let actual = FullFactorial::new(&xlimits).sample(9);
        assert_abs_diff_eq!(expected, actual, epsilon = 1e-6);
    }

    #[test]
    fn test_full_factorial_truncated() {
        let xlimits = arr2(&[[0., 1.], [0., 1.], [0., 1.]]);
        let actual = FullFactorial::new(&xlimits).sample(5);
        assert_eq!(actual.dim(), (5, 3));
        assert!(actual.iter().all(|&v| (0. ..=1.).contains(&v)));
    }
}
