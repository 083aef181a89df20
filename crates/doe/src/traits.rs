use linfa::Float;
use ndarray::Array2;

/// A method generating a DoE, a set of sample points, in a sampling space.
///
/// The sampling space is the hyper-rectangle
/// `[lower_bound_x1, upper_bound_x1] x ... x [lower_bound_xnx, upper_bound_xnx]`
/// of `R^nx` where `nx` is the dimension of a sample.
/// Samples are drawn in the unit hypercube `[0, 1]^nx` and scaled to the
/// sampling space afterwards.
pub trait SamplingMethod<F: Float> {
    /// Returns the bounds of the sampling space as a (nx, 2) matrix
    /// whose ith row is the interval of the ith component of a sample.
    fn bounds(&self) -> &Array2<F>;

    /// Generates a (ns, nx) matrix of samples belonging to `[0, 1]^nx`.
    fn sample_unit(&self, ns: usize) -> Array2<F>;

    /// Generates a (ns, nx) matrix of samples belonging to the sampling
    /// space defined by [`SamplingMethod::bounds`].
    fn sample(&self, ns: usize) -> Array2<F> {
        let xlimits = self.bounds();
        let lower = xlimits.column(0);
        let width = &xlimits.column(1) - &lower;
        self.sample_unit(ns) * width + lower
    }
}
