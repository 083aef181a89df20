/*!
This library gathers the Design of Experiments (DoE) sampling methods used by
the `mdobox` DOE drivers to browse a design space agnostically, that is
without taking function evaluations into account.

A sampling method generates a set of `ns` points in a sampling space defined
as a 2D ndarray `(nx, 2)` giving the lower and upper bound of each of the
`nx` components of a sample `x`. Samples are always generated in the unit
hypercube `[0, 1]^nx` first and then scaled to the sampling space, so that a
DOE driver can also request raw unit samples and apply its own design-space
transform (integer rounding, typed variables).

Example:
```
use mdobox_doe::{FullFactorial, Lhs, LhsKind, Random, SamplingMethod};
use ndarray::arr2;
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;

// Sampling space [5., 10.] x [0., 1.], samples are 2-dimensional.
let xlimits = arr2(&[[5., 10.], [0., 1.]]);
// Five samples with a centered Latin Hypercube,
let samples = Lhs::new(&xlimits).kind(LhsKind::Centered).sample(5);
// or with full-factorial sampling,
let samples = FullFactorial::new(&xlimits).sample(5);
// or randomly, seeded for reproducibility.
let samples = Random::new(&xlimits)
    .with_rng(Xoshiro256Plus::seed_from_u64(42))
    .sample(5);
```

Available methods:
* [Latin Hypercube Sampling](crate::Lhs),
* [Full Factorial Sampling](crate::FullFactorial),
* [Random Sampling](crate::Random),
* [Custom samples](crate::Custom) provided by the user.
*/
#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]
mod custom;
mod full_factorial;
mod lhs;
mod random;
mod traits;

pub use custom::*;
pub use full_factorial::*;
pub use lhs::*;
pub use random::*;
pub use traits::*;
