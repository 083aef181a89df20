//! The library of design-of-experiments algorithms.
//!
//! Samples come from the `mdobox-doe` samplers, generated in the unit
//! hypercube and mapped back to the physical space. Evaluation runs
//! serially or over a thread pool; in both cases every sample entry lands
//! in the database in submission order, so iteration counting and the
//! recovered result do not depend on the number of workers.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use log::{info, warn};
use mdobox_doe::{FullFactorial, Lhs, LhsKind, Random, SamplingMethod};
use ndarray::{Array2, ArrayView1};
use ndarray_rand::rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use rayon::ThreadPoolBuilder;

use crate::database::FunctionRecord;
use crate::design_space::{DesignSpace, VariableSpace};
use crate::errors::{AlgoError, Result, UnsuitabilityReason};
use crate::options::DriverOptions;
use crate::problem::OptimizationProblem;
use crate::result::OptimizationResult;

use super::{
    check_integer_variables, finalize_run, normalization_eligible, recover_result,
    register_iteration_callback, resolve_algo_name, setup_problem,
};

/// The static description of a DOE algorithm.
#[derive(Clone, Debug)]
pub struct DoeAlgorithmDescription {
    /// The algorithm name
    pub name: String,
    /// Whether integer design variables are handled
    pub handle_integer_variables: bool,
    /// The minimum design space dimension the algorithm requires
    pub minimum_dimension: usize,
}

/// The library of DOE algorithms.
#[derive(Default)]
pub struct DoeLibrary {
    descriptions: HashMap<String, DoeAlgorithmDescription>,
    algo_name: Option<String>,
}

fn description(name: &str) -> DoeAlgorithmDescription {
    DoeAlgorithmDescription {
        name: name.to_string(),
        handle_integer_variables: true,
        minimum_dimension: 1,
    }
}

impl DoeLibrary {
    /// Create the library with its built-in algorithms.
    pub fn new() -> Self {
        let mut descriptions = HashMap::new();
        for name in ["LHS", "LHS_CENTERED", "FULLFACT", "RANDOM", "CUSTOM"] {
            descriptions.insert(name.to_string(), description(name));
        }
        DoeLibrary {
            descriptions,
            algo_name: None,
        }
    }

    /// The default options of a DOE run: no normalization and no implicit
    /// budget beyond the number of samples.
    pub fn default_options() -> DriverOptions {
        DriverOptions {
            normalize_design_space: false,
            ..DriverOptions::default()
        }
    }

    /// The names of the available algorithms.
    pub fn algo_names(&self) -> Vec<String> {
        self.descriptions.keys().cloned().collect()
    }

    /// The description of an algorithm, if available.
    pub fn description(&self, algo_name: &str) -> Option<&DoeAlgorithmDescription> {
        self.descriptions.get(algo_name)
    }

    /// Sample the problem design space with the given algorithm.
    ///
    /// When `algo_name` is `None` the name of the previous run on this
    /// library is reused; having none is an error.
    pub fn execute(
        &mut self,
        problem: &mut OptimizationProblem,
        algo_name: Option<&str>,
        options: DriverOptions,
    ) -> Result<OptimizationResult> {
        let algo_name = resolve_algo_name(algo_name, &self.algo_name, &self.algo_names())?;
        self.algo_name = Some(algo_name.clone());
        let description = self.descriptions[&algo_name].clone();

        if problem.design_space().is_empty() {
            return Err(AlgoError::UnsuitableAlgorithm {
                algo_name,
                reason: UnsuitabilityReason::EmptyDesignSpace,
            });
        }
        if problem.design_space().dimension() < description.minimum_dimension {
            return Err(AlgoError::UnsuitableAlgorithm {
                algo_name,
                reason: UnsuitabilityReason::SmallDimension,
            });
        }
        check_integer_variables(
            problem,
            &algo_name,
            description.handle_integer_variables,
            options.skip_int_check,
        )?;

        let samples = self.generate_samples(&algo_name, problem.design_space(), &options)?;
        let n_samples = samples.nrows();
        let max_iter = options.max_iter.unwrap_or(n_samples);
        setup_problem(problem, &options, max_iter)?;

        // a failed sample must not terminate the sampling
        problem.set_stop_if_nan(false);
        let normalize = normalization_eligible(problem, &options);
        problem.preprocess_functions(normalize, options.use_database, options.round_ints);
        info!(
            "Running the DOE {algo_name} with {n_samples} samples on {problem:?}"
        );

        let start_time = Instant::now();
        let iteration_callback =
            register_iteration_callback(problem, &options, start_time, false);

        let outcome = if options.n_processes > 1 {
            Self::run_parallel(problem, &samples, &options)
        } else {
            Self::run_serial(problem, &samples, &options)
        };
        problem.database().remove_empty_entries();

        problem.callbacks().remove(iteration_callback);

        let result = recover_result(problem, outcome, &algo_name)?;
        finalize_run(problem, &result);
        Ok(result)
    }

    /// Generate the physical samples of a run.
    fn generate_samples(
        &self,
        algo_name: &str,
        space: &DesignSpace,
        options: &DriverOptions,
    ) -> Result<Array2<f64>> {
        if algo_name == "CUSTOM" {
            let samples = options.samples.clone().ok_or_else(|| {
                AlgoError::InvalidValue(
                    "the CUSTOM DOE requires the samples option".to_string(),
                )
            })?;
            if samples.ncols() != space.dimension() {
                return Err(AlgoError::InvalidValue(format!(
                    "the custom samples dimension ({}) does not match the design \
                     space dimension ({})",
                    samples.ncols(),
                    space.dimension()
                )));
            }
            return Ok(Self::round_rows(space, samples));
        }

        let n_samples = options.n_samples.ok_or_else(|| {
            AlgoError::InvalidValue("the number of samples is not set".to_string())
        })?;
        let unit = Self::unit_samples(algo_name, space.dimension(), n_samples, options.seed)?;

        let mut samples = Array2::zeros((unit.nrows(), unit.ncols()));
        for (i, row) in unit.outer_iter().enumerate() {
            samples
                .row_mut(i)
                .assign(&space.unnormalize_vect(&row)?);
        }
        Ok(Self::round_rows(space, samples))
    }

    fn round_rows(space: &DesignSpace, mut samples: Array2<f64>) -> Array2<f64> {
        if space.has_integer_variables() {
            for mut row in samples.outer_iter_mut() {
                let rounded = space.round_vect(&row.view());
                row.assign(&rounded);
            }
        }
        samples
    }

    /// Generate samples in the unit hypercube.
    fn unit_samples(
        algo_name: &str,
        dimension: usize,
        n_samples: usize,
        seed: Option<u64>,
    ) -> Result<Array2<f64>> {
        let xlimits = DesignSpace::unit(dimension).xlimits();
        let rng = match seed {
            Some(seed) => Xoshiro256Plus::seed_from_u64(seed),
            None => Xoshiro256Plus::from_entropy(),
        };
        match algo_name {
            "LHS" => Ok(Lhs::new(&xlimits).with_rng(rng).sample_unit(n_samples)),
            "LHS_CENTERED" => Ok(Lhs::new(&xlimits)
                .with_rng(rng)
                .kind(LhsKind::Centered)
                .sample_unit(n_samples)),
            "FULLFACT" => Ok(FullFactorial::new(&xlimits).sample_unit(n_samples)),
            "RANDOM" => Ok(Random::new(&xlimits).with_rng(rng).sample_unit(n_samples)),
            other => Err(AlgoError::InvalidValue(format!(
                "the algorithm {other} cannot generate samples"
            ))),
        }
    }

    /// Compute a DOE without attaching it to a problem.
    ///
    /// With `unit_sampling` the samples stay in the unit hypercube,
    /// otherwise they are mapped to the given space.
    pub fn compute_doe(
        &self,
        space: impl Into<VariableSpace>,
        algo_name: &str,
        n_samples: usize,
        unit_sampling: bool,
        seed: Option<u64>,
    ) -> Result<Array2<f64>> {
        let space = space.into().into_design_space();
        let _ = resolve_algo_name(Some(algo_name), &None, &self.algo_names())?;
        if unit_sampling {
            Self::unit_samples(algo_name, space.dimension(), n_samples, seed)
        } else {
            let options = DriverOptions {
                n_samples: Some(n_samples),
                seed,
                ..Self::default_options()
            };
            self.generate_samples(algo_name, &space, &options)
        }
    }

    fn run_serial(
        problem: &OptimizationProblem,
        samples: &Array2<f64>,
        options: &DriverOptions,
    ) -> Result<String> {
        for (index, x) in samples.outer_iter().enumerate() {
            if index > 0 && options.wait_time_between_samples > 0. {
                std::thread::sleep(Duration::from_secs_f64(
                    options.wait_time_between_samples,
                ));
            }
            Self::evaluate_sample(problem, index, &x, options)?;
        }
        Ok("All samples evaluated.".to_string())
    }

    fn run_parallel(
        problem: &OptimizationProblem,
        samples: &Array2<f64>,
        options: &DriverOptions,
    ) -> Result<String> {
        // placeholders pin the entry order to the submission order,
        // whatever order the workers finish in
        for x in samples.outer_iter() {
            problem.database().store(&x, FunctionRecord::new());
        }
        let pool = ThreadPoolBuilder::new()
            .num_threads(options.n_processes)
            .build()
            .map_err(|err| {
                AlgoError::InvalidConfig(format!("cannot build the thread pool: {err}"))
            })?;

        let terminated: Mutex<Option<AlgoError>> = Mutex::new(None);
        pool.scope(|scope| {
            for (index, x) in samples.outer_iter().enumerate() {
                if index > 0 && options.wait_time_between_samples > 0. {
                    std::thread::sleep(Duration::from_secs_f64(
                        options.wait_time_between_samples,
                    ));
                }
                let terminated = &terminated;
                scope.spawn(move |_| {
                    if let Err(err) = Self::evaluate_sample(problem, index, &x, options)
                    {
                        let mut slot = terminated.lock().unwrap();
                        if slot.is_none() {
                            *slot = Some(err);
                        }
                    }
                });
            }
        });
        match terminated.into_inner().unwrap() {
            Some(err) => Err(err),
            None => Ok("All samples evaluated.".to_string()),
        }
    }

    /// Evaluate one sample; only termination signals propagate, any other
    /// failure is logged and the sampling goes on.
    fn evaluate_sample(
        problem: &OptimizationProblem,
        index: usize,
        x: &ArrayView1<f64>,
        options: &DriverOptions,
    ) -> Result<()> {
        match problem.evaluate_functions(x, options.eval_jac, true) {
            Ok(_) => Ok(()),
            Err(err @ AlgoError::Terminated(_)) => Err(err),
            Err(err) => {
                warn!("Problem when evaluating sample {index}: {err}");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::{FunctionType, MdoFunction};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    fn sum_problem() -> OptimizationProblem {
        let space = DesignSpace::new(&array![[-2.0, 3.0], [0.0, 10.0]]);
        let obj = MdoFunction::new("f", FunctionType::Objective, |x| {
            Array1::from_elem(1, x[0] + x[1])
        });
        OptimizationProblem::new(space, obj)
    }

    #[test]
    fn test_lhs_doe_fills_the_database() {
        let mut problem = sum_problem();
        let mut library = DoeLibrary::new();
        let options = DriverOptions {
            n_samples: Some(8),
            seed: Some(42),
            ..DoeLibrary::default_options()
        };
        let result = library.execute(&mut problem, Some("LHS"), options).unwrap();
        assert_eq!(result.n_iter, 8);
        assert_eq!(problem.database().n_entries(), 8);
        assert_eq!(result.message, "All samples evaluated.");
        assert!(result.x_opt.is_some());
        // samples respect the bounds
        for (x, _) in problem.database().entries() {
            assert!((-2.0..=3.0).contains(&x[0]));
            assert!((0.0..=10.0).contains(&x[1]));
        }
    }

    #[test]
    fn test_doe_is_reproducible_with_a_seed() {
        let run = || {
            let mut problem = sum_problem();
            let mut library = DoeLibrary::new();
            let options = DriverOptions {
                n_samples: Some(5),
                seed: Some(7),
                ..DoeLibrary::default_options()
            };
            library.execute(&mut problem, Some("LHS"), options).unwrap();
            problem
                .database()
                .entries()
                .into_iter()
                .map(|(x, _)| x)
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_custom_doe_uses_the_given_samples() {
        let mut problem = sum_problem();
        let mut library = DoeLibrary::new();
        let options = DriverOptions {
            samples: Some(array![[1.0, 2.0], [0.0, 5.0]]),
            ..DoeLibrary::default_options()
        };
        let result = library
            .execute(&mut problem, Some("CUSTOM"), options)
            .unwrap();
        assert_eq!(result.n_iter, 2);
        let f = problem
            .database()
            .get_function_value("f", &array![1.0, 2.0].view())
            .unwrap();
        assert_abs_diff_eq!(f.scalar().unwrap(), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_custom_doe_without_samples_is_an_error() {
        let mut problem = sum_problem();
        let mut library = DoeLibrary::new();
        let err = library
            .execute(&mut problem, Some("CUSTOM"), DoeLibrary::default_options())
            .unwrap_err();
        assert!(err.to_string().contains("samples"));
    }

    #[test]
    fn test_missing_n_samples_is_an_error() {
        let mut problem = sum_problem();
        let mut library = DoeLibrary::new();
        let err = library
            .execute(&mut problem, Some("LHS"), DoeLibrary::default_options())
            .unwrap_err();
        assert!(err.to_string().contains("number of samples"));
    }

    #[test]
    fn test_unbounded_space_is_rejected() {
        let space = DesignSpace::from_bounds(
            array![0.0, f64::NEG_INFINITY],
            array![1.0, 1.0],
        );
        let obj = MdoFunction::new("f", FunctionType::Objective, |x| {
            Array1::from_elem(1, x.sum())
        });
        let mut problem = OptimizationProblem::new(space, obj);
        let mut library = DoeLibrary::new();
        let options = DriverOptions {
            n_samples: Some(4),
            seed: Some(0),
            ..DoeLibrary::default_options()
        };
        let err = library.execute(&mut problem, Some("LHS"), options).unwrap_err();
        assert!(err.to_string().contains("infinite bound"));
    }

    #[test]
    fn test_parallel_doe_with_a_failing_sample() {
        let mut problem = {
            let space = DesignSpace::new(&array![[0.0, 1.0]]);
            let obj = MdoFunction::from_fallible("f", FunctionType::Objective, |x| {
                if x[0] < 0.2 {
                    Err(AlgoError::EvalError("solver blew up".to_string()))
                } else {
                    Ok(Array1::from_elem(1, x[0]))
                }
            });
            OptimizationProblem::new(space, obj)
        };
        let mut library = DoeLibrary::new();
        let options = DriverOptions {
            samples: Some(array![[0.1], [0.4], [0.6], [0.8]]),
            n_processes: 2,
            ..DoeLibrary::default_options()
        };
        let result = library
            .execute(&mut problem, Some("CUSTOM"), options)
            .unwrap();
        // the failed sample leaves no empty placeholder behind
        assert_eq!(problem.database().n_entries(), 3);
        assert_eq!(result.n_iter, 3);
        assert_abs_diff_eq!(result.x_opt.unwrap(), array![0.4], epsilon = 1e-12);
    }

    #[test]
    fn test_serial_and_parallel_agree() {
        let run = |n_processes: usize| {
            let mut problem = sum_problem();
            let mut library = DoeLibrary::new();
            let options = DriverOptions {
                n_samples: Some(6),
                seed: Some(3),
                n_processes,
                ..DoeLibrary::default_options()
            };
            library.execute(&mut problem, Some("LHS"), options).unwrap();
            problem
                .database()
                .entries()
                .into_iter()
                .map(|(x, _)| x)
                .collect::<Vec<_>>()
        };
        // same entries in the same order whatever the number of workers
        assert_eq!(run(1), run(4));
    }

    #[test]
    fn test_compute_doe_from_dimension() {
        let library = DoeLibrary::new();
        let samples = library
            .compute_doe(2usize, "LHS_CENTERED", 4, true, Some(42))
            .unwrap();
        assert_eq!(samples.dim(), (4, 2));
        assert!(samples.iter().all(|&v| (0. ..=1.).contains(&v)));
    }

    #[test]
    fn test_compute_doe_from_space() {
        let library = DoeLibrary::new();
        let space = DesignSpace::new(&array![[5.0, 10.0], [0.0, 1.0]]);
        let samples = library
            .compute_doe(space, "FULLFACT", 9, false, None)
            .unwrap();
        assert_eq!(samples.dim(), (9, 2));
        assert!(samples.column(0).iter().all(|&v| (5.0..=10.0).contains(&v)));
    }

    #[test]
    fn test_budget_below_sample_count_truncates_the_doe() {
        let mut problem = sum_problem();
        let mut library = DoeLibrary::new();
        let options = DriverOptions {
            n_samples: Some(6),
            max_iter: Some(3),
            seed: Some(11),
            ..DoeLibrary::default_options()
        };
        let result = library.execute(&mut problem, Some("LHS"), options).unwrap();
        assert_eq!(result.n_iter, 3);
        assert!(result.message.contains("Maximum number of iterations reached."));
    }
}
