//! Damped Gauss-Newton solver with Levenberg-Marquardt style damping.
//!
//! Each constraint produces scalar residual equations r_i(x) where r_i = 0
//! when satisfied. Per iteration we build the analytic Jacobian J and solve
//!   (J^T J + lambda * I) * dx = J^T * r
//! then step x -= dx. Lambda shrinks on accepted steps and grows on rejected
//! ones, blending Gauss-Newton (small lambda) with gradient descent (large).

use nalgebra::{DMatrix, DVector};
use tracing::{debug, trace};

use crate::system::{NonlinearSystem, Solution, SolveError, SolverBackend, SolverConfig};

/// Damping retries within one iteration before giving up on a descent step.
const MAX_DAMPING_RETRIES: usize = 10;

/// Below this gradient max-norm the squared residual is stationary. If the
/// residual itself is still above tolerance there is no root to walk to.
const GRADIENT_FLOOR: f64 = 1e-20;

const LAMBDA_MIN: f64 = 1e-15;

/// The default solver backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct DampedNewton;

impl SolverBackend for DampedNewton {
    fn solve(
        &mut self,
        system: &dyn NonlinearSystem,
        initial: DVector<f64>,
        config: &SolverConfig,
    ) -> Result<Solution, SolveError> {
        let m = system.residual_count();
        let n = system.param_count();
        let mut x = initial;
        debug_assert_eq!(x.len(), n);

        if m == 0 {
            return Ok(Solution {
                params: x,
                iterations: 0,
                residual_norm: 0.0,
            });
        }

        let mut residual = DVector::zeros(m);
        let mut candidate_residual = DVector::zeros(m);
        let mut jacobian = DMatrix::zeros(m, n);
        let mut lambda = config.lambda_initial;

        system.residuals(&x, &mut residual);

        for iteration in 0..config.max_iterations {
            let norm = residual.amax();
            if norm < config.tolerance {
                trace!(iteration, residual_norm = norm, "converged");
                return Ok(Solution {
                    params: x,
                    iterations: iteration,
                    residual_norm: norm,
                });
            }

            // Equations but nothing free to move: unsatisfiable as-is.
            if n == 0 {
                return Err(SolveError::NonConvergence {
                    iterations: iteration,
                    residual_norm: norm,
                });
            }

            jacobian.fill(0.0);
            system.jacobian(&x, &mut jacobian);

            let gradient = jacobian.transpose() * &residual;
            if gradient.amax() < GRADIENT_FLOOR {
                // Stationary point of |R|^2 that is not a root: the
                // equations are contradictory from this configuration.
                debug!(iteration, residual_norm = norm, "gradient stalled above tolerance");
                return Err(SolveError::NonConvergence {
                    iterations: iteration,
                    residual_norm: norm,
                });
            }
            let jtj = jacobian.transpose() * &jacobian;

            let norm_sq = residual.norm_squared();
            let mut stepped = false;

            for _ in 0..MAX_DAMPING_RETRIES {
                let mut damped = jtj.clone();
                for i in 0..n {
                    damped[(i, i)] += lambda;
                }

                // J^T J is symmetric positive semi-definite, so Cholesky on
                // the damped matrix normally succeeds. LU covers the nearly
                // singular cases where it does not.
                let step = match damped.clone().cholesky() {
                    Some(chol) => chol.solve(&gradient),
                    None => match damped.lu().solve(&gradient) {
                        Some(s) => s,
                        None => {
                            lambda *= config.lambda_factor;
                            continue;
                        }
                    },
                };

                let candidate = &x - &step;
                if !system.admissible(&candidate) {
                    trace!(iteration, lambda, "step left the valid domain");
                    lambda *= config.lambda_factor;
                    continue;
                }

                system.residuals(&candidate, &mut candidate_residual);
                if candidate_residual.norm_squared() < norm_sq {
                    x = candidate;
                    std::mem::swap(&mut residual, &mut candidate_residual);
                    lambda = (lambda / config.lambda_factor).max(LAMBDA_MIN);
                    stepped = true;
                    break;
                }
                lambda *= config.lambda_factor;
            }

            if !stepped {
                let norm = residual.amax();
                debug!(iteration, residual_norm = norm, lambda, "no descent step found");
                return Err(SolveError::NonConvergence {
                    iterations: iteration + 1,
                    residual_norm: norm,
                });
            }
        }

        let norm = residual.amax();
        if norm < config.tolerance {
            Ok(Solution {
                params: x,
                iterations: config.max_iterations,
                residual_norm: norm,
            })
        } else {
            Err(SolveError::NonConvergence {
                iterations: config.max_iterations,
                residual_norm: norm,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    /// Ad-hoc system built from closures, for exercising the solver without
    /// dragging in real geometry.
    struct FnSystem<R, J> {
        m: usize,
        n: usize,
        residual_fn: R,
        jacobian_fn: J,
        domain_fn: Option<fn(&DVector<f64>) -> bool>,
    }

    impl<R, J> NonlinearSystem for FnSystem<R, J>
    where
        R: Fn(&DVector<f64>, &mut DVector<f64>),
        J: Fn(&DVector<f64>, &mut DMatrix<f64>),
    {
        fn residual_count(&self) -> usize {
            self.m
        }

        fn param_count(&self) -> usize {
            self.n
        }

        fn residuals(&self, x: &DVector<f64>, out: &mut DVector<f64>) {
            (self.residual_fn)(x, out)
        }

        fn jacobian(&self, x: &DVector<f64>, out: &mut DMatrix<f64>) {
            (self.jacobian_fn)(x, out)
        }

        fn admissible(&self, x: &DVector<f64>) -> bool {
            self.domain_fn.map_or(true, |f| f(x))
        }
    }

    fn solve(
        system: &impl NonlinearSystem,
        initial: Vec<f64>,
        config: &SolverConfig,
    ) -> Result<Solution, SolveError> {
        DampedNewton.solve(system, DVector::from_vec(initial), config)
    }

    #[test]
    fn test_circle_line_intersection() {
        // x^2 + y^2 = 1 intersected with x = y.
        let system = FnSystem {
            m: 2,
            n: 2,
            residual_fn: |x: &DVector<f64>, out: &mut DVector<f64>| {
                out[0] = x[0] * x[0] + x[1] * x[1] - 1.0;
                out[1] = x[0] - x[1];
            },
            jacobian_fn: |x: &DVector<f64>, out: &mut DMatrix<f64>| {
                out[(0, 0)] = 2.0 * x[0];
                out[(0, 1)] = 2.0 * x[1];
                out[(1, 0)] = 1.0;
                out[(1, 1)] = -1.0;
            },
            domain_fn: None,
        };

        let solution = solve(&system, vec![1.0, 0.3], &SolverConfig::default())
            .unwrap_or_else(|e| panic!("solve failed: {e}"));
        let root = 0.5_f64.sqrt();
        assert_relative_eq!(solution.params[0], root, epsilon = 1e-10);
        assert_relative_eq!(solution.params[1], root, epsilon = 1e-10);
        assert!(solution.residual_norm < 1e-12);
    }

    #[test]
    fn test_zero_equations_succeed_immediately() {
        let system = FnSystem {
            m: 0,
            n: 3,
            residual_fn: |_: &DVector<f64>, _: &mut DVector<f64>| {},
            jacobian_fn: |_: &DVector<f64>, _: &mut DMatrix<f64>| {},
            domain_fn: None,
        };
        let solution = solve(&system, vec![1.0, 2.0, 3.0], &SolverConfig::default()).unwrap();
        assert_eq!(solution.iterations, 0);
        assert_eq!(solution.residual_norm, 0.0);
        assert_eq!(solution.params[2], 3.0);
    }

    #[test]
    fn test_already_satisfied_takes_no_iterations() {
        let system = FnSystem {
            m: 1,
            n: 1,
            residual_fn: |x: &DVector<f64>, out: &mut DVector<f64>| out[0] = x[0] - 2.0,
            jacobian_fn: |_: &DVector<f64>, out: &mut DMatrix<f64>| out[(0, 0)] = 1.0,
            domain_fn: None,
        };
        let solution = solve(&system, vec![2.0], &SolverConfig::default()).unwrap();
        assert_eq!(solution.iterations, 0);
    }

    #[test]
    fn test_consistent_overdetermined_system() {
        // Three equations, two unknowns, but the third is implied by the
        // first two: x = 1, y = 2, x + y = 3.
        let system = FnSystem {
            m: 3,
            n: 2,
            residual_fn: |x: &DVector<f64>, out: &mut DVector<f64>| {
                out[0] = x[0] - 1.0;
                out[1] = x[1] - 2.0;
                out[2] = x[0] + x[1] - 3.0;
            },
            jacobian_fn: |_: &DVector<f64>, out: &mut DMatrix<f64>| {
                out[(0, 0)] = 1.0;
                out[(1, 1)] = 1.0;
                out[(2, 0)] = 1.0;
                out[(2, 1)] = 1.0;
            },
            domain_fn: None,
        };
        let solution = solve(&system, vec![-4.0, 7.5], &SolverConfig::default())
            .unwrap_or_else(|e| panic!("solve failed: {e}"));
        assert_relative_eq!(solution.params[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(solution.params[1], 2.0, epsilon = 1e-10);
    }

    #[test]
    fn test_contradictory_equations_fail() {
        // x = 1 and x = 2 cannot both hold. The solver settles at the least
        // squares point x = 1.5 and must report failure, not success.
        let system = FnSystem {
            m: 2,
            n: 1,
            residual_fn: |x: &DVector<f64>, out: &mut DVector<f64>| {
                out[0] = x[0] - 1.0;
                out[1] = x[0] - 2.0;
            },
            jacobian_fn: |_: &DVector<f64>, out: &mut DMatrix<f64>| {
                out[(0, 0)] = 1.0;
                out[(1, 0)] = 1.0;
            },
            domain_fn: None,
        };
        let result = solve(&system, vec![0.0], &SolverConfig::default());
        let err = result.err().unwrap_or_else(|| panic!("expected failure"));
        let SolveError::NonConvergence { residual_norm, .. } = err;
        assert!(residual_norm > 0.4, "residual_norm = {residual_norm}");
    }

    #[test]
    fn test_equations_with_no_free_params_fail() {
        let system = FnSystem {
            m: 1,
            n: 0,
            residual_fn: |_: &DVector<f64>, out: &mut DVector<f64>| out[0] = 0.25,
            jacobian_fn: |_: &DVector<f64>, _: &mut DMatrix<f64>| {},
            domain_fn: None,
        };
        let result = solve(&system, vec![], &SolverConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_inadmissible_steps_are_rejected() {
        // Target inside the domain converges; target outside cannot be
        // reached because every step across x = 0 is rejected.
        let domain: fn(&DVector<f64>) -> bool = |x| x[0] > 0.0;

        let reachable = FnSystem {
            m: 1,
            n: 1,
            residual_fn: |x: &DVector<f64>, out: &mut DVector<f64>| out[0] = x[0] - 5.0,
            jacobian_fn: |_: &DVector<f64>, out: &mut DMatrix<f64>| out[(0, 0)] = 1.0,
            domain_fn: Some(domain),
        };
        let solution = solve(&reachable, vec![1.0], &SolverConfig::default())
            .unwrap_or_else(|e| panic!("solve failed: {e}"));
        assert_relative_eq!(solution.params[0], 5.0, epsilon = 1e-10);

        let unreachable = FnSystem {
            m: 1,
            n: 1,
            residual_fn: |x: &DVector<f64>, out: &mut DVector<f64>| out[0] = x[0] + 5.0,
            jacobian_fn: |_: &DVector<f64>, out: &mut DMatrix<f64>| out[(0, 0)] = 1.0,
            domain_fn: Some(domain),
        };
        let result = solve(&unreachable, vec![1.0], &SolverConfig::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_fast_config_caps_iterations() {
        let config = SolverConfig::fast(1e-12);
        assert_eq!(config.max_iterations, 8);
        assert_relative_eq!(config.tolerance, 1e-6);

        // An easy system still solves within the cap.
        let system = FnSystem {
            m: 1,
            n: 1,
            residual_fn: |x: &DVector<f64>, out: &mut DVector<f64>| out[0] = x[0] - 3.0,
            jacobian_fn: |_: &DVector<f64>, out: &mut DMatrix<f64>| out[(0, 0)] = 1.0,
            domain_fn: None,
        };
        let solution = solve(&system, vec![0.0], &config)
            .unwrap_or_else(|e| panic!("solve failed: {e}"));
        assert!(solution.iterations <= 8);
        assert_relative_eq!(solution.params[0], 3.0, epsilon = 1e-5);
    }

    proptest! {
        /// Diagonally dominant linear systems always converge to the unique
        /// solution regardless of the right-hand side.
        #[test]
        fn prop_diag_dominant_linear_systems_converge(
            offdiag in proptest::collection::vec(-1.0_f64..1.0, 6),
            rhs in proptest::collection::vec(-10.0_f64..10.0, 3),
        ) {
            let a = DMatrix::from_row_slice(3, 3, &[
                4.0, offdiag[0], offdiag[1],
                offdiag[2], 4.0, offdiag[3],
                offdiag[4], offdiag[5], 4.0,
            ]);
            let b = DVector::from_vec(rhs);

            let system = FnSystem {
                m: 3,
                n: 3,
                residual_fn: |x: &DVector<f64>, out: &mut DVector<f64>| {
                    out.copy_from(&(&a * x - &b));
                },
                jacobian_fn: |_: &DVector<f64>, out: &mut DMatrix<f64>| {
                    out.copy_from(&a);
                },
                domain_fn: None,
            };

            let solution = solve(&system, vec![0.0, 0.0, 0.0], &SolverConfig::precise(1e-9))
                .unwrap_or_else(|e| panic!("solve failed: {e}"));
            let check = &a * &solution.params - &b;
            prop_assert!(check.amax() < 1e-9, "|Ax - b| = {}", check.amax());
        }
    }
}
