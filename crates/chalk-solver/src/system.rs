use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// A square-free nonlinear system R(x) = 0 with an analytic Jacobian.
///
/// Implementors fill caller-provided storage so the solver can reuse its
/// work buffers across iterations.
pub trait NonlinearSystem {
    /// Number of scalar equations (rows of R and J).
    fn residual_count(&self) -> usize;

    /// Number of free parameters (length of x, columns of J).
    fn param_count(&self) -> usize;

    /// Evaluate R(x) into `out`. `out` has length `residual_count()`.
    fn residuals(&self, x: &DVector<f64>, out: &mut DVector<f64>);

    /// Evaluate J(x) = dR/dx into `out`, `residual_count()` rows by
    /// `param_count()` columns. `out` arrives zeroed.
    fn jacobian(&self, x: &DVector<f64>, out: &mut DMatrix<f64>);

    /// Whether `x` is inside the system's valid domain. Steps that land
    /// outside are rejected and retried with stronger damping.
    fn admissible(&self, _x: &DVector<f64>) -> bool {
        true
    }
}

/// Configuration for the damped Gauss-Newton solver.
#[derive(Debug, Clone)]
pub struct SolverConfig {
    /// Convergence threshold on the max-norm of the residual vector.
    pub tolerance: f64,
    pub max_iterations: usize,
    pub lambda_initial: f64,
    pub lambda_factor: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 100,
            lambda_initial: 1e-3,
            lambda_factor: 10.0,
        }
    }
}

impl SolverConfig {
    /// Full-accuracy settings for the given tolerance.
    pub fn precise(tolerance: f64) -> Self {
        Self {
            tolerance,
            ..Self::default()
        }
    }

    /// Few-iteration settings for interactive feedback, e.g. mid-drag. The
    /// tolerance is floored so the loop exits quickly on easy systems.
    pub fn fast(tolerance: f64) -> Self {
        Self {
            tolerance: tolerance.max(1e-6),
            max_iterations: 8,
            ..Self::default()
        }
    }
}

/// A converged solve.
#[derive(Debug, Clone)]
pub struct Solution {
    /// Parameter vector satisfying every residual to within tolerance.
    pub params: DVector<f64>,
    /// Iterations actually spent.
    pub iterations: usize,
    /// Max-norm of the residual at `params`.
    pub residual_norm: f64,
}

#[derive(Debug, Error)]
pub enum SolveError {
    #[error("no convergence after {iterations} iterations (residual max-norm {residual_norm:.3e})")]
    NonConvergence {
        iterations: usize,
        residual_norm: f64,
    },
}

/// A nonlinear least-squares backend. Boxed behind this trait so sessions can
/// swap solvers without recompiling systems.
pub trait SolverBackend {
    fn solve(
        &mut self,
        system: &dyn NonlinearSystem,
        initial: DVector<f64>,
        config: &SolverConfig,
    ) -> Result<Solution, SolveError>;
}
