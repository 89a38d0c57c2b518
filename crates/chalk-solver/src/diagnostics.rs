//! Rank-based structural diagnostics.
//!
//! The Jacobian's numerical rank at a configuration tells how many of the
//! equations are independent there. Comparing it against equation and
//! parameter counts surfaces under- and over-constrained sketches without
//! running a solve.

use nalgebra::{DMatrix, DVector};

use crate::system::NonlinearSystem;

/// Structural summary of a system at a given parameter vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankReport {
    /// Scalar equations in the system.
    pub residuals: usize,
    /// Free parameters.
    pub free_params: usize,
    /// Numerical rank of the Jacobian.
    pub rank: usize,
    /// Directions the geometry can still move: free_params - rank.
    pub dof: usize,
    /// Equations beyond the rank: residuals - rank. Nonzero means some
    /// equations are redundant (or contradictory) at this configuration.
    pub redundant: usize,
}

/// Evaluate the Jacobian at `x` and measure its rank via SVD.
pub fn rank_analysis(system: &dyn NonlinearSystem, x: &DVector<f64>) -> RankReport {
    let m = system.residual_count();
    let n = system.param_count();
    if m == 0 || n == 0 {
        return RankReport {
            residuals: m,
            free_params: n,
            rank: 0,
            dof: n,
            redundant: m,
        };
    }

    let mut jacobian = DMatrix::zeros(m, n);
    system.jacobian(x, &mut jacobian);

    let svd = jacobian.svd(false, false);
    let sv = &svd.singular_values;
    let max_sv = sv.iter().cloned().fold(0.0_f64, f64::max);
    let threshold = max_sv * (m.max(n) as f64) * f64::EPSILON;
    let rank = sv.iter().filter(|&&s| s > threshold).count();

    RankReport {
        residuals: m,
        free_params: n,
        rank,
        dof: n.saturating_sub(rank),
        redundant: m.saturating_sub(rank),
    }
}
