//! Solve lifecycle over one compiled sketch.
//!
//! A session binds to a snapshot of a [`DataSet`] at [`ParametricSession::init`]
//! and owns the compiled system plus the last solved parameter vector. The
//! vector is the single source of truth during a drag: callers move the drag
//! target through the session and read solved geometry back out explicitly.
//! A failed solve reports an error and leaves the previous solution intact.

use thiserror::Error;
use tracing::{debug, instrument, warn};

use chalk_solver::{
    rank_analysis, DampedNewton, RankReport, Solution, SolveError, SolverBackend, SolverConfig,
};
use chalk_types::{Curve, Drag, EntityId, Point2d, ValueRef};

use crate::compile::{compile, CompileError, CompiledSystem};
use crate::dataset::DataSet;

/// Default convergence tolerance for precise solves.
pub const DEFAULT_PRECISION: f64 = 1e-12;

/// Session-level configuration, captured once at init.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Convergence tolerance for precise solves.
    pub precision: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            precision: DEFAULT_PRECISION,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Compiled,
    Solved,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{op} is not valid in the {state:?} state")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },
    #[error("no drag was compiled for {point} of curve {id}")]
    UnknownDrag { id: EntityId, point: ValueRef },
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error(transparent)]
    Solve(#[from] SolveError),
}

/// Numbers from the most recent successful solve.
#[derive(Debug, Clone, Copy)]
pub struct SolveReport {
    pub iterations: usize,
    pub residual_norm: f64,
}

/// One accepted solve: the solver's report plus every slot's value at the
/// solution, pinned slots included. The getters read this snapshot, so a
/// drag target moved after the solve cannot show up in its result.
struct SolvedState {
    solution: Solution,
    full_params: Vec<f64>,
}

struct ActiveState {
    system: CompiledSystem,
    /// Tolerance captured at init; config edits afterwards do not reach an
    /// already-compiled session.
    precision: f64,
    last: Option<SolvedState>,
}

/// Orchestrates compile-solve-apply cycles over one dataset snapshot.
pub struct ParametricSession {
    backend: Box<dyn SolverBackend>,
    config: SessionConfig,
    active: Option<ActiveState>,
}

impl ParametricSession {
    pub fn new(backend: Box<dyn SolverBackend>) -> Self {
        Self::with_config(backend, SessionConfig::default())
    }

    pub fn with_config(backend: Box<dyn SolverBackend>, config: SessionConfig) -> Self {
        ParametricSession {
            backend,
            config,
            active: None,
        }
    }

    pub fn with_default_solver() -> Self {
        Self::new(Box::new(DampedNewton))
    }

    pub fn state(&self) -> SessionState {
        match &self.active {
            None => SessionState::Uninitialized,
            Some(active) if active.last.is_some() => SessionState::Solved,
            Some(_) => SessionState::Compiled,
        }
    }

    /// Compile `dataset` (and any drags) into a numeric system, discarding
    /// prior compiled state. On failure the session is left uninitialized.
    #[instrument(skip(self, dataset, drags), fields(dataset_id = %dataset.id(), drags = drags.len()))]
    pub fn init(&mut self, dataset: &DataSet, drags: &[Drag]) -> Result<(), SessionError> {
        self.active = None;
        let system = compile(dataset, drags)?;
        debug!(
            equations = system.equation_count(),
            free = system.free_count(),
            "session compiled"
        );
        self.active = Some(ActiveState {
            system,
            precision: self.config.precision,
            last: None,
        });
        Ok(())
    }

    /// Solve to full precision. With `restart` the initial guess is rebuilt
    /// from the snapshot's values plus current drag targets; otherwise the
    /// last solution is the warm start.
    pub fn evaluate(&mut self, restart: bool) -> Result<(), SessionError> {
        self.run_solve("evaluate", restart, false)
    }

    /// Few-iteration solve at relaxed tolerance, for per-frame re-solves
    /// inside a drag loop. Always warm-starts.
    pub fn evaluate_fast(&mut self) -> Result<(), SessionError> {
        self.run_solve("evaluate_fast", false, true)
    }

    fn run_solve(&mut self, op: &'static str, restart: bool, fast: bool) -> Result<(), SessionError> {
        let state = self.state();
        let ParametricSession {
            backend, active, ..
        } = self;
        let active = match active.as_mut() {
            Some(active) => active,
            None => return Err(SessionError::InvalidState { op, state }),
        };

        let initial = match (&active.last, restart) {
            (Some(last), false) => last.solution.params.clone(),
            _ => active.system.initial_free(),
        };
        let config = if fast {
            SolverConfig::fast(active.precision)
        } else {
            SolverConfig::precise(active.precision)
        };

        match backend.solve(&active.system.solver_view(), initial, &config) {
            Ok(solution) => {
                debug!(
                    iterations = solution.iterations,
                    residual_norm = solution.residual_norm,
                    "solve converged"
                );
                let full_params = active.system.full(&solution.params);
                active.last = Some(SolvedState {
                    solution,
                    full_params,
                });
                Ok(())
            }
            Err(e) => {
                // previous solution stays good; the caller decides whether
                // to retry, roll back a drag step, or give up
                warn!(error = %e, "solve failed");
                Err(SessionError::Solve(e))
            }
        }
    }

    /// Move a drag target compiled at init. The next solve picks it up.
    pub fn update_drag_target(
        &mut self,
        curve: EntityId,
        point: ValueRef,
        target: Point2d,
    ) -> Result<(), SessionError> {
        let state = self.state();
        let active = match self.active.as_mut() {
            Some(active) => active,
            None => {
                return Err(SessionError::InvalidState {
                    op: "update_drag_target",
                    state,
                })
            }
        };
        if !active.system.set_drag_target(curve, point, target) {
            return Err(SessionError::UnknownDrag { id: curve, point });
        }
        Ok(())
    }

    /// The solved curves, with solved values substituted in. Valid only in
    /// the solved state; never touches the originating dataset.
    pub fn solution(&self) -> Result<Vec<Curve>, SessionError> {
        let state = self.state();
        match &self.active {
            Some(active) => match &active.last {
                Some(last) => Ok(active.system.materialize(&last.full_params)),
                None => Err(SessionError::InvalidState {
                    op: "solution",
                    state,
                }),
            },
            None => Err(SessionError::InvalidState {
                op: "solution",
                state,
            }),
        }
    }

    /// Write the solved geometry back into `dataset` by id. Curves the
    /// dataset no longer contains are skipped. Returns the solved curves.
    pub fn apply_solution(&self, dataset: &mut DataSet) -> Result<Vec<Curve>, SessionError> {
        let solved = self.solution()?;
        for curve in &solved {
            if let Some(existing) = dataset.curve_mut(curve.id()) {
                existing.adopt_geometry(curve);
            }
        }
        Ok(solved)
    }

    /// Drop compiled state, returning to uninitialized. Required before
    /// binding the session to an unrelated dataset.
    pub fn clear_solver(&mut self) {
        self.active = None;
    }

    pub fn solve_report(&self) -> Option<SolveReport> {
        let active = self.active.as_ref()?;
        let last = active.last.as_ref()?;
        Some(SolveReport {
            iterations: last.solution.iterations,
            residual_norm: last.solution.residual_norm,
        })
    }

    /// Rank analysis of the compiled system, at the solved configuration if
    /// one exists, otherwise at the initial guess.
    pub fn diagnostics(&self) -> Result<RankReport, SessionError> {
        let state = self.state();
        let active = match self.active.as_ref() {
            Some(active) => active,
            None => {
                return Err(SessionError::InvalidState {
                    op: "diagnostics",
                    state,
                })
            }
        };
        let x = match &active.last {
            Some(last) => last.solution.params.clone(),
            None => active.system.initial_free(),
        };
        Ok(rank_analysis(&active.system.solver_view(), &x))
    }
}

impl Default for ParametricSession {
    fn default() -> Self {
        Self::with_default_solver()
    }
}
