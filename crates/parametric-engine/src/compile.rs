//! Compilation of a sketch into a flat numeric system.
//!
//! Curves map to contiguous slot ranges of one parameter vector in insertion
//! order: a point holds [x, y], a line [sx, sy, ex, ey], an arc
//! [cx, cy, r, a0, a1]. Constraints lower to [`Equation`]s over those slots.
//! Drags pin their point's slots: pinned slots are excluded from the free
//! vector the solver works on and hold the drag target's value instead.

use std::collections::{HashMap, HashSet};

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::debug;

use chalk_solver::NonlinearSystem;
use chalk_types::{Constraint, Curve, CurveKind, Drag, EntityId, Line2d, Point2d, ValueRef};

use crate::dataset::DataSet;
use crate::equations::{Equation, LineSlots, PointExpr};

/// Lines shorter than this cannot anchor a direction.
pub const MIN_LINE_LENGTH: f64 = 1e-9;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("line {id} is degenerate (length {length:.3e}, minimum {min:.3e})")]
    DegenerateLine { id: EntityId, length: f64, min: f64 },
    #[error("arc {id} has non-positive radius {radius}")]
    NonPositiveRadius { id: EntityId, radius: f64 },
    #[error("constraint references curve {id} which is not in the sketch")]
    MissingEntity { id: EntityId },
    #[error("curve {id} is a {got}, expected a {expected}")]
    WrongKind {
        id: EntityId,
        expected: CurveKind,
        got: CurveKind,
    },
    #[error("{vref} does not apply to {kind} curve {id}")]
    InvalidBinding {
        id: EntityId,
        kind: CurveKind,
        vref: ValueRef,
    },
    #[error("curve {id} cannot carry a point-on-curve equation (it is a {got})")]
    InvalidTarget { id: EntityId, got: CurveKind },
    #[error("drag references curve {id} which is not in the sketch")]
    UnknownDragCurve { id: EntityId },
    #[error("cannot drag {point} of curve {id}: not a stored point")]
    UndraggableReference { id: EntityId, point: ValueRef },
}

#[derive(Debug, Clone, Copy)]
struct CurveLayout {
    offset: usize,
    kind: CurveKind,
}

/// A sketch lowered to equations over a flat parameter vector, bound to a
/// snapshot of the graph it was compiled from.
#[derive(Debug, Clone)]
pub(crate) struct CompiledSystem {
    snapshot: DataSet,
    equations: Vec<Equation>,
    /// Current value of every slot. Free slots hold the initial guess,
    /// pinned slots hold the drag target.
    base_params: Vec<f64>,
    /// Slot indices the solver may move, in slot order.
    free: Vec<usize>,
    /// Radius slots of constraint-referenced arcs; these must stay positive
    /// through every accepted solver step.
    radius_slots: Vec<usize>,
    drag_slots: HashMap<(EntityId, ValueRef), (usize, usize)>,
}

impl CompiledSystem {
    pub(crate) fn equation_count(&self) -> usize {
        self.equations.len()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    /// The free slots' current values, used as the solver's initial guess.
    pub(crate) fn initial_free(&self) -> DVector<f64> {
        DVector::from_iterator(
            self.free.len(),
            self.free.iter().map(|&slot| self.base_params[slot]),
        )
    }

    /// Move a registered drag's pinned slots to a new target. Returns false
    /// when no drag was compiled for this curve and point.
    pub(crate) fn set_drag_target(
        &mut self,
        curve: EntityId,
        point: ValueRef,
        target: Point2d,
    ) -> bool {
        match self.drag_slots.get(&(curve, point)) {
            Some(&(sx, sy)) => {
                self.base_params[sx] = target.x;
                self.base_params[sy] = target.y;
                true
            }
            None => false,
        }
    }

    /// Expand a free vector to full slot width over the pinned values.
    pub(crate) fn full(&self, x: &DVector<f64>) -> Vec<f64> {
        let mut full = self.base_params.clone();
        for (c, &slot) in self.free.iter().enumerate() {
            full[slot] = x[c];
        }
        full
    }

    /// Substitute a full slot vector back into copies of the snapshot's
    /// curves, in the snapshot's curve order.
    pub(crate) fn materialize(&self, full: &[f64]) -> Vec<Curve> {
        let mut out = Vec::with_capacity(self.snapshot.curves().len());
        let mut off = 0;
        for curve in self.snapshot.curves() {
            let mut updated = *curve;
            match &mut updated {
                Curve::Point(p) => {
                    p.position = Point2d::new(full[off], full[off + 1]);
                    off += 2;
                }
                Curve::Line(l) => {
                    l.start = Point2d::new(full[off], full[off + 1]);
                    l.end = Point2d::new(full[off + 2], full[off + 3]);
                    off += 4;
                }
                Curve::Arc(a) => {
                    a.center = Point2d::new(full[off], full[off + 1]);
                    a.radius = full[off + 2];
                    a.start_angle = full[off + 3];
                    a.end_angle = full[off + 4];
                    off += 5;
                }
            }
            out.push(updated);
        }
        out
    }

    pub(crate) fn solver_view(&self) -> SystemView<'_> {
        SystemView { system: self }
    }
}

/// Borrowed view implementing the solver-facing trait.
pub(crate) struct SystemView<'a> {
    system: &'a CompiledSystem,
}

impl NonlinearSystem for SystemView<'_> {
    fn residual_count(&self) -> usize {
        self.system.equations.len()
    }

    fn param_count(&self) -> usize {
        self.system.free.len()
    }

    fn residuals(&self, x: &DVector<f64>, out: &mut DVector<f64>) {
        let full = self.system.full(x);
        for (i, eq) in self.system.equations.iter().enumerate() {
            out[i] = eq.residual(&full);
        }
    }

    fn jacobian(&self, x: &DVector<f64>, out: &mut DMatrix<f64>) {
        let full = self.system.full(x);
        let mut row = vec![0.0; full.len()];
        for (i, eq) in self.system.equations.iter().enumerate() {
            row.fill(0.0);
            eq.derivatives(&full, &mut row);
            for (c, &slot) in self.system.free.iter().enumerate() {
                out[(i, c)] = row[slot];
            }
        }
    }

    fn admissible(&self, x: &DVector<f64>) -> bool {
        if self.system.radius_slots.is_empty() {
            return true;
        }
        let full = self.system.full(x);
        self.system.radius_slots.iter().all(|&slot| full[slot] > 0.0)
    }
}

/// Lower a sketch (plus any active drags) into a [`CompiledSystem`].
pub(crate) fn compile(dataset: &DataSet, drags: &[Drag]) -> Result<CompiledSystem, CompileError> {
    let mut layouts: HashMap<EntityId, CurveLayout> = HashMap::new();
    let mut base_params: Vec<f64> = Vec::new();
    for curve in dataset.curves() {
        let offset = base_params.len();
        match curve {
            Curve::Point(p) => {
                base_params.push(p.position.x);
                base_params.push(p.position.y);
            }
            Curve::Line(l) => {
                base_params.extend_from_slice(&[l.start.x, l.start.y, l.end.x, l.end.y]);
            }
            Curve::Arc(a) => {
                base_params.extend_from_slice(&[
                    a.center.x,
                    a.center.y,
                    a.radius,
                    a.start_angle,
                    a.end_angle,
                ]);
            }
        }
        layouts.insert(
            curve.id(),
            CurveLayout {
                offset,
                kind: curve.kind(),
            },
        );
    }

    let mut referenced: HashSet<EntityId> = HashSet::new();
    for entry in dataset.constraints() {
        referenced.extend(entry.constraint.referenced_ids());
    }

    // Degeneracy only matters for curves that actually carry equations; a
    // stray zero-length line in the sketch is not a compile failure.
    let mut radius_slots = Vec::new();
    for curve in dataset.curves() {
        if !referenced.contains(&curve.id()) {
            continue;
        }
        match curve {
            Curve::Line(l) => {
                let length = l.length();
                if length < MIN_LINE_LENGTH {
                    return Err(CompileError::DegenerateLine {
                        id: l.id(),
                        length,
                        min: MIN_LINE_LENGTH,
                    });
                }
            }
            Curve::Arc(a) => {
                if a.radius <= 0.0 {
                    return Err(CompileError::NonPositiveRadius {
                        id: a.id(),
                        radius: a.radius,
                    });
                }
                let offset = layouts[&a.id()].offset;
                radius_slots.push(offset + 2);
            }
            Curve::Point(_) => {}
        }
    }

    let mut equations = Vec::new();
    for entry in dataset.constraints() {
        lower_constraint(dataset, &layouts, &entry.constraint, &mut equations)?;
    }

    let mut drag_slots = HashMap::new();
    let mut pinned: HashSet<usize> = HashSet::new();
    for drag in drags {
        let layout = layouts
            .get(&drag.curve)
            .ok_or(CompileError::UnknownDragCurve { id: drag.curve })?;
        let (sx, sy) = match (layout.kind, drag.point) {
            (CurveKind::Line, ValueRef::LineStart) => (layout.offset, layout.offset + 1),
            (CurveKind::Line, ValueRef::LineEnd) => (layout.offset + 2, layout.offset + 3),
            (CurveKind::Arc, ValueRef::ArcCenter) => (layout.offset, layout.offset + 1),
            (CurveKind::Point, ValueRef::PointPosition) => (layout.offset, layout.offset + 1),
            _ => {
                return Err(CompileError::UndraggableReference {
                    id: drag.curve,
                    point: drag.point,
                })
            }
        };
        base_params[sx] = drag.target.x;
        base_params[sy] = drag.target.y;
        pinned.insert(sx);
        pinned.insert(sy);
        drag_slots.insert((drag.curve, drag.point), (sx, sy));
    }

    let free: Vec<usize> = (0..base_params.len())
        .filter(|slot| !pinned.contains(slot))
        .collect();

    debug!(
        curves = dataset.curves().len(),
        constraints = dataset.constraints().len(),
        equations = equations.len(),
        free = free.len(),
        pinned = pinned.len(),
        "compiled sketch system"
    );

    Ok(CompiledSystem {
        snapshot: dataset.clone(),
        equations,
        base_params,
        free,
        radius_slots,
        drag_slots,
    })
}

fn lower_constraint(
    dataset: &DataSet,
    layouts: &HashMap<EntityId, CurveLayout>,
    constraint: &Constraint,
    out: &mut Vec<Equation>,
) -> Result<(), CompileError> {
    match *constraint {
        Constraint::Coincident {
            curve_a,
            ref_a,
            curve_b,
            ref_b,
        } => {
            let a = point_expr(layouts, curve_a, ref_a)?;
            let b = point_expr(layouts, curve_b, ref_b)?;
            out.push(Equation::MatchX { a, b });
            out.push(Equation::MatchY { a, b });
        }
        Constraint::Perpendicular { line_a, line_b } => {
            out.push(Equation::Perpendicular {
                a: line_slots(layouts, line_a)?,
                b: line_slots(layouts, line_b)?,
            });
        }
        Constraint::Parallel { line_a, line_b } => {
            out.push(Equation::Parallel {
                a: line_slots(layouts, line_a)?,
                b: line_slots(layouts, line_b)?,
            });
        }
        Constraint::Equal { arc_a, arc_b } => {
            let a = expect_layout(layouts, arc_a, CurveKind::Arc)?;
            let b = expect_layout(layouts, arc_b, CurveKind::Arc)?;
            out.push(Equation::ScalarMatch {
                a: a.offset + 2,
                b: b.offset + 2,
            });
        }
        Constraint::Tangent { arc, line } => {
            let arc_layout = expect_layout(layouts, arc, CurveKind::Arc)?;
            let line_layout = expect_layout(layouts, line, CurveKind::Line)?;
            let arc_geom = dataset
                .curve(arc)
                .and_then(Curve::as_arc)
                .ok_or(CompileError::MissingEntity { id: arc })?;
            let line_geom = dataset
                .curve(line)
                .and_then(Curve::as_line)
                .ok_or(CompileError::MissingEntity { id: line })?;

            // The tangency acts at whichever arc endpoint currently sits
            // nearest the line. Measured against both line endpoints so the
            // line's own orientation cannot flip the choice. Ties go to the
            // start endpoint.
            let d_start = endpoint_gap(arc_geom.start_point(), line_geom);
            let d_end = endpoint_gap(arc_geom.end_point(), line_geom);
            let theta = if d_end < d_start {
                arc_layout.offset + 4
            } else {
                arc_layout.offset + 3
            };
            out.push(Equation::TangentAt {
                line: slots_at(line_layout.offset),
                radius: arc_layout.offset + 2,
                theta,
            });
        }
        Constraint::PointOnCurve {
            curve,
            point,
            target,
        } => {
            let p = point_expr(layouts, curve, point)?;
            let target_layout = layout_of(layouts, target)?;
            match target_layout.kind {
                CurveKind::Line => out.push(Equation::OnLine {
                    p,
                    line: slots_at(target_layout.offset),
                }),
                CurveKind::Arc => out.push(Equation::OnCircle {
                    p,
                    cx: target_layout.offset,
                    cy: target_layout.offset + 1,
                    r: target_layout.offset + 2,
                }),
                got @ CurveKind::Point => {
                    return Err(CompileError::InvalidTarget { id: target, got })
                }
            }
        }
    }
    Ok(())
}

fn layout_of(
    layouts: &HashMap<EntityId, CurveLayout>,
    id: EntityId,
) -> Result<CurveLayout, CompileError> {
    layouts
        .get(&id)
        .copied()
        .ok_or(CompileError::MissingEntity { id })
}

fn expect_layout(
    layouts: &HashMap<EntityId, CurveLayout>,
    id: EntityId,
    expected: CurveKind,
) -> Result<CurveLayout, CompileError> {
    let layout = layout_of(layouts, id)?;
    if layout.kind != expected {
        return Err(CompileError::WrongKind {
            id,
            expected,
            got: layout.kind,
        });
    }
    Ok(layout)
}

fn line_slots(
    layouts: &HashMap<EntityId, CurveLayout>,
    id: EntityId,
) -> Result<LineSlots, CompileError> {
    let layout = expect_layout(layouts, id, CurveKind::Line)?;
    Ok(slots_at(layout.offset))
}

fn slots_at(offset: usize) -> LineSlots {
    LineSlots {
        ax: offset,
        ay: offset + 1,
        bx: offset + 2,
        by: offset + 3,
    }
}

fn point_expr(
    layouts: &HashMap<EntityId, CurveLayout>,
    id: EntityId,
    vref: ValueRef,
) -> Result<PointExpr, CompileError> {
    let layout = layout_of(layouts, id)?;
    let off = layout.offset;
    match (layout.kind, vref) {
        (CurveKind::Line, ValueRef::LineStart) => Ok(PointExpr::Stored { x: off, y: off + 1 }),
        (CurveKind::Line, ValueRef::LineEnd) => Ok(PointExpr::Stored {
            x: off + 2,
            y: off + 3,
        }),
        (CurveKind::Arc, ValueRef::ArcCenter) => Ok(PointExpr::Stored { x: off, y: off + 1 }),
        (CurveKind::Arc, ValueRef::ArcStart) => Ok(PointExpr::ArcEndpoint {
            cx: off,
            cy: off + 1,
            r: off + 2,
            theta: off + 3,
        }),
        (CurveKind::Arc, ValueRef::ArcEnd) => Ok(PointExpr::ArcEndpoint {
            cx: off,
            cy: off + 1,
            r: off + 2,
            theta: off + 4,
        }),
        (CurveKind::Point, ValueRef::PointPosition) => Ok(PointExpr::Stored { x: off, y: off + 1 }),
        (kind, vref) => Err(CompileError::InvalidBinding { id, kind, vref }),
    }
}

fn endpoint_gap(p: Point2d, line: &Line2d) -> f64 {
    p.distance_to(line.start).min(p.distance_to(line.end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chalk_types::Arc2d;
    use std::f64::consts::FRAC_PI_2;

    fn line(x0: f64, y0: f64, x1: f64, y1: f64) -> Line2d {
        Line2d::new(Point2d::new(x0, y0), Point2d::new(x1, y1))
    }

    #[test]
    fn test_layout_is_insertion_ordered() {
        let mut sketch = DataSet::new();
        let l = line(1.0, 2.0, 3.0, 4.0);
        let arc = Arc2d::new(Point2d::new(5.0, 6.0), 0.25, 1.5, 2.0);
        sketch.add_tangent(&arc, &l);

        let system = compile(&sketch, &[]).unwrap();
        // arc registered first by add_tangent: [cx cy r a0 a1 | sx sy ex ey]
        let initial = system.initial_free();
        assert_eq!(initial.len(), 9);
        assert_relative_eq!(initial[0], 5.0);
        assert_relative_eq!(initial[2], 2.0);
        assert_relative_eq!(initial[3], 0.25);
        assert_relative_eq!(initial[5], 1.0);
        assert_relative_eq!(initial[8], 4.0);
    }

    #[test]
    fn test_tangent_binds_nearest_arc_endpoint() {
        let mut sketch = DataSet::new();
        // arc end (1, 0) touches the line start; arc start is (0, 1)
        let arc = Arc2d::new(Point2d::new(0.0, 0.0), FRAC_PI_2, 0.0, 1.0);
        let l = line(1.0, 0.0, 5.0, 0.0);
        sketch.add_tangent(&arc, &l);

        let system = compile(&sketch, &[]).unwrap();
        assert_eq!(
            system.equations,
            vec![Equation::TangentAt {
                line: slots_at(5),
                radius: 2,
                theta: 4, // end angle slot
            }]
        );
    }

    #[test]
    fn test_tangent_tie_prefers_start_endpoint() {
        let mut sketch = DataSet::new();
        // zero-span arc: both endpoints coincide, neither is nearer
        let arc = Arc2d::new(Point2d::new(0.0, 0.0), 0.25, 0.25, 1.0);
        let l = line(0.0, 2.0, 0.0, 5.0);
        sketch.add_tangent(&arc, &l);

        let system = compile(&sketch, &[]).unwrap();
        assert_eq!(
            system.equations,
            vec![Equation::TangentAt {
                line: slots_at(5),
                radius: 2,
                theta: 3,
            }]
        );
    }

    #[test]
    fn test_degenerate_line_rejected_only_when_referenced() {
        let mut sketch = DataSet::new();
        let stub = line(1.0, 1.0, 1.0, 1.0);
        sketch.add_curve(stub);
        let a = line(0.0, 0.0, 1.0, 0.0);
        let b = line(0.0, 1.0, 1.0, 2.0);
        sketch.add_perpendicular(&a, &b);

        assert!(compile(&sketch, &[]).is_ok());

        sketch.add_parallel(&a, &stub);
        let err = compile(&sketch, &[]).unwrap_err();
        assert!(matches!(err, CompileError::DegenerateLine { .. }));
    }

    #[test]
    fn test_drag_pins_slots_and_moves_target() {
        let mut sketch = DataSet::new();
        let l = line(0.0, 0.0, 10.0, 0.0);
        sketch.add_curve(l);

        let drag = Drag {
            curve: l.id(),
            point: ValueRef::LineStart,
            target: Point2d::new(7.0, 8.0),
        };
        let mut system = compile(&sketch, &[drag]).unwrap();
        assert_eq!(system.free_count(), 2);

        let solved = system.materialize(&system.base_params);
        let moved = solved[0].as_line().unwrap();
        assert_relative_eq!(moved.start.x, 7.0);
        assert_relative_eq!(moved.start.y, 8.0);
        assert_relative_eq!(moved.end.x, 10.0);

        assert!(system.set_drag_target(l.id(), ValueRef::LineStart, Point2d::new(-1.0, -2.0)));
        let solved = system.materialize(&system.base_params);
        let moved = solved[0].as_line().unwrap();
        assert_relative_eq!(moved.start.x, -1.0);
        assert_relative_eq!(moved.start.y, -2.0);

        assert!(!system.set_drag_target(l.id(), ValueRef::LineEnd, Point2d::new(0.0, 0.0)));
    }

    #[test]
    fn test_drag_requires_stored_point() {
        let mut sketch = DataSet::new();
        let arc = Arc2d::new(Point2d::new(0.0, 0.0), 0.0, 1.0, 1.0);
        sketch.add_curve(arc);

        let drag = Drag {
            curve: arc.id(),
            point: ValueRef::ArcStart,
            target: Point2d::new(1.0, 1.0),
        };
        let err = compile(&sketch, &[drag]).unwrap_err();
        assert!(matches!(err, CompileError::UndraggableReference { .. }));
    }

    #[test]
    fn test_drag_unknown_curve() {
        let sketch = DataSet::new();
        let ghost = line(0.0, 0.0, 1.0, 0.0);
        let drag = Drag {
            curve: ghost.id(),
            point: ValueRef::LineStart,
            target: Point2d::new(0.0, 0.0),
        };
        let err = compile(&sketch, &[drag]).unwrap_err();
        assert!(matches!(err, CompileError::UnknownDragCurve { .. }));
    }

    #[test]
    fn test_view_residuals_track_pinned_slots() {
        let mut sketch = DataSet::new();
        let a = line(0.0, 0.0, 4.0, 0.0);
        let b = line(0.0, 1.0, 4.0, 1.0);
        sketch.add_coincidence(&a, ValueRef::LineEnd, &b, ValueRef::LineStart)
            .unwrap();

        let drag = Drag {
            curve: a.id(),
            point: ValueRef::LineEnd,
            target: Point2d::new(4.0, 0.0),
        };
        let mut system = compile(&sketch, &[drag]).unwrap();
        let view = system.solver_view();
        let mut out = DVector::zeros(2);
        view.residuals(&system.initial_free(), &mut out);
        assert_relative_eq!(out[0], 4.0); // 4.0 - 0.0 in x
        assert_relative_eq!(out[1], -1.0);

        // moving the pin moves the residual without touching the free vector
        system.set_drag_target(a.id(), ValueRef::LineEnd, Point2d::new(0.0, 1.0));
        let view = system.solver_view();
        let mut out = DVector::zeros(2);
        view.residuals(&system.initial_free(), &mut out);
        assert_relative_eq!(out[0], 0.0);
        assert_relative_eq!(out[1], 0.0);
    }
}
