use serde::{Deserialize, Serialize};

use crate::geometry::Point2d;
use crate::id::EntityId;
use crate::value_ref::ValueRef;

/// A geometric relation between two curves. Constraints reference curves by
/// id only; the geometry lives in the owning sketch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Constraint {
    /// Two referenced points share a location. Two equations (x and y).
    Coincident {
        curve_a: EntityId,
        ref_a: ValueRef,
        curve_b: EntityId,
        ref_b: ValueRef,
    },
    /// The directions of two lines have zero dot product.
    Perpendicular { line_a: EntityId, line_b: EntityId },
    /// The directions of two lines have zero cross product.
    Parallel { line_a: EntityId, line_b: EntityId },
    /// Two arcs share a radius.
    Equal { arc_a: EntityId, arc_b: EntityId },
    /// A line touches an arc at the arc endpoint nearest the line: the line
    /// direction is perpendicular to the radius vector at that endpoint.
    Tangent { arc: EntityId, line: EntityId },
    /// A referenced point lies on a target line or arc.
    PointOnCurve {
        curve: EntityId,
        point: ValueRef,
        target: EntityId,
    },
}

impl Constraint {
    /// The two curve ids this constraint couples.
    pub fn referenced_ids(&self) -> [EntityId; 2] {
        match *self {
            Constraint::Coincident {
                curve_a, curve_b, ..
            } => [curve_a, curve_b],
            Constraint::Perpendicular { line_a, line_b }
            | Constraint::Parallel { line_a, line_b } => [line_a, line_b],
            Constraint::Equal { arc_a, arc_b } => [arc_a, arc_b],
            Constraint::Tangent { arc, line } => [arc, line],
            Constraint::PointOnCurve { curve, target, .. } => [curve, target],
        }
    }

    /// Number of scalar equations this constraint contributes.
    pub fn equation_count(&self) -> usize {
        match self {
            Constraint::Coincident { .. } => 2,
            _ => 1,
        }
    }

    /// A short human-readable name, used in logs and errors.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constraint::Coincident { .. } => "coincident",
            Constraint::Perpendicular { .. } => "perpendicular",
            Constraint::Parallel { .. } => "parallel",
            Constraint::Equal { .. } => "equal",
            Constraint::Tangent { .. } => "tangent",
            Constraint::PointOnCurve { .. } => "point-on-curve",
        }
    }
}

/// Parameters for a point-on-curve drag: pin a referenced point to a target
/// location while the rest of the sketch stays constrained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Drag {
    /// Curve owning the dragged point.
    pub curve: EntityId,
    /// Which point of the curve is dragged. Must be a stored point.
    pub point: ValueRef,
    /// Where the pointer wants the point to be.
    pub target: Point2d,
}
