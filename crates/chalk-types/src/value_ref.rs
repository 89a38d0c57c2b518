use serde::{Deserialize, Serialize};

use crate::geometry::{Curve, CurveKind, Point2d};

/// Addresses one sub-value of a curve: an endpoint, a center, a radius.
/// Constraints pair a [`ValueRef`] with an [`crate::EntityId`] to say which
/// part of which curve they act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueRef {
    /// Start endpoint of a line.
    LineStart,
    /// End endpoint of a line.
    LineEnd,
    /// Start endpoint of an arc (derived from center, radius, start angle).
    ArcStart,
    /// End endpoint of an arc (derived from center, radius, end angle).
    ArcEnd,
    /// Center of an arc.
    ArcCenter,
    /// Radius of an arc.
    ArcRadius,
    /// Position of a datum point.
    PointPosition,
}

impl ValueRef {
    /// Whether the referenced value is a point (as opposed to a scalar).
    pub fn is_point(self) -> bool {
        !matches!(self, ValueRef::ArcRadius)
    }

    /// Whether the referenced point is stored directly in the curve's
    /// parameters. Arc endpoints are derived, everything else is stored.
    pub fn is_stored_point(self) -> bool {
        matches!(
            self,
            ValueRef::LineStart
                | ValueRef::LineEnd
                | ValueRef::ArcCenter
                | ValueRef::PointPosition
        )
    }

    /// The curve kind this reference is valid for.
    pub fn applies_to(self) -> CurveKind {
        match self {
            ValueRef::LineStart | ValueRef::LineEnd => CurveKind::Line,
            ValueRef::ArcStart | ValueRef::ArcEnd | ValueRef::ArcCenter | ValueRef::ArcRadius => {
                CurveKind::Arc
            }
            ValueRef::PointPosition => CurveKind::Point,
        }
    }
}

impl std::fmt::Display for ValueRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ValueRef::LineStart => "line start",
            ValueRef::LineEnd => "line end",
            ValueRef::ArcStart => "arc start",
            ValueRef::ArcEnd => "arc end",
            ValueRef::ArcCenter => "arc center",
            ValueRef::ArcRadius => "arc radius",
            ValueRef::PointPosition => "point position",
        };
        f.write_str(name)
    }
}

/// A resolved sub-value read out of a curve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RefValue {
    Point(Point2d),
    Scalar(f64),
}

impl RefValue {
    pub fn as_point(self) -> Option<Point2d> {
        match self {
            RefValue::Point(p) => Some(p),
            RefValue::Scalar(_) => None,
        }
    }

    pub fn as_scalar(self) -> Option<f64> {
        match self {
            RefValue::Scalar(s) => Some(s),
            RefValue::Point(_) => None,
        }
    }
}

impl Curve {
    /// Read the sub-value addressed by `vref`, or None if the reference does
    /// not apply to this curve kind.
    pub fn value_of(&self, vref: ValueRef) -> Option<RefValue> {
        match (self, vref) {
            (Curve::Line(l), ValueRef::LineStart) => Some(RefValue::Point(l.start)),
            (Curve::Line(l), ValueRef::LineEnd) => Some(RefValue::Point(l.end)),
            (Curve::Arc(a), ValueRef::ArcStart) => Some(RefValue::Point(a.start_point())),
            (Curve::Arc(a), ValueRef::ArcEnd) => Some(RefValue::Point(a.end_point())),
            (Curve::Arc(a), ValueRef::ArcCenter) => Some(RefValue::Point(a.center)),
            (Curve::Arc(a), ValueRef::ArcRadius) => Some(RefValue::Scalar(a.radius)),
            (Curve::Point(p), ValueRef::PointPosition) => Some(RefValue::Point(p.position)),
            _ => None,
        }
    }
}
