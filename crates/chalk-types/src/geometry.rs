use serde::{Deserialize, Serialize};
use std::f64::consts::{FRAC_PI_2, PI, TAU};

use crate::id::EntityId;

/// A point in sketch-plane coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2d {
    pub x: f64,
    pub y: f64,
}

impl Point2d {
    pub fn new(x: f64, y: f64) -> Self {
        Point2d { x, y }
    }

    pub fn distance_to(&self, other: Point2d) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// A free-standing reference point. Unlike line endpoints it carries no
/// direction, so only its position participates in constraints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DatumPoint {
    id: EntityId,
    pub position: Point2d,
}

impl DatumPoint {
    pub fn new(position: Point2d) -> Self {
        DatumPoint {
            id: EntityId::mint(),
            position,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }
}

/// A line segment between two stored endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line2d {
    id: EntityId,
    pub start: Point2d,
    pub end: Point2d,
}

impl Line2d {
    pub fn new(start: Point2d, end: Point2d) -> Self {
        Line2d {
            id: EntityId::mint(),
            start,
            end,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn length(&self) -> f64 {
        self.start.distance_to(self.end)
    }

    /// Direction of the segment as an angle in (-pi, pi].
    pub fn polar_angle(&self) -> f64 {
        (self.end.y - self.start.y).atan2(self.end.x - self.start.x)
    }
}

/// A circular arc stored as center, radius and two angles. The endpoints are
/// derived, not stored: `center + radius * (cos a, sin a)`. Both angles are
/// free to move during solving, so the swept span is not preserved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Arc2d {
    id: EntityId,
    pub center: Point2d,
    pub radius: f64,
    pub start_angle: f64,
    pub end_angle: f64,
}

impl Arc2d {
    pub fn new(center: Point2d, start_angle: f64, end_angle: f64, radius: f64) -> Self {
        Arc2d {
            id: EntityId::mint(),
            center,
            radius,
            start_angle,
            end_angle,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn start_point(&self) -> Point2d {
        self.point_at(self.start_angle)
    }

    pub fn end_point(&self) -> Point2d {
        self.point_at(self.end_angle)
    }

    fn point_at(&self, angle: f64) -> Point2d {
        Point2d::new(
            self.center.x + self.radius * angle.cos(),
            self.center.y + self.radius * angle.sin(),
        )
    }

    /// Direction of the counter-clockwise tangent at the start endpoint.
    pub fn start_tangent_angle(&self) -> f64 {
        normalize_angle(self.start_angle + FRAC_PI_2)
    }

    /// Direction of the counter-clockwise tangent at the end endpoint.
    pub fn end_tangent_angle(&self) -> f64 {
        normalize_angle(self.end_angle + FRAC_PI_2)
    }
}

/// Wrap an angle into (-pi, pi].
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % TAU;
    if a <= -PI {
        a += TAU;
    }
    if a > PI {
        a -= TAU;
    }
    a
}

/// Discriminant for [`Curve`], used in validation errors and lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CurveKind {
    Point,
    Line,
    Arc,
}

impl std::fmt::Display for CurveKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CurveKind::Point => "point",
            CurveKind::Line => "line",
            CurveKind::Arc => "arc",
        };
        f.write_str(name)
    }
}

/// A geometric entity in a sketch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Curve {
    Point(DatumPoint),
    Line(Line2d),
    Arc(Arc2d),
}

impl Curve {
    pub fn id(&self) -> EntityId {
        match self {
            Curve::Point(p) => p.id,
            Curve::Line(l) => l.id,
            Curve::Arc(a) => a.id,
        }
    }

    pub fn kind(&self) -> CurveKind {
        match self {
            Curve::Point(_) => CurveKind::Point,
            Curve::Line(_) => CurveKind::Line,
            Curve::Arc(_) => CurveKind::Arc,
        }
    }

    pub fn as_point(&self) -> Option<&DatumPoint> {
        match self {
            Curve::Point(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_line(&self) -> Option<&Line2d> {
        match self {
            Curve::Line(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_arc(&self) -> Option<&Arc2d> {
        match self {
            Curve::Arc(a) => Some(a),
            _ => None,
        }
    }

    /// Copy the geometry of `other` into `self` if both id and kind match.
    /// Returns false (and leaves `self` untouched) otherwise.
    pub fn adopt_geometry(&mut self, other: &Curve) -> bool {
        match (self, other) {
            (Curve::Point(dst), Curve::Point(src)) if dst.id == src.id => {
                dst.position = src.position;
                true
            }
            (Curve::Line(dst), Curve::Line(src)) if dst.id == src.id => {
                dst.start = src.start;
                dst.end = src.end;
                true
            }
            (Curve::Arc(dst), Curve::Arc(src)) if dst.id == src.id => {
                dst.center = src.center;
                dst.radius = src.radius;
                dst.start_angle = src.start_angle;
                dst.end_angle = src.end_angle;
                true
            }
            _ => false,
        }
    }
}

impl From<DatumPoint> for Curve {
    fn from(p: DatumPoint) -> Self {
        Curve::Point(p)
    }
}

impl From<Line2d> for Curve {
    fn from(l: Line2d) -> Self {
        Curve::Line(l)
    }
}

impl From<Arc2d> for Curve {
    fn from(a: Arc2d) -> Self {
        Curve::Arc(a)
    }
}

impl From<&DatumPoint> for Curve {
    fn from(p: &DatumPoint) -> Self {
        Curve::Point(*p)
    }
}

impl From<&Line2d> for Curve {
    fn from(l: &Line2d) -> Self {
        Curve::Line(*l)
    }
}

impl From<&Arc2d> for Curve {
    fn from(a: &Arc2d) -> Self {
        Curve::Arc(*a)
    }
}

impl From<&Curve> for Curve {
    fn from(c: &Curve) -> Self {
        *c
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_4;

    #[test]
    fn test_arc_endpoints_derive_from_angles() {
        let arc = Arc2d::new(Point2d::new(1.0, 2.0), 0.0, FRAC_PI_2, 2.0);
        let start = arc.start_point();
        let end = arc.end_point();
        assert_relative_eq!(start.x, 3.0);
        assert_relative_eq!(start.y, 2.0);
        assert_relative_eq!(end.x, 1.0, epsilon = 1e-15);
        assert_relative_eq!(end.y, 4.0);
    }

    #[test]
    fn test_tangent_angle_is_quarter_turn_from_radius() {
        let arc = Arc2d::new(Point2d::new(0.0, 0.0), FRAC_PI_4, PI, 1.0);
        assert_relative_eq!(arc.start_tangent_angle(), FRAC_PI_4 + FRAC_PI_2);
        // pi + pi/2 wraps around to -pi/2
        assert_relative_eq!(arc.end_tangent_angle(), -FRAC_PI_2);
    }

    #[test]
    fn test_normalize_angle_range() {
        assert_relative_eq!(normalize_angle(3.0 * PI), PI);
        assert_relative_eq!(normalize_angle(-PI), PI);
        assert_relative_eq!(normalize_angle(-3.0 * FRAC_PI_2), FRAC_PI_2);
        assert_relative_eq!(normalize_angle(0.25), 0.25);
    }

    #[test]
    fn test_polar_angle() {
        let line = Line2d::new(Point2d::new(1.0, 1.0), Point2d::new(2.0, 2.0));
        assert_relative_eq!(line.polar_angle(), FRAC_PI_4);
    }

    #[test]
    fn test_adopt_geometry_requires_matching_id() {
        let a = Line2d::new(Point2d::new(0.0, 0.0), Point2d::new(1.0, 0.0));
        let b = Line2d::new(Point2d::new(5.0, 5.0), Point2d::new(6.0, 5.0));
        let mut curve: Curve = a.into();
        assert!(!curve.adopt_geometry(&b.into()));

        let mut moved = a;
        moved.end = Point2d::new(2.0, 3.0);
        assert!(curve.adopt_geometry(&moved.into()));
        let line = curve.as_line().unwrap();
        assert_relative_eq!(line.end.x, 2.0);
        assert_relative_eq!(line.end.y, 3.0);
    }

    #[test]
    fn test_curve_serde_tagging() {
        let point = DatumPoint::new(Point2d::new(1.5, -2.0));
        let curve: Curve = point.into();
        let json = serde_json::to_string(&curve).unwrap();
        assert!(json.contains("\"type\":\"Point\""));
        let back: Curve = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id(), point.id());
        assert_eq!(back.kind(), CurveKind::Point);
    }
}
