//! The constraint graph: curves plus the constraints between them.
//!
//! A [`DataSet`] owns its curves by value and validates every constraint as
//! it is added, so a compiled system never meets a dangling id or a value
//! reference of the wrong shape. Solving never mutates the graph; solved
//! geometry comes back through the session and is applied explicitly.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

use chalk_types::{
    reserve_ids_through, Arc2d, Constraint, ConstraintId, Curve, CurveKind, EntityId, Line2d,
    ValueRef,
};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("curve {id} is not in the sketch")]
    UnknownEntity { id: EntityId },
    #[error("curve {id} appears more than once")]
    DuplicateEntity { id: EntityId },
    #[error("constraint {id} appears more than once")]
    DuplicateConstraint { id: ConstraintId },
    #[error("constraint {id} is not in the sketch")]
    UnknownConstraint { id: ConstraintId },
    #[error("{vref} does not apply to {kind} curve {id}")]
    InvalidReference {
        id: EntityId,
        kind: CurveKind,
        vref: ValueRef,
    },
    #[error("{vref} of curve {id} is a scalar, a point is required")]
    ScalarReference { id: EntityId, vref: ValueRef },
    #[error("curve {id} is a {got}, expected a {expected}")]
    KindMismatch {
        id: EntityId,
        expected: CurveKind,
        got: CurveKind,
    },
    #[error("curve {id} cannot be a point-on-curve target (it is a {got})")]
    InvalidTarget { id: EntityId, got: CurveKind },
}

/// A constraint with its sketch-local identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConstraintEntry {
    pub id: ConstraintId,
    #[serde(flatten)]
    pub constraint: Constraint,
}

/// A sketch: geometric curves and the constraints that bind them.
#[derive(Debug, Clone)]
pub struct DataSet {
    id: Uuid,
    curves: Vec<Curve>,
    constraints: Vec<ConstraintEntry>,
    curve_index: HashMap<EntityId, usize>,
}

impl DataSet {
    pub fn new() -> Self {
        DataSet {
            id: Uuid::new_v4(),
            curves: Vec::new(),
            constraints: Vec::new(),
            curve_index: HashMap::new(),
        }
    }

    /// Rebuild a sketch from persisted parts, validating every constraint
    /// against the curve set. Advances the id counter past every loaded id
    /// so later mints cannot collide.
    pub fn from_parts(
        id: Uuid,
        curves: Vec<Curve>,
        constraints: Vec<ConstraintEntry>,
    ) -> Result<Self, GraphError> {
        let mut dataset = DataSet {
            id,
            curves: Vec::new(),
            constraints: Vec::new(),
            curve_index: HashMap::new(),
        };

        let mut max_raw = 0_u64;
        for curve in curves {
            if dataset.curve_index.contains_key(&curve.id()) {
                return Err(GraphError::DuplicateEntity { id: curve.id() });
            }
            max_raw = max_raw.max(curve.id().raw());
            dataset.curve_index.insert(curve.id(), dataset.curves.len());
            dataset.curves.push(curve);
        }

        for entry in constraints {
            if dataset.constraints.iter().any(|e| e.id == entry.id) {
                return Err(GraphError::DuplicateConstraint { id: entry.id });
            }
            dataset.validate_constraint(&entry.constraint)?;
            max_raw = max_raw.max(entry.id.raw());
            dataset.constraints.push(entry);
        }

        reserve_ids_through(max_raw);
        Ok(dataset)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn curves(&self) -> &[Curve] {
        &self.curves
    }

    pub fn constraints(&self) -> &[ConstraintEntry] {
        &self.constraints
    }

    pub fn curve(&self, id: EntityId) -> Option<&Curve> {
        self.curve_index.get(&id).map(|&i| &self.curves[i])
    }

    /// Mutable access to a curve's geometry. Identity (id, kind) is fixed by
    /// the type, so edits here cannot invalidate existing constraints.
    pub fn curve_mut(&mut self, id: EntityId) -> Option<&mut Curve> {
        self.curve_index.get(&id).map(|&i| &mut self.curves[i])
    }

    /// Insert a curve, or refresh its geometry if the id is already present.
    pub fn add_curve(&mut self, curve: impl Into<Curve>) -> EntityId {
        let curve = curve.into();
        self.register(curve);
        curve.id()
    }

    /// Constrain two referenced points to the same location.
    ///
    /// The curves are registered implicitly: building a sketch is just a
    /// sequence of constraint calls over freshly constructed geometry.
    pub fn add_coincidence<A, B>(
        &mut self,
        a: A,
        ref_a: ValueRef,
        b: B,
        ref_b: ValueRef,
    ) -> Result<ConstraintId, GraphError>
    where
        A: Into<Curve>,
        B: Into<Curve>,
    {
        let a = a.into();
        let b = b.into();
        check_point_ref(&a, ref_a)?;
        check_point_ref(&b, ref_b)?;
        self.register(a);
        self.register(b);
        Ok(self.push_constraint(Constraint::Coincident {
            curve_a: a.id(),
            ref_a,
            curve_b: b.id(),
            ref_b,
        }))
    }

    pub fn add_perpendicular(&mut self, a: &Line2d, b: &Line2d) -> ConstraintId {
        self.register(a.into());
        self.register(b.into());
        self.push_constraint(Constraint::Perpendicular {
            line_a: a.id(),
            line_b: b.id(),
        })
    }

    pub fn add_parallel(&mut self, a: &Line2d, b: &Line2d) -> ConstraintId {
        self.register(a.into());
        self.register(b.into());
        self.push_constraint(Constraint::Parallel {
            line_a: a.id(),
            line_b: b.id(),
        })
    }

    pub fn add_equal(&mut self, a: &Arc2d, b: &Arc2d) -> ConstraintId {
        self.register(a.into());
        self.register(b.into());
        self.push_constraint(Constraint::Equal {
            arc_a: a.id(),
            arc_b: b.id(),
        })
    }

    pub fn add_tangent(&mut self, arc: &Arc2d, line: &Line2d) -> ConstraintId {
        self.register(arc.into());
        self.register(line.into());
        self.push_constraint(Constraint::Tangent {
            arc: arc.id(),
            line: line.id(),
        })
    }

    /// Constrain a referenced point of `curve` to lie on `target`, which must
    /// be a line or an arc.
    pub fn add_point_on_curve<A, T>(
        &mut self,
        curve: A,
        point: ValueRef,
        target: T,
    ) -> Result<ConstraintId, GraphError>
    where
        A: Into<Curve>,
        T: Into<Curve>,
    {
        let curve = curve.into();
        let target = target.into();
        check_point_ref(&curve, point)?;
        match target.kind() {
            CurveKind::Line | CurveKind::Arc => {}
            got => return Err(GraphError::InvalidTarget {
                id: target.id(),
                got,
            }),
        }
        self.register(curve);
        self.register(target);
        Ok(self.push_constraint(Constraint::PointOnCurve {
            curve: curve.id(),
            point,
            target: target.id(),
        }))
    }

    /// Add a pre-built constraint referencing curves already in the sketch.
    /// Used by the load path; the typed builders above are the normal way in.
    pub fn add_constraint(&mut self, constraint: Constraint) -> Result<ConstraintId, GraphError> {
        self.validate_constraint(&constraint)?;
        Ok(self.push_constraint(constraint))
    }

    /// Remove a curve and every constraint that references it. Returns the
    /// ids of the removed constraints.
    pub fn remove_curve(&mut self, id: EntityId) -> Result<Vec<ConstraintId>, GraphError> {
        if !self.curve_index.contains_key(&id) {
            return Err(GraphError::UnknownEntity { id });
        }
        self.curves.retain(|c| c.id() != id);
        self.rebuild_index();

        let mut removed = Vec::new();
        self.constraints.retain(|entry| {
            if entry.constraint.referenced_ids().contains(&id) {
                removed.push(entry.id);
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) -> Result<(), GraphError> {
        let before = self.constraints.len();
        self.constraints.retain(|entry| entry.id != id);
        if self.constraints.len() == before {
            return Err(GraphError::UnknownConstraint { id });
        }
        Ok(())
    }

    fn register(&mut self, curve: Curve) {
        match self.curve_index.get(&curve.id()) {
            Some(&idx) => self.curves[idx] = curve,
            None => {
                self.curve_index.insert(curve.id(), self.curves.len());
                self.curves.push(curve);
            }
        }
    }

    fn push_constraint(&mut self, constraint: Constraint) -> ConstraintId {
        let id = ConstraintId::mint();
        self.constraints.push(ConstraintEntry { id, constraint });
        id
    }

    fn rebuild_index(&mut self) {
        self.curve_index = self
            .curves
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id(), i))
            .collect();
    }

    fn expect_kind(&self, id: EntityId, expected: CurveKind) -> Result<(), GraphError> {
        let curve = self.curve(id).ok_or(GraphError::UnknownEntity { id })?;
        if curve.kind() != expected {
            return Err(GraphError::KindMismatch {
                id,
                expected,
                got: curve.kind(),
            });
        }
        Ok(())
    }

    fn expect_point_ref(&self, id: EntityId, vref: ValueRef) -> Result<(), GraphError> {
        let curve = self.curve(id).ok_or(GraphError::UnknownEntity { id })?;
        check_point_ref(curve, vref)
    }

    fn validate_constraint(&self, constraint: &Constraint) -> Result<(), GraphError> {
        match *constraint {
            Constraint::Coincident {
                curve_a,
                ref_a,
                curve_b,
                ref_b,
            } => {
                self.expect_point_ref(curve_a, ref_a)?;
                self.expect_point_ref(curve_b, ref_b)
            }
            Constraint::Perpendicular { line_a, line_b }
            | Constraint::Parallel { line_a, line_b } => {
                self.expect_kind(line_a, CurveKind::Line)?;
                self.expect_kind(line_b, CurveKind::Line)
            }
            Constraint::Equal { arc_a, arc_b } => {
                self.expect_kind(arc_a, CurveKind::Arc)?;
                self.expect_kind(arc_b, CurveKind::Arc)
            }
            Constraint::Tangent { arc, line } => {
                self.expect_kind(arc, CurveKind::Arc)?;
                self.expect_kind(line, CurveKind::Line)
            }
            Constraint::PointOnCurve {
                curve,
                point,
                target,
            } => {
                self.expect_point_ref(curve, point)?;
                let target_curve = self
                    .curve(target)
                    .ok_or(GraphError::UnknownEntity { id: target })?;
                match target_curve.kind() {
                    CurveKind::Line | CurveKind::Arc => Ok(()),
                    got => Err(GraphError::InvalidTarget { id: target, got }),
                }
            }
        }
    }
}

impl Default for DataSet {
    fn default() -> Self {
        Self::new()
    }
}

fn check_point_ref(curve: &Curve, vref: ValueRef) -> Result<(), GraphError> {
    if !vref.is_point() {
        return Err(GraphError::ScalarReference {
            id: curve.id(),
            vref,
        });
    }
    if vref.applies_to() != curve.kind() {
        return Err(GraphError::InvalidReference {
            id: curve.id(),
            kind: curve.kind(),
            vref,
        });
    }
    Ok(())
}
