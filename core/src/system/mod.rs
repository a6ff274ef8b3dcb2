//! Numeric solver backend abstraction.
//!
//! The engine treats the parametric solver as an opaque service behind the
//! [`System`] trait: entity constructors, constraint constructors and one
//! `solve` call, everything addressed through opaque handles. One adapter is
//! written per real backend; the orchestrator is generic over the trait.

use crate::geometry::{Point3, Rotation};
use serde::{Deserialize, Serialize};

mod relax;
pub use relax::RelaxationSystem;

#[cfg(test)]
mod tests_relax;

/// Backend-side scoping id for parameters, entities and constraints. Used to
/// separate fixed from movable state and to attribute failures back to the
/// authored constraint that owns a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ParamHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConstraintHandle(pub u32);

/// Outcome of one backend solve call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolveStatus {
    Converged,
    Inconsistent,
    NotConverging,
    TooManyUnknowns,
    InitFailed,
    /// The backend itself flagged redundant constraints.
    Redundant,
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

impl SolveStatus {
    pub fn reason(&self) -> &'static str {
        match self {
            SolveStatus::Converged => "converged",
            SolveStatus::Inconsistent => "inconsistent constraints",
            SolveStatus::NotConverging => "not converging",
            SolveStatus::TooManyUnknowns => "too many unknowns",
            SolveStatus::InitFailed => "init failed",
            SolveStatus::Redundant => "redundant constraints",
        }
    }
}

/// The constraint operations a backend may implement. Registry translations
/// probe `System::supports` with these before emitting anything, so partial
/// backends degrade to skipped constraints instead of hard failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintOp {
    PointsCoincident,
    PointInPlane,
    PointOnLine,
    PointsDistance,
    PointsProjectDistance,
    PointPlaneDistance,
    PointLineDistance,
    EqualLength,
    LengthRatio,
    LengthDifference,
    EqualLengthPointLineDistance,
    EqualPointLineDistance,
    EqualAngle,
    EqualLineArcLength,
    Symmetric,
    SymmetricHorizontal,
    SymmetricVertical,
    SymmetricLine,
    MidPoint,
    PointsHorizontal,
    PointsVertical,
    LineHorizontal,
    LineVertical,
    Diameter,
    PointOnCircle,
    ArcLineTangent,
    EqualRadius,
    Angle,
    Perpendicular,
    Parallel,
    SameOrientation,
    WhereDragged,
}

/// Seven transform parameters of a rigid part: translation x/y/z then the
/// rotation quaternion w/x/y/z.
pub type TransformParams = [ParamHandle; 7];

/// Abstract interface over a parametric constraint solver.
///
/// Handles returned by constructors are meaningful only to the backend that
/// produced them. Every constructor takes the group the new object belongs
/// to; `solve` then treats exactly one group as unknown.
pub trait System {
    // === Parameters and entities ===

    fn add_param(&mut self, value: f64, group: GroupId) -> ParamHandle;

    /// Current value of a parameter (solved value after a successful solve).
    fn param_value(&self, param: ParamHandle) -> f64;

    fn add_point3d(
        &mut self,
        x: ParamHandle,
        y: ParamHandle,
        z: ParamHandle,
        group: GroupId,
    ) -> EntityHandle;

    fn add_normal3d(
        &mut self,
        w: ParamHandle,
        x: ParamHandle,
        y: ParamHandle,
        z: ParamHandle,
        group: GroupId,
    ) -> EntityHandle;

    /// Wrap a base entity in a rigid transform driven by seven shared
    /// parameters. All entities of one part share the same parameter block.
    fn add_transform(
        &mut self,
        base: EntityHandle,
        params: &TransformParams,
        group: GroupId,
    ) -> EntityHandle;

    fn add_line_segment(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        group: GroupId,
    ) -> EntityHandle;

    fn add_workplane(
        &mut self,
        origin: EntityHandle,
        normal: EntityHandle,
        group: GroupId,
    ) -> EntityHandle;

    fn add_distance(&mut self, value: ParamHandle, group: GroupId) -> EntityHandle;

    fn add_circle(
        &mut self,
        center: EntityHandle,
        normal: EntityHandle,
        radius: EntityHandle,
        group: GroupId,
    ) -> EntityHandle;

    fn add_arc_of_circle(
        &mut self,
        workplane: EntityHandle,
        center: EntityHandle,
        start: EntityHandle,
        end: EntityHandle,
        group: GroupId,
    ) -> EntityHandle;

    // Value-taking conveniences; params land in the same group.

    fn add_point3d_v(&mut self, p: Point3, group: GroupId) -> EntityHandle {
        let x = self.add_param(p.x, group);
        let y = self.add_param(p.y, group);
        let z = self.add_param(p.z, group);
        self.add_point3d(x, y, z, group)
    }

    fn add_normal3d_v(&mut self, r: &Rotation, group: GroupId) -> EntityHandle {
        let q = r.quaternion();
        let w = self.add_param(q.w, group);
        let x = self.add_param(q.i, group);
        let y = self.add_param(q.j, group);
        let z = self.add_param(q.k, group);
        self.add_normal3d(w, x, y, z, group)
    }

    fn add_distance_v(&mut self, value: f64, group: GroupId) -> EntityHandle {
        let d = self.add_param(value, group);
        self.add_distance(d, group)
    }

    // === Constraints ===

    fn add_points_coincident(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_point_in_plane(
        &mut self,
        point: EntityHandle,
        plane: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_point_on_line(
        &mut self,
        point: EntityHandle,
        line: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_points_distance(
        &mut self,
        distance: f64,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_points_project_distance(
        &mut self,
        distance: f64,
        p1: EntityHandle,
        p2: EntityHandle,
        line: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_point_plane_distance(
        &mut self,
        distance: f64,
        point: EntityHandle,
        plane: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_point_line_distance(
        &mut self,
        distance: f64,
        point: EntityHandle,
        line: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_equal_length(
        &mut self,
        l1: EntityHandle,
        l2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_length_ratio(
        &mut self,
        ratio: f64,
        l1: EntityHandle,
        l2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_length_difference(
        &mut self,
        difference: f64,
        l1: EntityHandle,
        l2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_equal_length_point_line_distance(
        &mut self,
        point: EntityHandle,
        l1: EntityHandle,
        l2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_equal_point_line_distance(
        &mut self,
        p1: EntityHandle,
        l1: EntityHandle,
        p2: EntityHandle,
        l2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_equal_angle(
        &mut self,
        supplement: bool,
        l1: EntityHandle,
        l2: EntityHandle,
        l3: EntityHandle,
        l4: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_equal_line_arc_length(
        &mut self,
        line: EntityHandle,
        arc: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_symmetric(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        plane: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_symmetric_horizontal(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_symmetric_vertical(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_symmetric_line(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        line: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_midpoint(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        line: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_points_horizontal(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_points_vertical(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_line_horizontal(
        &mut self,
        line: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_line_vertical(
        &mut self,
        line: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_diameter(&mut self, diameter: f64, circle: EntityHandle, group: GroupId)
        -> ConstraintHandle;

    fn add_point_on_circle(
        &mut self,
        point: EntityHandle,
        circle: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_arc_line_tangent(
        &mut self,
        at_end: bool,
        arc: EntityHandle,
        line: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_equal_radius(
        &mut self,
        c1: EntityHandle,
        c2: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    /// Angle in degrees between two lines/normals.
    fn add_angle(
        &mut self,
        degrees: f64,
        supplement: bool,
        e1: EntityHandle,
        e2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_perpendicular(
        &mut self,
        e1: EntityHandle,
        e2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_parallel(
        &mut self,
        e1: EntityHandle,
        e2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    fn add_same_orientation(
        &mut self,
        n1: EntityHandle,
        n2: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle;

    /// Keep a point as close as possible to where it currently is.
    fn add_where_dragged(
        &mut self,
        point: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle;

    // === Solving ===

    /// Solve for all parameters in `group`, treating everything else as
    /// fixed. When `report_failed` is set the backend gathers the offending
    /// constraints for [`System::failed`].
    fn solve(&mut self, group: GroupId, report_failed: bool) -> SolveStatus;

    /// Constraints implicated in the last failure (empty if converged or
    /// reporting was off).
    fn failed(&self) -> Vec<ConstraintHandle>;

    /// Remaining degrees of freedom after the last solve.
    fn dof(&self) -> i32;

    /// Group a constraint handle was created in, for reverse attribution.
    fn constraint_group(&self, constraint: ConstraintHandle) -> Option<GroupId>;

    /// Whether this backend implements the given constraint operation.
    fn supports(&self, _op: ConstraintOp) -> bool {
        true
    }

    /// Best-effort bias toward a dragged point; backends without the notion
    /// ignore it.
    fn set_dragged(&mut self, _point: EntityHandle) {}
}
