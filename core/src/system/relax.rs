//! Sequential projection backend.
//!
//! Solves by repeatedly projecting each constraint's error onto the movable
//! parameters, the same scheme the 2D sketch solver uses, lifted to rigid 3D
//! transforms: translation errors move a part's translation block, angular
//! errors premultiply its quaternion block. Robust enough for the core
//! assembly constraint set; the exotic equal-length/symmetry operations are
//! reported as unsupported and skipped upstream.

use super::{
    ConstraintHandle, ConstraintOp, EntityHandle, GroupId, ParamHandle, SolveStatus, System,
    TransformParams,
};
use crate::geometry::{Placement, Point3, Rotation, Vector3, EPSILON};
use nalgebra as na;
use tracing::debug;

const MAX_ITERATIONS: usize = 250;
const CONVERGENCE_EPS: f64 = 1e-9;

#[derive(Debug, Clone, Copy)]
struct Param {
    value: f64,
    group: GroupId,
}

#[derive(Debug, Clone)]
enum Entity {
    Point {
        params: [ParamHandle; 3],
    },
    Normal {
        params: [ParamHandle; 4],
    },
    Transform {
        base: EntityHandle,
        params: TransformParams,
    },
    Line {
        p1: EntityHandle,
        p2: EntityHandle,
    },
    Workplane {
        origin: EntityHandle,
        normal: EntityHandle,
    },
    Distance {
        param: ParamHandle,
    },
    Circle {
        center: EntityHandle,
        #[allow(dead_code)]
        normal: EntityHandle,
        #[allow(dead_code)]
        radius: EntityHandle,
    },
    Arc {
        #[allow(dead_code)]
        workplane: EntityHandle,
        center: EntityHandle,
        #[allow(dead_code)]
        start: EntityHandle,
        #[allow(dead_code)]
        end: EntityHandle,
    },
}

#[derive(Debug, Clone)]
struct Constraint {
    op: ConstraintOp,
    ents: Vec<EntityHandle>,
    wrkpln: Option<EntityHandle>,
    value: f64,
    flag: bool,
    group: GroupId,
    /// Captured position for WhereDragged, snapshotted at solve start.
    target: Option<Point3>,
}

/// In-process relaxation solver implementing the [`System`] trait.
#[derive(Debug, Default)]
pub struct RelaxationSystem {
    params: Vec<Param>,
    entities: Vec<Entity>,
    constraints: Vec<Constraint>,
    dragged: Option<EntityHandle>,
    failed: Vec<ConstraintHandle>,
    dof: i32,
}

impl RelaxationSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate a point entity's current world position, if it has one.
    pub fn solved_point(&self, h: EntityHandle) -> Option<Point3> {
        self.point_pos(h)
    }

    fn value(&self, h: ParamHandle) -> f64 {
        self.params[h.0 as usize].value
    }

    fn entity(&self, h: EntityHandle) -> &Entity {
        &self.entities[h.0 as usize]
    }

    fn push_entity(&mut self, entity: Entity) -> EntityHandle {
        self.entities.push(entity);
        EntityHandle(self.entities.len() as u32 - 1)
    }

    fn push_constraint(
        &mut self,
        op: ConstraintOp,
        ents: Vec<EntityHandle>,
        wrkpln: Option<EntityHandle>,
        value: f64,
        flag: bool,
        group: GroupId,
    ) -> ConstraintHandle {
        self.constraints.push(Constraint {
            op,
            ents,
            wrkpln,
            value,
            flag,
            group,
            target: None,
        });
        ConstraintHandle(self.constraints.len() as u32 - 1)
    }

    fn transform_placement(&self, params: &TransformParams) -> Placement {
        let vals = [
            self.value(params[0]),
            self.value(params[1]),
            self.value(params[2]),
            self.value(params[3]),
            self.value(params[4]),
            self.value(params[5]),
            self.value(params[6]),
        ];
        crate::geometry::placement_from_params(&vals)
    }

    fn point_pos(&self, h: EntityHandle) -> Option<Point3> {
        match self.entity(h) {
            Entity::Point { params } => Some(Point3::new(
                self.value(params[0]),
                self.value(params[1]),
                self.value(params[2]),
            )),
            Entity::Transform { base, params } => {
                let pla = self.transform_placement(params);
                Some(pla * self.point_pos(*base)?)
            }
            Entity::Workplane { origin, .. } => self.point_pos(*origin),
            Entity::Circle { center, .. } | Entity::Arc { center, .. } => self.point_pos(*center),
            _ => None,
        }
    }

    fn orientation(&self, h: EntityHandle) -> Option<Rotation> {
        match self.entity(h) {
            Entity::Normal { params } => {
                Some(Rotation::from_quaternion(na::Quaternion::new(
                    self.value(params[0]),
                    self.value(params[1]),
                    self.value(params[2]),
                    self.value(params[3]),
                )))
            }
            Entity::Transform { base, params } => {
                let pla = self.transform_placement(params);
                Some(pla.rotation * self.orientation(*base)?)
            }
            Entity::Workplane { normal, .. } => self.orientation(*normal),
            _ => None,
        }
    }

    fn line_points(&self, h: EntityHandle) -> Option<(Point3, Point3)> {
        match self.entity(h) {
            Entity::Line { p1, p2 } => Some((self.point_pos(*p1)?, self.point_pos(*p2)?)),
            Entity::Transform { base, params } => {
                let pla = self.transform_placement(params);
                let (a, b) = self.line_points(*base)?;
                Some((pla * a, pla * b))
            }
            _ => None,
        }
    }

    fn direction(&self, h: EntityHandle) -> Option<Vector3> {
        if let Some((a, b)) = self.line_points(h) {
            let d = b - a;
            if d.norm() < EPSILON {
                return None;
            }
            return Some(d.normalize());
        }
        Some(self.orientation(h)? * Vector3::z())
    }

    fn plane_frame(&self, h: EntityHandle) -> Option<(Point3, Rotation)> {
        Some((self.point_pos(h)?, self.orientation(h)?))
    }

    /// The shared rigid-transform parameter block an entity ultimately hangs
    /// off, if any.
    fn transform_block(&self, h: EntityHandle) -> Option<TransformParams> {
        match self.entity(h) {
            Entity::Transform { params, .. } => Some(*params),
            Entity::Line { p1, .. } => self.transform_block(*p1),
            Entity::Workplane { origin, .. } => self.transform_block(*origin),
            Entity::Circle { center, .. } | Entity::Arc { center, .. } => {
                self.transform_block(*center)
            }
            _ => None,
        }
    }

    /// Weight of an entity for translation corrections: 1 when its
    /// parameters belong to the solved group, 0 otherwise.
    fn weight(&self, h: EntityHandle, group: GroupId) -> f64 {
        let owner = match self.entity(h) {
            Entity::Point { params } => Some(params[0]),
            Entity::Normal { params } => Some(params[0]),
            Entity::Transform { params, .. } => Some(params[0]),
            Entity::Line { p1, .. } => return self.weight(*p1, group),
            Entity::Workplane { origin, .. } => return self.weight(*origin, group),
            Entity::Circle { center, .. } | Entity::Arc { center, .. } => {
                return self.weight(*center, group)
            }
            Entity::Distance { param } => Some(*param),
        };
        match owner {
            Some(p) if self.params[p.0 as usize].group == group => 1.0,
            _ => 0.0,
        }
    }

    fn translate(&mut self, h: EntityHandle, delta: Vector3) {
        match self.entity(h).clone() {
            Entity::Point { params } => {
                self.params[params[0].0 as usize].value += delta.x;
                self.params[params[1].0 as usize].value += delta.y;
                self.params[params[2].0 as usize].value += delta.z;
            }
            Entity::Transform { params, .. } => {
                self.params[params[0].0 as usize].value += delta.x;
                self.params[params[1].0 as usize].value += delta.y;
                self.params[params[2].0 as usize].value += delta.z;
            }
            Entity::Line { p1, p2 } => {
                // one shared transform block moves once, free points move both
                if self.transform_block(h).is_some() {
                    self.translate(p1, delta);
                } else {
                    self.translate(p1, delta);
                    self.translate(p2, delta);
                }
            }
            Entity::Workplane { origin, .. } => self.translate(origin, delta),
            Entity::Circle { center, .. } | Entity::Arc { center, .. } => {
                self.translate(center, delta)
            }
            _ => {}
        }
    }

    fn rotate(&mut self, h: EntityHandle, dq: &Rotation) {
        if let Some(params) = self.transform_block(h) {
            let q = Rotation::from_quaternion(na::Quaternion::new(
                self.value(params[3]),
                self.value(params[4]),
                self.value(params[5]),
                self.value(params[6]),
            ));
            let rotated = dq * q;
            let nq = rotated.quaternion();
            self.params[params[3].0 as usize].value = nq.w;
            self.params[params[4].0 as usize].value = nq.i;
            self.params[params[5].0 as usize].value = nq.j;
            self.params[params[6].0 as usize].value = nq.k;
            return;
        }
        if let Entity::Normal { params } = self.entity(h).clone() {
            let q = Rotation::from_quaternion(na::Quaternion::new(
                self.value(params[0]),
                self.value(params[1]),
                self.value(params[2]),
                self.value(params[3]),
            ));
            let rotated = dq * q;
            let nq = rotated.quaternion();
            self.params[params[0].0 as usize].value = nq.w;
            self.params[params[1].0 as usize].value = nq.i;
            self.params[params[2].0 as usize].value = nq.j;
            self.params[params[3].0 as usize].value = nq.k;
        }
    }

    /// Weight for angular corrections: the entity must hang off a movable
    /// transform block or a movable free normal.
    fn rot_weight(&self, h: EntityHandle, group: GroupId) -> f64 {
        if let Some(params) = self.transform_block(h) {
            if self.params[params[3].0 as usize].group == group {
                return 1.0;
            }
            return 0.0;
        }
        match self.entity(h) {
            Entity::Normal { params } if self.params[params[0].0 as usize].group == group => 1.0,
            _ => 0.0,
        }
    }

    fn split_translation(
        &mut self,
        a: EntityHandle,
        b: EntityHandle,
        delta: Vector3,
        group: GroupId,
    ) {
        let wa = self.weight(a, group);
        let wb = self.weight(b, group);
        let total = wa + wb;
        if total == 0.0 {
            return;
        }
        if wa > 0.0 {
            self.translate(a, delta * (wa / total));
        }
        if wb > 0.0 {
            self.translate(b, -delta * (wb / total));
        }
    }

    fn split_rotation(
        &mut self,
        a: EntityHandle,
        b: EntityHandle,
        // rotation that would take b's direction fully onto the target
        dq_b: &Rotation,
        group: GroupId,
    ) {
        let wa = self.rot_weight(a, group);
        let wb = self.rot_weight(b, group);
        let total = wa + wb;
        if total == 0.0 {
            return;
        }
        if wb > 0.0 {
            let partial = dq_b.powf(wb / total);
            self.rotate(b, &partial);
        }
        if wa > 0.0 {
            let partial = dq_b.inverse().powf(wa / total);
            self.rotate(a, &partial);
        }
    }

    /// Evaluate one constraint's error; when `apply` is set, also project the
    /// movable side(s) toward satisfaction. `first` marks the first solver
    /// iteration, where drag biases are applied.
    fn project(&mut self, idx: usize, group: GroupId, apply: bool, first: bool) -> f64 {
        let c = self.constraints[idx].clone();
        match c.op {
            ConstraintOp::PointsCoincident => {
                let (Some(a), Some(b)) = (self.point_pos(c.ents[0]), self.point_pos(c.ents[1]))
                else {
                    return 0.0;
                };
                let mut d = b - a;
                if let Some(w) = c.wrkpln {
                    if let Some((_, rot)) = self.plane_frame(w) {
                        let n = rot * Vector3::z();
                        d -= n * d.dot(&n);
                    }
                }
                let err = d.norm();
                if apply && err > CONVERGENCE_EPS {
                    self.split_translation(c.ents[0], c.ents[1], d, group);
                }
                err
            }
            ConstraintOp::PointInPlane => {
                let (Some(p), Some((o, rot))) =
                    (self.point_pos(c.ents[0]), self.plane_frame(c.ents[1]))
                else {
                    return 0.0;
                };
                let n = rot * Vector3::z();
                let signed = (p - o).dot(&n);
                let err = signed.abs();
                if apply && err > CONVERGENCE_EPS {
                    self.split_translation(c.ents[0], c.ents[1], n * -signed, group);
                }
                err
            }
            ConstraintOp::PointPlaneDistance => {
                let (Some(p), Some((o, rot))) =
                    (self.point_pos(c.ents[0]), self.plane_frame(c.ents[1]))
                else {
                    return 0.0;
                };
                let n = rot * Vector3::z();
                let signed = (p - o).dot(&n);
                let target = if signed >= 0.0 { c.value } else { -c.value };
                let shift = target - signed;
                let err = shift.abs();
                if apply && err > CONVERGENCE_EPS {
                    self.split_translation(c.ents[0], c.ents[1], n * shift, group);
                }
                err
            }
            ConstraintOp::PointOnLine => {
                let (Some(p), Some((l1, l2))) =
                    (self.point_pos(c.ents[0]), self.line_points(c.ents[1]))
                else {
                    return 0.0;
                };
                let axis = l2 - l1;
                if axis.norm() < EPSILON {
                    return 0.0;
                }
                let dir = axis.normalize();
                let v = p - l1;
                let perp = v - dir * v.dot(&dir);
                let err = perp.norm();
                if apply && err > CONVERGENCE_EPS {
                    self.split_translation(c.ents[0], c.ents[1], -perp, group);
                }
                err
            }
            ConstraintOp::PointsDistance => {
                let (Some(a), Some(b)) = (self.point_pos(c.ents[0]), self.point_pos(c.ents[1]))
                else {
                    return 0.0;
                };
                let d = b - a;
                let dist = d.norm();
                if dist < EPSILON {
                    // coincident points that should be apart: separate along x
                    if c.value > EPSILON && apply {
                        self.split_translation(
                            c.ents[0],
                            c.ents[1],
                            Vector3::new(-c.value, 0.0, 0.0),
                            group,
                        );
                    }
                    return c.value;
                }
                let err = (dist - c.value).abs();
                if apply && err > CONVERGENCE_EPS {
                    let corr = d / dist * (dist - c.value);
                    self.split_translation(c.ents[0], c.ents[1], corr, group);
                }
                err
            }
            ConstraintOp::PointsProjectDistance => {
                let (Some(a), Some(b), Some(dir)) = (
                    self.point_pos(c.ents[0]),
                    self.point_pos(c.ents[1]),
                    self.direction(c.ents[2]),
                ) else {
                    return 0.0;
                };
                let cur = (b - a).dot(&dir);
                let err = (cur - c.value).abs();
                if apply && err > CONVERGENCE_EPS {
                    self.split_translation(c.ents[0], c.ents[1], dir * (cur - c.value), group);
                }
                err
            }
            ConstraintOp::PointLineDistance => {
                let (Some(p), Some((l1, l2))) =
                    (self.point_pos(c.ents[0]), self.line_points(c.ents[1]))
                else {
                    return 0.0;
                };
                let axis = l2 - l1;
                if axis.norm() < EPSILON {
                    return 0.0;
                }
                let dir = axis.normalize();
                let v = p - l1;
                let perp = v - dir * v.dot(&dir);
                let cur = perp.norm();
                if cur < EPSILON {
                    return c.value;
                }
                let err = (cur - c.value).abs();
                if apply && err > CONVERGENCE_EPS {
                    let shift = perp / cur * (c.value - cur);
                    self.split_translation(c.ents[0], c.ents[1], shift, group);
                }
                err
            }
            ConstraintOp::PointsHorizontal | ConstraintOp::PointsVertical => {
                let wrk = match c.wrkpln {
                    Some(w) => w,
                    None => return 0.0,
                };
                let (Some(a), Some(b), Some((_, rot))) = (
                    self.point_pos(c.ents[0]),
                    self.point_pos(c.ents[1]),
                    self.plane_frame(wrk),
                ) else {
                    return 0.0;
                };
                // horizontal pins the in-plane y difference, vertical the x
                let axis = if c.op == ConstraintOp::PointsHorizontal {
                    rot * Vector3::y()
                } else {
                    rot * Vector3::x()
                };
                let d = (b - a).dot(&axis);
                let err = d.abs();
                if apply && err > CONVERGENCE_EPS {
                    self.split_translation(c.ents[0], c.ents[1], axis * d, group);
                }
                err
            }
            ConstraintOp::Parallel => {
                let (Some(d1), Some(d2)) =
                    (self.direction(c.ents[0]), self.direction(c.ents[1]))
                else {
                    return 0.0;
                };
                let err = d1.cross(&d2).norm();
                if apply && err > CONVERGENCE_EPS {
                    let sign = if d1.dot(&d2) >= 0.0 { 1.0 } else { -1.0 };
                    if let Some(dq) = Rotation::rotation_between(&d2, &(d1 * sign)) {
                        self.split_rotation(c.ents[0], c.ents[1], &dq, group);
                    }
                }
                err
            }
            ConstraintOp::Perpendicular => {
                let (Some(d1), Some(d2)) =
                    (self.direction(c.ents[0]), self.direction(c.ents[1]))
                else {
                    return 0.0;
                };
                let dot = d1.dot(&d2);
                let err = dot.abs();
                if apply && err > CONVERGENCE_EPS {
                    let target = d2 - d1 * dot;
                    if target.norm() > EPSILON {
                        if let Some(dq) = Rotation::rotation_between(&d2, &target.normalize()) {
                            self.split_rotation(c.ents[0], c.ents[1], &dq, group);
                        }
                    }
                }
                err
            }
            ConstraintOp::Angle => {
                let (Some(d1), Some(d2)) =
                    (self.direction(c.ents[0]), self.direction(c.ents[1]))
                else {
                    return 0.0;
                };
                let mut theta = c.value.to_radians();
                if c.flag {
                    theta = std::f64::consts::PI - theta;
                }
                let alpha = d1.dot(&d2).clamp(-1.0, 1.0).acos();
                let err = (alpha - theta).abs();
                if apply && err > CONVERGENCE_EPS {
                    let mut axis = d1.cross(&d2);
                    if axis.norm() < EPSILON {
                        axis = d1.cross(&Vector3::x());
                        if axis.norm() < EPSILON {
                            axis = d1.cross(&Vector3::y());
                        }
                    }
                    let axis = na::Unit::new_normalize(axis);
                    let dq = Rotation::from_axis_angle(&axis, theta - alpha);
                    self.split_rotation(c.ents[0], c.ents[1], &dq, group);
                }
                err
            }
            ConstraintOp::SameOrientation => {
                let (Some(q1), Some(q2)) =
                    (self.orientation(c.ents[0]), self.orientation(c.ents[1]))
                else {
                    return 0.0;
                };
                let dq = q1 * q2.inverse();
                let err = dq.angle();
                if apply && err > CONVERGENCE_EPS {
                    self.split_rotation(c.ents[0], c.ents[1], &dq, group);
                }
                err
            }
            ConstraintOp::WhereDragged => {
                // one-time starting bias toward the captured position; it
                // never counts against convergence, hard constraints win
                if let (Some(p), Some(target)) = (self.point_pos(c.ents[0]), c.target) {
                    if apply && first && self.weight(c.ents[0], group) > 0.0 {
                        self.translate(c.ents[0], target - p);
                    }
                }
                0.0
            }
            _ => 0.0,
        }
    }

    fn op_dof(op: ConstraintOp, projected: bool) -> i32 {
        match op {
            ConstraintOp::PointsCoincident => {
                if projected {
                    2
                } else {
                    3
                }
            }
            ConstraintOp::SameOrientation => 3,
            ConstraintOp::PointOnLine | ConstraintOp::Parallel => 2,
            ConstraintOp::PointInPlane
            | ConstraintOp::PointsDistance
            | ConstraintOp::PointsProjectDistance
            | ConstraintOp::PointPlaneDistance
            | ConstraintOp::PointLineDistance
            | ConstraintOp::PointsHorizontal
            | ConstraintOp::PointsVertical
            | ConstraintOp::Perpendicular
            | ConstraintOp::Angle => 1,
            _ => 0,
        }
    }
}

impl System for RelaxationSystem {
    fn add_param(&mut self, value: f64, group: GroupId) -> ParamHandle {
        self.params.push(Param { value, group });
        ParamHandle(self.params.len() as u32 - 1)
    }

    fn param_value(&self, param: ParamHandle) -> f64 {
        self.value(param)
    }

    fn add_point3d(
        &mut self,
        x: ParamHandle,
        y: ParamHandle,
        z: ParamHandle,
        _group: GroupId,
    ) -> EntityHandle {
        self.push_entity(Entity::Point { params: [x, y, z] })
    }

    fn add_normal3d(
        &mut self,
        w: ParamHandle,
        x: ParamHandle,
        y: ParamHandle,
        z: ParamHandle,
        _group: GroupId,
    ) -> EntityHandle {
        self.push_entity(Entity::Normal {
            params: [w, x, y, z],
        })
    }

    fn add_transform(
        &mut self,
        base: EntityHandle,
        params: &TransformParams,
        _group: GroupId,
    ) -> EntityHandle {
        self.push_entity(Entity::Transform {
            base,
            params: *params,
        })
    }

    fn add_line_segment(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        _group: GroupId,
    ) -> EntityHandle {
        self.push_entity(Entity::Line { p1, p2 })
    }

    fn add_workplane(
        &mut self,
        origin: EntityHandle,
        normal: EntityHandle,
        _group: GroupId,
    ) -> EntityHandle {
        self.push_entity(Entity::Workplane { origin, normal })
    }

    fn add_distance(&mut self, value: ParamHandle, _group: GroupId) -> EntityHandle {
        self.push_entity(Entity::Distance { param: value })
    }

    fn add_circle(
        &mut self,
        center: EntityHandle,
        normal: EntityHandle,
        radius: EntityHandle,
        _group: GroupId,
    ) -> EntityHandle {
        self.push_entity(Entity::Circle {
            center,
            normal,
            radius,
        })
    }

    fn add_arc_of_circle(
        &mut self,
        workplane: EntityHandle,
        center: EntityHandle,
        start: EntityHandle,
        end: EntityHandle,
        _group: GroupId,
    ) -> EntityHandle {
        self.push_entity(Entity::Arc {
            workplane,
            center,
            start,
            end,
        })
    }

    fn add_points_coincident(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::PointsCoincident,
            vec![p1, p2],
            wrkpln,
            0.0,
            false,
            group,
        )
    }

    fn add_point_in_plane(
        &mut self,
        point: EntityHandle,
        plane: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::PointInPlane,
            vec![point, plane],
            None,
            0.0,
            false,
            group,
        )
    }

    fn add_point_on_line(
        &mut self,
        point: EntityHandle,
        line: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::PointOnLine,
            vec![point, line],
            wrkpln,
            0.0,
            false,
            group,
        )
    }

    fn add_points_distance(
        &mut self,
        distance: f64,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::PointsDistance,
            vec![p1, p2],
            wrkpln,
            distance,
            false,
            group,
        )
    }

    fn add_points_project_distance(
        &mut self,
        distance: f64,
        p1: EntityHandle,
        p2: EntityHandle,
        line: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::PointsProjectDistance,
            vec![p1, p2, line],
            None,
            distance,
            false,
            group,
        )
    }

    fn add_point_plane_distance(
        &mut self,
        distance: f64,
        point: EntityHandle,
        plane: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::PointPlaneDistance,
            vec![point, plane],
            None,
            distance,
            false,
            group,
        )
    }

    fn add_point_line_distance(
        &mut self,
        distance: f64,
        point: EntityHandle,
        line: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::PointLineDistance,
            vec![point, line],
            wrkpln,
            distance,
            false,
            group,
        )
    }

    fn add_equal_length(
        &mut self,
        l1: EntityHandle,
        l2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(ConstraintOp::EqualLength, vec![l1, l2], wrkpln, 0.0, false, group)
    }

    fn add_length_ratio(
        &mut self,
        ratio: f64,
        l1: EntityHandle,
        l2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(ConstraintOp::LengthRatio, vec![l1, l2], wrkpln, ratio, false, group)
    }

    fn add_length_difference(
        &mut self,
        difference: f64,
        l1: EntityHandle,
        l2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::LengthDifference,
            vec![l1, l2],
            wrkpln,
            difference,
            false,
            group,
        )
    }

    fn add_equal_length_point_line_distance(
        &mut self,
        point: EntityHandle,
        l1: EntityHandle,
        l2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::EqualLengthPointLineDistance,
            vec![point, l1, l2],
            wrkpln,
            0.0,
            false,
            group,
        )
    }

    fn add_equal_point_line_distance(
        &mut self,
        p1: EntityHandle,
        l1: EntityHandle,
        p2: EntityHandle,
        l2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::EqualPointLineDistance,
            vec![p1, l1, p2, l2],
            wrkpln,
            0.0,
            false,
            group,
        )
    }

    fn add_equal_angle(
        &mut self,
        supplement: bool,
        l1: EntityHandle,
        l2: EntityHandle,
        l3: EntityHandle,
        l4: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::EqualAngle,
            vec![l1, l2, l3, l4],
            wrkpln,
            0.0,
            supplement,
            group,
        )
    }

    fn add_equal_line_arc_length(
        &mut self,
        line: EntityHandle,
        arc: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::EqualLineArcLength,
            vec![line, arc],
            wrkpln,
            0.0,
            false,
            group,
        )
    }

    fn add_symmetric(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        plane: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::Symmetric,
            vec![p1, p2, plane],
            wrkpln,
            0.0,
            false,
            group,
        )
    }

    fn add_symmetric_horizontal(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::SymmetricHorizontal,
            vec![p1, p2],
            Some(wrkpln),
            0.0,
            false,
            group,
        )
    }

    fn add_symmetric_vertical(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::SymmetricVertical,
            vec![p1, p2],
            Some(wrkpln),
            0.0,
            false,
            group,
        )
    }

    fn add_symmetric_line(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        line: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::SymmetricLine,
            vec![p1, p2, line],
            Some(wrkpln),
            0.0,
            false,
            group,
        )
    }

    fn add_midpoint(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        line: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::MidPoint,
            vec![p1, p2, line],
            wrkpln,
            0.0,
            false,
            group,
        )
    }

    fn add_points_horizontal(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::PointsHorizontal,
            vec![p1, p2],
            Some(wrkpln),
            0.0,
            false,
            group,
        )
    }

    fn add_points_vertical(
        &mut self,
        p1: EntityHandle,
        p2: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::PointsVertical,
            vec![p1, p2],
            Some(wrkpln),
            0.0,
            false,
            group,
        )
    }

    fn add_line_horizontal(
        &mut self,
        line: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::LineHorizontal,
            vec![line],
            Some(wrkpln),
            0.0,
            false,
            group,
        )
    }

    fn add_line_vertical(
        &mut self,
        line: EntityHandle,
        wrkpln: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::LineVertical,
            vec![line],
            Some(wrkpln),
            0.0,
            false,
            group,
        )
    }

    fn add_diameter(
        &mut self,
        diameter: f64,
        circle: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(ConstraintOp::Diameter, vec![circle], None, diameter, false, group)
    }

    fn add_point_on_circle(
        &mut self,
        point: EntityHandle,
        circle: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::PointOnCircle,
            vec![point, circle],
            None,
            0.0,
            false,
            group,
        )
    }

    fn add_arc_line_tangent(
        &mut self,
        at_end: bool,
        arc: EntityHandle,
        line: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::ArcLineTangent,
            vec![arc, line],
            None,
            0.0,
            at_end,
            group,
        )
    }

    fn add_equal_radius(
        &mut self,
        c1: EntityHandle,
        c2: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(ConstraintOp::EqualRadius, vec![c1, c2], None, 0.0, false, group)
    }

    fn add_angle(
        &mut self,
        degrees: f64,
        supplement: bool,
        e1: EntityHandle,
        e2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::Angle,
            vec![e1, e2],
            wrkpln,
            degrees,
            supplement,
            group,
        )
    }

    fn add_perpendicular(
        &mut self,
        e1: EntityHandle,
        e2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::Perpendicular,
            vec![e1, e2],
            wrkpln,
            0.0,
            false,
            group,
        )
    }

    fn add_parallel(
        &mut self,
        e1: EntityHandle,
        e2: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(ConstraintOp::Parallel, vec![e1, e2], wrkpln, 0.0, false, group)
    }

    fn add_same_orientation(
        &mut self,
        n1: EntityHandle,
        n2: EntityHandle,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::SameOrientation,
            vec![n1, n2],
            None,
            0.0,
            false,
            group,
        )
    }

    fn add_where_dragged(
        &mut self,
        point: EntityHandle,
        wrkpln: Option<EntityHandle>,
        group: GroupId,
    ) -> ConstraintHandle {
        self.push_constraint(
            ConstraintOp::WhereDragged,
            vec![point],
            wrkpln,
            0.0,
            false,
            group,
        )
    }

    fn solve(&mut self, group: GroupId, report_failed: bool) -> SolveStatus {
        // snapshot drag targets before anything moves
        for idx in 0..self.constraints.len() {
            if self.constraints[idx].op == ConstraintOp::WhereDragged {
                let target = self.point_pos(self.constraints[idx].ents[0]);
                self.constraints[idx].target = target;
            }
        }
        let drag_target = self.dragged.and_then(|h| self.point_pos(h));

        // drag bias once up front, real constraints get the last word
        if let (Some(h), Some(target)) = (self.dragged, drag_target) {
            if let Some(p) = self.point_pos(h) {
                if self.weight(h, group) > 0.0 {
                    self.translate(h, target - p);
                }
            }
        }

        let mut converged = false;
        let mut iterations = 0;
        for iteration in 0..MAX_ITERATIONS {
            iterations += 1;
            let mut max_error = 0.0_f64;
            for idx in 0..self.constraints.len() {
                let err = self.project(idx, group, true, iteration == 0);
                if err > max_error {
                    max_error = err;
                }
            }
            if max_error < CONVERGENCE_EPS {
                converged = true;
                break;
            }
        }

        let movable = self
            .params
            .iter()
            .filter(|p| p.group == group)
            .count() as i32;
        let consumed: i32 = self
            .constraints
            .iter()
            .map(|c| Self::op_dof(c.op, c.wrkpln.is_some()))
            .sum();
        self.dof = movable - consumed;

        if converged {
            debug!(iterations, dof = self.dof, "solve converged");
            self.failed.clear();
            return SolveStatus::Converged;
        }
        if report_failed {
            self.failed = (0..self.constraints.len())
                .filter(|&idx| self.project(idx, group, false, false) >= CONVERGENCE_EPS)
                .map(|idx| ConstraintHandle(idx as u32))
                .collect();
        }
        debug!(iterations, "solve did not converge");
        SolveStatus::NotConverging
    }

    fn failed(&self) -> Vec<ConstraintHandle> {
        self.failed.clone()
    }

    fn dof(&self) -> i32 {
        self.dof
    }

    fn constraint_group(&self, constraint: ConstraintHandle) -> Option<GroupId> {
        self.constraints.get(constraint.0 as usize).map(|c| c.group)
    }

    fn supports(&self, op: ConstraintOp) -> bool {
        matches!(
            op,
            ConstraintOp::PointsCoincident
                | ConstraintOp::PointInPlane
                | ConstraintOp::PointOnLine
                | ConstraintOp::PointsDistance
                | ConstraintOp::PointsProjectDistance
                | ConstraintOp::PointPlaneDistance
                | ConstraintOp::PointLineDistance
                | ConstraintOp::PointsHorizontal
                | ConstraintOp::PointsVertical
                | ConstraintOp::Parallel
                | ConstraintOp::Perpendicular
                | ConstraintOp::Angle
                | ConstraintOp::SameOrientation
                | ConstraintOp::WhereDragged
        )
    }

    fn set_dragged(&mut self, point: EntityHandle) {
        self.dragged = Some(point);
    }
}
