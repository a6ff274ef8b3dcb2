//! Entity builder: derives solver entities from element geometry plus the
//! owning part's transform, memoized per `(subpath, kind)` so an element
//! referenced by several constraints is only built once.
//!
//! Each builder has a companion "validation mode" in [`requirement`]: given
//! only the shape it answers whether the element qualifies for a slot, and
//! if not, what kind of geometry the slot wants.

use super::{EntitySlot, ValidationError};
use crate::adapter::{wire_point_index, Circular, ElementInfo, ElementShape};
use crate::geometry::{Point3, Rotation, Vector3};
use crate::solver::{PartInfo, PartParams};
use crate::system::{EntityHandle, GroupId, System};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Cache key discriminant, one per builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityTag {
    Point,
    Normal,
    Line,
    Workplane,
    Circle,
    Arc,
}

/// A built solver entity, with enough sub-handles and initial world-space
/// values for the composite translations to work with.
#[derive(Debug, Clone)]
pub enum BuiltEntity {
    Point {
        handle: EntityHandle,
        world: Point3,
    },
    Normal {
        handle: EntityHandle,
        /// Secondary orientation rotated 90° about the local x axis, used
        /// when an angle is locked about the primary axis.
        aux: EntityHandle,
        world: Rotation,
    },
    Line {
        handle: EntityHandle,
        p1: EntityHandle,
        p2: EntityHandle,
    },
    Workplane {
        handle: EntityHandle,
        origin: EntityHandle,
        normal: EntityHandle,
        normal_aux: EntityHandle,
        world_origin: Point3,
        world_rot: Rotation,
    },
    Circle {
        handle: EntityHandle,
        center: EntityHandle,
    },
    Arc {
        handle: EntityHandle,
        center: EntityHandle,
        start: EntityHandle,
        end: EntityHandle,
    },
}

impl BuiltEntity {
    pub fn handle(&self) -> EntityHandle {
        match self {
            BuiltEntity::Point { handle, .. }
            | BuiltEntity::Normal { handle, .. }
            | BuiltEntity::Line { handle, .. }
            | BuiltEntity::Workplane { handle, .. }
            | BuiltEntity::Circle { handle, .. }
            | BuiltEntity::Arc { handle, .. } => *handle,
        }
    }
}

/// Validation mode: `None` when the shape qualifies for the slot, otherwise
/// a description of what the slot requires.
pub fn requirement(slot: EntitySlot, shape: &ElementShape) -> Option<&'static str> {
    let ok = match slot {
        EntitySlot::Point => shape.has_center(),
        EntitySlot::Normal => shape.is_planar() || is_axial(shape),
        EntitySlot::Line => shape.is_linear_edge(),
        EntitySlot::LineOrNormal => {
            shape.is_linear_edge() || shape.is_planar() || is_axial(shape)
        }
        EntitySlot::Workplane => shape.is_planar() || is_axial(shape),
        EntitySlot::Circle => shape.is_circular_edge(),
        EntitySlot::Arc => matches!(shape, ElementShape::Arc { .. }),
    };
    if ok {
        return None;
    }
    Some(match slot {
        EntitySlot::Point => "a vertex or circular edge/face",
        EntitySlot::Normal => "an edge or face with a surface normal",
        EntitySlot::Line => "a linear edge",
        EntitySlot::LineOrNormal => "a linear edge or edge/face with planar surface",
        EntitySlot::Workplane => "an edge/face with a planar surface",
        EntitySlot::Circle => "a circular edge",
        EntitySlot::Arc => "a circular arc edge",
    })
}

fn is_axial(shape: &ElementShape) -> bool {
    matches!(shape, ElementShape::CylindricalFace { .. })
}

/// Build (or fetch from cache) the entity a slot asks for.
pub fn build<S: System>(
    system: &mut S,
    part: &mut PartInfo,
    slot: EntitySlot,
    info: &ElementInfo,
    fixed_group: GroupId,
) -> Result<BuiltEntity, ValidationError> {
    match slot {
        EntitySlot::Point => point(system, part, info, fixed_group),
        EntitySlot::Normal => normal(system, part, info, fixed_group),
        EntitySlot::Line => line(system, part, info, fixed_group),
        EntitySlot::LineOrNormal => {
            if info.shape.is_linear_edge() {
                line(system, part, info, fixed_group)
            } else {
                normal(system, part, info, fixed_group)
            }
        }
        EntitySlot::Workplane => workplane(system, part, info, fixed_group),
        EntitySlot::Circle => circle_or_arc(system, part, info, fixed_group, false),
        EntitySlot::Arc => circle_or_arc(system, part, info, fixed_group, true),
    }
}

/// Transformed characteristic point of the element.
pub fn point<S: System>(
    system: &mut S,
    part: &mut PartInfo,
    info: &ElementInfo,
    fixed_group: GroupId,
) -> Result<BuiltEntity, ValidationError> {
    let key = (info.subpath.clone(), EntityTag::Point);
    if let Some(cached) = part.entity_map.get(&key) {
        debug!(part = %part.name, subpath = %info.subpath, "entity cache hit");
        return Ok(cached.clone());
    }
    let world = info.placement * info.shape.pos();
    let handle = match &part.params {
        PartParams::Transform(params) => {
            let params = *params;
            // local coordinates are constants, they live in the fixed group
            let base = system.add_point3d_v(info.shape.pos(), fixed_group);
            system.add_transform(base, &params, part.group)
        }
        PartParams::Pointwise(_) => {
            let index =
                wire_point_index(&info.subpath).ok_or_else(|| ValidationError::ShapeMismatch {
                    subpath: info.subpath.clone(),
                    expected: "a wire vertex",
                })?;
            wire_vertex(system, part, index, world, fixed_group)
        }
    };
    let built = BuiltEntity::Point { handle, world };
    debug!(part = %part.name, subpath = %info.subpath, ?handle, "built point");
    part.entity_map.insert(key, built.clone());
    Ok(built)
}

/// Transformed surface normal (or edge direction) as a quaternion entity,
/// plus the 90°-rotated secondary orientation.
pub fn normal<S: System>(
    system: &mut S,
    part: &mut PartInfo,
    info: &ElementInfo,
    fixed_group: GroupId,
) -> Result<BuiltEntity, ValidationError> {
    let key = (info.subpath.clone(), EntityTag::Normal);
    if let Some(cached) = part.entity_map.get(&key) {
        debug!(part = %part.name, subpath = %info.subpath, "entity cache hit");
        return Ok(cached.clone());
    }
    let params = match &part.params {
        PartParams::Transform(params) => *params,
        PartParams::Pointwise(_) => {
            return Err(ValidationError::ShapeMismatch {
                subpath: info.subpath.clone(),
                expected: "an edge or face with a surface normal",
            })
        }
    };
    let local = info.shape.rotation();
    let base = system.add_normal3d_v(&local, fixed_group);
    let handle = system.add_transform(base, &params, part.group);

    let local_aux = local
        * Rotation::from_axis_angle(&nalgebra::Vector3::x_axis(), std::f64::consts::FRAC_PI_2);
    let base_aux = system.add_normal3d_v(&local_aux, fixed_group);
    let aux = system.add_transform(base_aux, &params, part.group);

    let built = BuiltEntity::Normal {
        handle,
        aux,
        world: info.placement.rotation * local,
    };
    debug!(part = %part.name, subpath = %info.subpath, ?handle, "built normal");
    part.entity_map.insert(key, built.clone());
    Ok(built)
}

/// Pair of transformed endpoints plus the line through them.
pub fn line<S: System>(
    system: &mut S,
    part: &mut PartInfo,
    info: &ElementInfo,
    fixed_group: GroupId,
) -> Result<BuiltEntity, ValidationError> {
    let key = (info.subpath.clone(), EntityTag::Line);
    if let Some(cached) = part.entity_map.get(&key) {
        debug!(part = %part.name, subpath = %info.subpath, "entity cache hit");
        return Ok(cached.clone());
    }
    let (start, end) = match &info.shape {
        ElementShape::LineSegment { start, end } => (*start, *end),
        ElementShape::Arc { start, end, .. } => (*start, *end),
        _ => {
            return Err(ValidationError::ShapeMismatch {
                subpath: info.subpath.clone(),
                expected: "a linear edge",
            })
        }
    };
    let (p1, p2) = match &part.params {
        PartParams::Transform(params) => {
            let params = *params;
            let b1 = system.add_point3d_v(start, fixed_group);
            let b2 = system.add_point3d_v(end, fixed_group);
            (
                system.add_transform(b1, &params, part.group),
                system.add_transform(b2, &params, part.group),
            )
        }
        PartParams::Pointwise(_) => {
            let (i1, i2) = wire_edge_indices(&info.subpath).ok_or_else(|| {
                ValidationError::ShapeMismatch {
                    subpath: info.subpath.clone(),
                    expected: "a wire edge",
                }
            })?;
            let w1 = info.placement * start;
            let w2 = info.placement * end;
            (
                wire_vertex(system, part, i1, w1, fixed_group),
                wire_vertex(system, part, i2, w2, fixed_group),
            )
        }
    };
    let handle = system.add_line_segment(p1, p2, part.group);
    let built = BuiltEntity::Line { handle, p1, p2 };
    debug!(part = %part.name, subpath = %info.subpath, ?handle, "built line");
    part.entity_map.insert(key, built.clone());
    Ok(built)
}

fn wire_vertex<S: System>(
    system: &mut S,
    part: &mut PartInfo,
    index: usize,
    world: Point3,
    fixed_group: GroupId,
) -> EntityHandle {
    let group = part.group;
    let pinned = part.pinned;
    let params = match &mut part.params {
        PartParams::Pointwise(points) => *points.entry(index).or_insert_with(|| {
            [
                system.add_param(world.x, group),
                system.add_param(world.y, group),
                system.add_param(world.z, group),
            ]
        }),
        PartParams::Transform(_) => unreachable!("wire vertices only exist on pointwise parts"),
    };
    let h = system.add_point3d(params[0], params[1], params[2], group);
    if pinned {
        // fixed per point: coincident with its own unmodified position
        let frozen = system.add_point3d_v(world, fixed_group);
        system.add_points_coincident(h, frozen, None, fixed_group);
    }
    h
}

/// 0-based endpoint indices of a `"EdgeN"` subpath on a wire.
fn wire_edge_indices(subpath: &str) -> Option<(usize, usize)> {
    let rest = subpath.strip_prefix("Edge")?;
    let idx: usize = rest.parse().ok()?;
    if idx == 0 {
        return None;
    }
    Some((idx - 1, idx))
}

/// Plane anchored at the element's characteristic point and normal.
pub fn workplane<S: System>(
    system: &mut S,
    part: &mut PartInfo,
    info: &ElementInfo,
    fixed_group: GroupId,
) -> Result<BuiltEntity, ValidationError> {
    let key = (info.subpath.clone(), EntityTag::Workplane);
    if let Some(cached) = part.entity_map.get(&key) {
        debug!(part = %part.name, subpath = %info.subpath, "entity cache hit");
        return Ok(cached.clone());
    }
    let p = point(system, part, info, fixed_group)?;
    let n = normal(system, part, info, fixed_group)?;
    let (origin, world_origin) = match p {
        BuiltEntity::Point { handle, world } => (handle, world),
        _ => unreachable!(),
    };
    let (normal_h, normal_aux, world_rot) = match n {
        BuiltEntity::Normal { handle, aux, world } => (handle, aux, world),
        _ => unreachable!(),
    };
    let handle = system.add_workplane(origin, normal_h, part.group);
    let built = BuiltEntity::Workplane {
        handle,
        origin,
        normal: normal_h,
        normal_aux,
        world_origin,
        world_rot,
    };
    debug!(part = %part.name, subpath = %info.subpath, ?handle, "built workplane");
    part.entity_map.insert(key, built.clone());
    Ok(built)
}

/// Transformed circle, or a parametrized arc when the edge is open (or an
/// arc is explicitly required).
pub fn circle_or_arc<S: System>(
    system: &mut S,
    part: &mut PartInfo,
    info: &ElementInfo,
    fixed_group: GroupId,
    require_arc: bool,
) -> Result<BuiltEntity, ValidationError> {
    let tag = if require_arc {
        EntityTag::Arc
    } else {
        EntityTag::Circle
    };
    let key = (info.subpath.clone(), tag);
    if let Some(cached) = part.entity_map.get(&key) {
        debug!(part = %part.name, subpath = %info.subpath, "entity cache hit");
        return Ok(cached.clone());
    }
    let circular = info
        .shape
        .circular()
        .ok_or_else(|| ValidationError::ShapeMismatch {
            subpath: info.subpath.clone(),
            expected: "a circular edge",
        })?;
    let w = workplane(system, part, info, fixed_group)?;
    let (wrkpln, center, normal_h) = match &w {
        BuiltEntity::Workplane {
            handle,
            origin,
            normal,
            ..
        } => (*handle, *origin, *normal),
        _ => unreachable!(),
    };
    let built = match circular {
        Circular::Endpoints(_, _) => {
            let l = line(system, part, info, fixed_group)?;
            let (p1, p2) = match l {
                BuiltEntity::Line { p1, p2, .. } => (p1, p2),
                _ => unreachable!(),
            };
            let handle = system.add_arc_of_circle(wrkpln, center, p1, p2, part.group);
            BuiltEntity::Arc {
                handle,
                center,
                start: p1,
                end: p2,
            }
        }
        Circular::Radius(_) if require_arc => {
            return Err(ValidationError::ShapeMismatch {
                subpath: info.subpath.clone(),
                expected: "a circular arc edge",
            })
        }
        Circular::Radius(r) => {
            let radius = system.add_distance_v(r, fixed_group);
            let handle = system.add_circle(center, normal_h, radius, part.group);
            BuiltEntity::Circle { handle, center }
        }
    };
    debug!(part = %part.name, subpath = %info.subpath, handle = ?built.handle(), "built circle");
    part.entity_map.insert(key, built.clone());
    Ok(built)
}

// Directions used when a degraded constraint needs an axis line through an
// element's origin; see the redundancy handling in the translations.
pub(crate) fn axis_point<S: System>(
    system: &mut S,
    part: &mut PartInfo,
    info: &ElementInfo,
    axis: Vector3,
    fixed_group: GroupId,
) -> Option<EntityHandle> {
    let params = match &part.params {
        PartParams::Transform(params) => *params,
        PartParams::Pointwise(_) => return None,
    };
    let local = info.shape.pos() + info.shape.rotation() * axis;
    let base = system.add_point3d_v(local, fixed_group);
    Some(system.add_transform(base, &params, part.group))
}
