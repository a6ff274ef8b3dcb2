//! Translation of authored constraints into backend invocations.
//!
//! Simple kinds map one signature onto one backend call. Composite kinds
//! pair N elements either as a cascade (successive pairs) or a star (one
//! reference against every other) and run each pair through the redundancy
//! tracker before emitting, degrading or skipping as the budget dictates.

use super::entities::BuiltEntity;
use super::redundancy::{RedundancyClass, Verdict};
use super::{ConstraintDecl, ConstraintKind, EntitySlot, ValidationError};
use crate::adapter::{ElementInfo, HostDocument};
use crate::geometry::{project_2d, Vector3};
use crate::solver::{Session, SolverError, GROUP_FIXED};
use crate::system::{ConstraintHandle, ConstraintOp, EntityHandle, GroupId, System};
use tracing::{debug, warn};

/// Backend operation a simple kind maps onto, used for support probing.
fn primary_op(kind: ConstraintKind) -> Option<ConstraintOp> {
    Some(match kind {
        ConstraintKind::PointsCoincident => ConstraintOp::PointsCoincident,
        ConstraintKind::PointInPlane => ConstraintOp::PointInPlane,
        ConstraintKind::PointOnLine => ConstraintOp::PointOnLine,
        ConstraintKind::PointsDistance => ConstraintOp::PointsDistance,
        ConstraintKind::PointsProjectDistance => ConstraintOp::PointsProjectDistance,
        ConstraintKind::PointPlaneDistance => ConstraintOp::PointPlaneDistance,
        ConstraintKind::PointLineDistance => ConstraintOp::PointLineDistance,
        ConstraintKind::EqualLength => ConstraintOp::EqualLength,
        ConstraintKind::LengthRatio => ConstraintOp::LengthRatio,
        ConstraintKind::LengthDifference => ConstraintOp::LengthDifference,
        ConstraintKind::EqualLengthPointLineDistance => ConstraintOp::EqualLengthPointLineDistance,
        ConstraintKind::EqualPointLineDistance => ConstraintOp::EqualPointLineDistance,
        ConstraintKind::EqualAngle => ConstraintOp::EqualAngle,
        ConstraintKind::EqualLineArcLength => ConstraintOp::EqualLineArcLength,
        ConstraintKind::Symmetric => ConstraintOp::Symmetric,
        ConstraintKind::SymmetricHorizontal => ConstraintOp::SymmetricHorizontal,
        ConstraintKind::SymmetricVertical => ConstraintOp::SymmetricVertical,
        ConstraintKind::SymmetricLine => ConstraintOp::SymmetricLine,
        ConstraintKind::MidPoint => ConstraintOp::MidPoint,
        ConstraintKind::PointsHorizontal => ConstraintOp::PointsHorizontal,
        ConstraintKind::PointsVertical => ConstraintOp::PointsVertical,
        ConstraintKind::LineHorizontal => ConstraintOp::LineHorizontal,
        ConstraintKind::LineVertical => ConstraintOp::LineVertical,
        ConstraintKind::Diameter => ConstraintOp::Diameter,
        ConstraintKind::PointOnCircle => ConstraintOp::PointOnCircle,
        ConstraintKind::ArcLineTangent => ConstraintOp::ArcLineTangent,
        ConstraintKind::EqualRadius => ConstraintOp::EqualRadius,
        ConstraintKind::Angle => ConstraintOp::Angle,
        ConstraintKind::Perpendicular => ConstraintOp::Perpendicular,
        ConstraintKind::Parallel => ConstraintOp::Parallel,
        ConstraintKind::Colinear => ConstraintOp::PointOnLine,
        ConstraintKind::WhereDragged => ConstraintOp::WhereDragged,
        ConstraintKind::SameOrientation => ConstraintOp::SameOrientation,
        ConstraintKind::MultiParallel => ConstraintOp::Parallel,
        ConstraintKind::PlaneCoincident
        | ConstraintKind::PlaneAlignment
        | ConstraintKind::AxialAlignment => ConstraintOp::PointsCoincident,
        ConstraintKind::Locked => return None,
    })
}

/// Entry point: translate one constraint whose elements have already been
/// resolved and checked.
pub(crate) fn prepare<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    infos: &[ElementInfo],
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    if let Some(op) = primary_op(decl.kind) {
        if !sess.system.supports(op) {
            return Err(SolverError::Unsupported {
                name: decl.cstr_name(),
            });
        }
    }
    match decl.kind {
        ConstraintKind::Locked => prepare_locked(sess, decl, infos, group),
        kind if kind.info().multi => {
            if kind.cascades() && decl.props.cascade {
                prepare_cascade(sess, decl, infos, group)
            } else {
                prepare_star(sess, decl, infos, group)
            }
        }
        _ => prepare_simple(sess, decl, infos, group),
    }
}

/// Expansion path used by the multiplier: each pre-matched pair goes through
/// the same pair translation as a star composite.
pub(crate) fn prepare_pairs<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    pairs: &[(ElementInfo, ElementInfo)],
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    let mut handles = Vec::new();
    let span = pairs.len() + 1;
    for (e1, e2) in pairs {
        handles.extend(prepare_pair(sess, decl, e1, e2, span, group)?);
    }
    Ok(handles)
}

// === Locked ===

/// A locked vertex pins to a frozen world-space copy; a locked linear edge
/// additionally constrains its second endpoint onto the frozen line, which
/// keeps the rigid edge from being over-constrained.
fn prepare_locked<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    infos: &[ElementInfo],
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    let mut handles = Vec::new();
    for (i, info) in infos.iter().enumerate() {
        match &info.shape {
            crate::adapter::ElementShape::Vertex { .. } => {
                let p = sess.build_entity(info, EntitySlot::Point)?;
                let frozen = sess.system.add_point3d_v(info.world_pos(), GROUP_FIXED);
                handles.push(
                    sess.system
                        .add_points_coincident(p.handle(), frozen, None, group),
                );
            }
            crate::adapter::ElementShape::LineSegment { start, end } => {
                let l = sess.build_entity(info, EntitySlot::Line)?;
                let (p1, p2) = match l {
                    BuiltEntity::Line { p1, p2, .. } => (p1, p2),
                    _ => unreachable!(),
                };
                let f1 = sess
                    .system
                    .add_point3d_v(info.placement * start, GROUP_FIXED);
                let f2 = sess.system.add_point3d_v(info.placement * end, GROUP_FIXED);
                let frozen = sess.system.add_line_segment(f1, f2, GROUP_FIXED);
                handles.push(sess.system.add_points_coincident(p1, f1, None, group));
                handles.push(sess.system.add_point_on_line(p2, frozen, None, group));
            }
            _ => {
                return Err(ValidationError::NotLockable {
                    name: decl.cstr_name(),
                    ordinal: super::ordinal(i),
                }
                .into())
            }
        }
    }
    Ok(handles)
}

// === Composite drivers ===

/// Star pairing: a reference element (a fixed part's element when present)
/// against every other element. Duplicate parts and surplus fixed parts are
/// skipped with a warning.
fn prepare_star<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    infos: &[ElementInfo],
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    let mut seen = Vec::new();
    let mut ordered: Vec<&ElementInfo> = Vec::new();
    let mut have_fixed = false;
    for info in infos {
        if seen.contains(&info.part) {
            warn!(
                "{} skip duplicate parts {}",
                decl.cstr_name(),
                info.part_name
            );
            continue;
        }
        seen.push(info.part);
        if sess.is_fixed(&info.part) {
            if have_fixed {
                warn!(
                    "{} skip more than one fixed part {}",
                    decl.cstr_name(),
                    info.part_name
                );
                continue;
            }
            have_fixed = true;
            ordered.insert(0, info);
        } else {
            ordered.push(info);
        }
    }
    if ordered.len() <= 1 {
        warn!("{} has no effective constraint", decl.cstr_name());
        return Ok(Vec::new());
    }
    let span = ordered.len();
    let mut handles = Vec::new();
    let reference = ordered[0];
    for info in &ordered[1..] {
        handles.extend(prepare_pair(sess, decl, reference, info, span, group)?);
    }
    Ok(handles)
}

/// Cascade pairing: successive pairs 1-2, 2-3, …; consecutive elements on
/// the same part collapse into one chain step.
fn prepare_cascade<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    infos: &[ElementInfo],
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    let span = infos.len();
    let mut handles = Vec::new();
    let mut prev: Option<&ElementInfo> = None;
    let mut count = 0;
    for info in infos {
        let p = match prev {
            None => {
                prev = Some(info);
                continue;
            }
            Some(p) if p.part == info.part => {
                prev = Some(info);
                continue;
            }
            Some(p) => p,
        };
        count += 1;
        // keep the stationary side first
        if sess.is_fixed(&info.part) {
            handles.extend(prepare_pair(sess, decl, info, p, span, group)?);
        } else {
            handles.extend(prepare_pair(sess, decl, p, info, span, group)?);
        }
        prev = Some(info);
    }
    if count == 0 {
        warn!("{} has no effective constraint", decl.cstr_name());
    }
    Ok(handles)
}

// === Pair translations ===

fn prepare_pair<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    e1: &ElementInfo,
    e2: &ElementInfo,
    span: usize,
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    match decl.kind {
        ConstraintKind::PlaneCoincident => pair_plane_coincident(sess, decl, e1, e2, span, group),
        ConstraintKind::PlaneAlignment => pair_plane_alignment(sess, decl, e1, e2, span, group),
        ConstraintKind::AxialAlignment => pair_axial_alignment(sess, decl, e1, e2, span, group),
        ConstraintKind::SameOrientation => {
            let n1 = sess.build_entity(e1, EntitySlot::Normal)?;
            let n2 = sess.build_entity(e2, EntitySlot::Normal)?;
            Ok(vec![sess
                .system
                .add_same_orientation(n1.handle(), n2.handle(), group)])
        }
        ConstraintKind::MultiParallel => pair_multi_parallel(sess, decl, e1, e2, group),
        // multiplied simple kinds go through their plain 2-element form
        _ => {
            let infos = [e1.clone(), e2.clone()];
            prepare_simple(sess, decl, &infos, group)
        }
    }
}

struct WorkplaneParts {
    wrkpln: EntityHandle,
    origin: EntityHandle,
    normal: EntityHandle,
    normal_aux: EntityHandle,
    world_origin: crate::geometry::Point3,
    world_rot: crate::geometry::Rotation,
}

fn workplane_parts<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    info: &ElementInfo,
) -> Result<WorkplaneParts, SolverError> {
    match sess.build_entity(info, EntitySlot::Workplane)? {
        BuiltEntity::Workplane {
            handle,
            origin,
            normal,
            normal_aux,
            world_origin,
            world_rot,
        } => Ok(WorkplaneParts {
            wrkpln: handle,
            origin,
            normal,
            normal_aux,
            world_origin,
            world_rot,
        }),
        _ => unreachable!(),
    }
}

/// Orientation handling shared by the plane/axial composites: same
/// orientation when the angle is locked at zero, otherwise parallel plus an
/// angle lock on the secondary orientations.
fn set_orientation<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    handles: &mut Vec<ConstraintHandle>,
    lock_angle: bool,
    angle: f64,
    w1: &WorkplaneParts,
    w2: &WorkplaneParts,
    group: GroupId,
) {
    if lock_angle && angle == 0.0 {
        handles.push(sess.system.add_same_orientation(w1.normal, w2.normal, group));
    } else {
        handles.push(sess.system.add_parallel(w1.normal, w2.normal, None, group));
        if lock_angle {
            handles.push(sess.system.add_angle(
                angle,
                false,
                w1.normal_aux,
                w2.normal_aux,
                None,
                group,
            ));
        }
    }
}

fn pair_plane_coincident<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    e1: &ElementInfo,
    e2: &ElementInfo,
    span: usize,
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    let lock_angle = decl.props.lock_angle;
    let class = RedundancyClass::Coincident;
    let verdict = sess.count_redundancy(
        class,
        if lock_angle { 2 } else { 1 },
        decl,
        e1,
        e2,
        span > 2,
    );
    let w1 = workplane_parts(sess, e1)?;
    let w2 = workplane_parts(sess, e2)?;
    let mut handles = Vec::new();

    match verdict {
        Verdict::Overflow if !sess.tracker.relax || lock_angle => {
            sess.tracker
                .report(&decl.cstr_name(), &e1.part_name, &e2.part_name, true);
            return Ok(handles);
        }
        Verdict::Overflow | Verdict::Saturated(_) if !lock_angle => {
            // reduce to one remaining DOF: the second origin is pinned to an
            // axis line through the first origin, picked by the smaller
            // projected offset
            sess.tracker
                .report(&decl.cstr_name(), &e1.part_name, &e2.part_name, false);
            let v2 = project_2d(&w1.world_rot, &w1.world_origin, &w2.world_origin);
            let axis = if v2[0].abs() < v2[1].abs() {
                Vector3::x()
            } else {
                Vector3::y()
            };
            if let Some(line) = sess.axis_line(e1, w1.origin, axis)? {
                handles.push(
                    sess.system
                        .add_point_on_line(w2.origin, line, Some(w1.wrkpln), group),
                );
            }
            return Ok(handles);
        }
        Verdict::Saturated(_) => {
            // lock-angle at the budget edge: keep the full form, note it
            sess.tracker
                .report(&decl.cstr_name(), &e1.part_name, &e2.part_name, false);
        }
        _ => {}
    }

    let d = decl.props.offset.abs();
    if d > 0.0 {
        handles.push(
            sess.system
                .add_point_plane_distance(d, w2.origin, w1.wrkpln, group),
        );
        handles.push(
            sess.system
                .add_points_coincident(w1.origin, w2.origin, Some(w1.wrkpln), group),
        );
    } else {
        handles.push(
            sess.system
                .add_points_coincident(w1.origin, w2.origin, None, group),
        );
    }
    set_orientation(
        sess,
        &mut handles,
        lock_angle,
        decl.props.angle,
        &w1,
        &w2,
        group,
    );
    debug!("{} plane coincident: {:?}", decl.cstr_name(), handles);
    Ok(handles)
}

fn pair_plane_alignment<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    e1: &ElementInfo,
    e2: &ElementInfo,
    span: usize,
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    let lock_angle = decl.props.lock_angle;
    // alignment is only budgeted in auto-relax mode
    let verdict = if sess.tracker.relax {
        Some(sess.count_redundancy(
            RedundancyClass::Alignment,
            if lock_angle { 2 } else { 1 },
            decl,
            e1,
            e2,
            span > 2,
        ))
    } else {
        None
    };
    if matches!(verdict, Some(Verdict::Overflow)) {
        sess.tracker
            .report(&decl.cstr_name(), &e1.part_name, &e2.part_name, true);
        return Ok(Vec::new());
    }

    let w1 = workplane_parts(sess, e1)?;
    let w2 = workplane_parts(sess, e2)?;
    let mut handles = Vec::new();

    let d = decl.props.offset.abs();
    if d > 0.0 {
        handles.push(
            sess.system
                .add_point_plane_distance(d, w2.origin, w1.wrkpln, group),
        );
    } else {
        handles.push(sess.system.add_point_in_plane(w2.origin, w1.wrkpln, group));
    }
    match verdict {
        Some(Verdict::Saturated(_)) => {
            // budget exhausted: keep only the in-plane part
            sess.tracker
                .report(&decl.cstr_name(), &e1.part_name, &e2.part_name, false);
        }
        Some(Verdict::Added(n)) if n + 1 == RedundancyClass::Alignment.limit() && !lock_angle => {
            sess.tracker
                .report(&decl.cstr_name(), &e1.part_name, &e2.part_name, false);
            set_orientation(
                sess,
                &mut handles,
                lock_angle,
                decl.props.angle,
                &w1,
                &w2,
                group,
            );
        }
        _ => {
            set_orientation(
                sess,
                &mut handles,
                lock_angle,
                decl.props.angle,
                &w1,
                &w2,
                group,
            );
        }
    }
    debug!("{} plane alignment: {:?}", decl.cstr_name(), handles);
    Ok(handles)
}

fn pair_axial_alignment<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    e1: &ElementInfo,
    e2: &ElementInfo,
    span: usize,
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    let existing =
        sess.tracker
            .existing(RedundancyClass::Coincident, e1.part, e2.part);
    if existing > RedundancyClass::Coincident.limit() {
        sess.tracker
            .report(&decl.cstr_name(), &e1.part_name, &e2.part_name, true);
        return Ok(Vec::new());
    }
    if existing > 0 {
        // an axis through two parts already pinned together degenerates into
        // a plane coincidence
        return pair_plane_coincident(sess, decl, e1, e2, span, group);
    }
    let w1 = workplane_parts(sess, e1)?;
    let w2 = workplane_parts(sess, e2)?;
    let mut handles = vec![sess.system.add_points_coincident(
        w1.origin,
        w2.origin,
        Some(w1.wrkpln),
        group,
    )];
    set_orientation(
        sess,
        &mut handles,
        decl.props.lock_angle,
        decl.props.angle,
        &w1,
        &w2,
        group,
    );
    debug!("{} axial alignment: {:?}", decl.cstr_name(), handles);
    Ok(handles)
}

fn pair_multi_parallel<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    e1: &ElementInfo,
    e2: &ElementInfo,
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    let b1 = sess.build_entity(e1, EntitySlot::LineOrNormal)?;
    let b2 = sess.build_entity(e2, EntitySlot::LineOrNormal)?;
    let mut handles = Vec::new();
    match (&b1, &b2) {
        (BuiltEntity::Normal { .. }, BuiltEntity::Normal { .. }) => {
            let w1 = workplane_parts(sess, e1)?;
            let w2 = workplane_parts(sess, e2)?;
            set_orientation(
                sess,
                &mut handles,
                decl.props.lock_angle,
                decl.props.angle,
                &w1,
                &w2,
                group,
            );
        }
        (BuiltEntity::Line { .. }, BuiltEntity::Line { .. }) => {
            handles.push(
                sess.system
                    .add_parallel(b1.handle(), b2.handle(), None, group),
            );
        }
        // a plane normal is perpendicular to any line parallel to the plane
        (BuiltEntity::Normal { .. }, _) => {
            handles.push(
                sess.system
                    .add_perpendicular(b1.handle(), b2.handle(), None, group),
            );
        }
        _ => {
            handles.push(
                sess.system
                    .add_perpendicular(b2.handle(), b1.handle(), None, group),
            );
        }
    }
    Ok(handles)
}

// === Simple kinds ===

fn prepare_simple<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    infos: &[ElementInfo],
    group: GroupId,
) -> Result<Vec<ConstraintHandle>, SolverError> {
    let slots = super::effective_slots(decl.kind, &decl.name, infos.len(), true)?;
    let info = decl.kind.info();

    let mut built = Vec::with_capacity(infos.len());
    for (slot, element) in slots.iter().zip(infos.iter()) {
        built.push(sess.build_entity(element, *slot)?);
    }
    // trailing optional workplane, when authored
    let wrkpln = if built.len() > info.slots.len() {
        built.pop().map(|b| match b {
            BuiltEntity::Workplane { handle, .. } => handle,
            other => other.handle(),
        })
    } else {
        None
    };

    let h = |i: usize| built[i].handle();
    let p = &decl.props;
    let sys = &mut sess.system;
    let handle = match decl.kind {
        ConstraintKind::PointsCoincident => sys.add_points_coincident(h(0), h(1), wrkpln, group),
        ConstraintKind::PointInPlane => sys.add_point_in_plane(h(0), h(1), group),
        ConstraintKind::PointOnLine => sys.add_point_on_line(h(0), h(1), wrkpln, group),
        ConstraintKind::PointsDistance => {
            sys.add_points_distance(p.distance, h(0), h(1), wrkpln, group)
        }
        ConstraintKind::PointsProjectDistance => {
            sys.add_points_project_distance(p.distance, h(0), h(1), h(2), group)
        }
        ConstraintKind::PointPlaneDistance => {
            sys.add_point_plane_distance(p.distance, h(0), h(1), group)
        }
        ConstraintKind::PointLineDistance => {
            sys.add_point_line_distance(p.distance, h(0), h(1), wrkpln, group)
        }
        ConstraintKind::EqualLength => sys.add_equal_length(h(0), h(1), wrkpln, group),
        ConstraintKind::LengthRatio => sys.add_length_ratio(p.ratio, h(0), h(1), wrkpln, group),
        ConstraintKind::LengthDifference => {
            sys.add_length_difference(p.difference, h(0), h(1), wrkpln, group)
        }
        ConstraintKind::EqualLengthPointLineDistance => {
            sys.add_equal_length_point_line_distance(h(0), h(1), h(2), wrkpln, group)
        }
        ConstraintKind::EqualPointLineDistance => {
            sys.add_equal_point_line_distance(h(0), h(1), h(2), h(3), wrkpln, group)
        }
        ConstraintKind::EqualAngle => {
            sys.add_equal_angle(p.supplement, h(0), h(1), h(2), h(3), wrkpln, group)
        }
        ConstraintKind::EqualLineArcLength => sys.add_equal_line_arc_length(h(0), h(1), wrkpln, group),
        ConstraintKind::Symmetric => sys.add_symmetric(h(0), h(1), h(2), wrkpln, group),
        ConstraintKind::SymmetricHorizontal => sys.add_symmetric_horizontal(h(0), h(1), h(2), group),
        ConstraintKind::SymmetricVertical => sys.add_symmetric_vertical(h(0), h(1), h(2), group),
        ConstraintKind::SymmetricLine => sys.add_symmetric_line(h(0), h(1), h(2), h(3), group),
        ConstraintKind::MidPoint => sys.add_midpoint(h(0), h(1), h(2), wrkpln, group),
        ConstraintKind::PointsHorizontal | ConstraintKind::PointsVertical => {
            let wrkpln = match wrkpln {
                Some(w) => w,
                None => sess_plane(sess, &infos[0]),
            };
            if decl.kind == ConstraintKind::PointsHorizontal {
                sess.system.add_points_horizontal(h(0), h(1), wrkpln, group)
            } else {
                sess.system.add_points_vertical(h(0), h(1), wrkpln, group)
            }
        }
        ConstraintKind::LineHorizontal | ConstraintKind::LineVertical => {
            let wrkpln = match wrkpln {
                Some(w) => w,
                None => sess_plane(sess, &infos[0]),
            };
            if decl.kind == ConstraintKind::LineHorizontal {
                sess.system.add_line_horizontal(h(0), wrkpln, group)
            } else {
                sess.system.add_line_vertical(h(0), wrkpln, group)
            }
        }
        ConstraintKind::Diameter => sys.add_diameter(p.diameter, h(0), group),
        ConstraintKind::PointOnCircle => sys.add_point_on_circle(h(0), h(1), group),
        ConstraintKind::ArcLineTangent => sys.add_arc_line_tangent(p.at_end, h(0), h(1), group),
        ConstraintKind::EqualRadius => sys.add_equal_radius(h(0), h(1), group),
        ConstraintKind::Angle => sys.add_angle(p.angle, p.supplement, h(0), h(1), wrkpln, group),
        ConstraintKind::Perpendicular => sys.add_perpendicular(h(0), h(1), wrkpln, group),
        ConstraintKind::Parallel => sys.add_parallel(h(0), h(1), wrkpln, group),
        ConstraintKind::Colinear => {
            let p1 = match &built[0] {
                BuiltEntity::Line { p1, .. } => *p1,
                _ => unreachable!(),
            };
            let parallel = sys.add_parallel(h(0), h(1), wrkpln, group);
            let on_line = sys.add_point_on_line(p1, h(1), wrkpln, group);
            debug!("{} colinear: {:?}", decl.cstr_name(), (parallel, on_line));
            return Ok(vec![parallel, on_line]);
        }
        ConstraintKind::WhereDragged => sys.add_where_dragged(h(0), wrkpln, group),
        ConstraintKind::Locked
        | ConstraintKind::PlaneCoincident
        | ConstraintKind::PlaneAlignment
        | ConstraintKind::AxialAlignment
        | ConstraintKind::SameOrientation
        | ConstraintKind::MultiParallel => unreachable!("handled by composite drivers"),
    };
    debug!("{} constraint: {:?}", decl.cstr_name(), handle);
    Ok(vec![handle])
}

/// The owning part's own XY frame, or the session helper plane as a last
/// resort, for kinds that need a workplane but were authored without one.
fn sess_plane<S: System, D: HostDocument + ?Sized>(
    sess: &mut Session<'_, S, D>,
    info: &ElementInfo,
) -> EntityHandle {
    sess.part_basis_plane(&info.part)
        .unwrap_or(sess.helpers.plane_xy)
}
