//! Constraint multiplier: expands one authored constraint across every
//! instance of a link array.
//!
//! Matching is sticky: the instance-to-target correspondence of the previous
//! solve is preferred whenever an instance still sits on its old target, and
//! only the remainder is re-matched greedily by distance. That damps index
//! churn when the user re-authors the constraint with elements selected in a
//! different order.

use super::ConstraintDecl;
use crate::adapter::{ElementInfo, HostDocument, ObjectId, PartId};
use crate::geometry::{axis_angle_between, dist_sq, Placement, Point3, Rotation};
use crate::solver::SolverError;
use nalgebra as na;
use std::collections::HashMap;
use tracing::{debug, info};

/// Instances farther than this from their matched target get an initial
/// placement snapped before the solver refines them. Empirical and
/// scale-dependent; kept verbatim from the source.
pub const SNAP_DISTANCE: f64 = 5.0;

/// Orientation mismatch beyond which an instance is snapped, in degrees.
pub const SNAP_ANGLE_DEG: f64 = 45.0;

/// Position error under which the previous solve's assignment is reused.
pub const MATCH_EPSILON: f64 = 1e-7;

/// Remembered multiplier state, owned by the solver context and carried
/// across solves.
#[derive(Debug, Default)]
pub struct MultiplierMemory {
    /// Per constraint: target index → assigned array instance index.
    assignments: HashMap<ObjectId, Vec<usize>>,
    /// Per constraint: observed offset between a target's element frame and
    /// its instance placement, reused when snapping new instances.
    reference_offsets: HashMap<ObjectId, Placement>,
}

impl MultiplierMemory {
    pub fn assignment(&self, cstr: ObjectId) -> Option<&[usize]> {
        self.assignments.get(&cstr).map(|v| v.as_slice())
    }

    pub fn remember(&mut self, cstr: ObjectId, assignment: Vec<usize>) {
        self.assignments.insert(cstr, assignment);
    }

    pub fn reference_offset(&self, cstr: ObjectId) -> Option<&Placement> {
        self.reference_offsets.get(&cstr)
    }

    pub fn remember_offset(&mut self, cstr: ObjectId, offset: Placement) {
        self.reference_offsets.insert(cstr, offset);
    }
}

/// One matched target with its world frame.
#[derive(Debug, Clone)]
struct Target {
    info: ElementInfo,
    pos: Point3,
    rot: Rotation,
}

/// Result of expanding one multiplied constraint.
#[derive(Debug)]
pub struct Expansion {
    /// Element pairs to translate: (array instance element, target element).
    pub pairs: Vec<(ElementInfo, ElementInfo)>,
    /// Target index → instance index, to be remembered after the solve.
    pub assignment: Vec<usize>,
    /// Element count the array must publish (grow-only), if it changed.
    pub grown_count: Option<usize>,
    /// Instances snapped to an initial placement before solving.
    pub snapped: Vec<(PartId, Placement)>,
    /// Instances left over beyond the matched targets; they follow their
    /// representative's movement after write-back.
    pub siblings: Vec<usize>,
}

/// Expand `decl` across the instances of the array its first element lives
/// on. `first` is the resolved first element, `rest` the remaining ones.
pub fn expand<D: HostDocument + ?Sized>(
    doc: &D,
    memory: &MultiplierMemory,
    decl: &ConstraintDecl,
    first: &ElementInfo,
    rest: &[ElementInfo],
) -> Result<Expansion, SolverError> {
    let array = first
        .part
        .array()
        .ok_or_else(|| SolverError::NotAnArray {
            name: decl.cstr_name(),
        })?;

    let targets = collect_targets(rest);
    let required = targets.len();

    // grow, never shrink, the published element count
    let published = doc.array_count(array);
    let grown_count = if required > published {
        info!(
            "{} grows array element count {} -> {}",
            decl.cstr_name(),
            published,
            required
        );
        Some(required)
    } else {
        None
    };

    // per-instance characteristic point of the first child's element
    let placements = doc.array_placements(array);
    let local_pos = first.shape.pos();
    let local_rot = first.shape.rotation();
    let positions: Vec<Point3> = placements.iter().map(|pla| pla * local_pos).collect();

    let assignment = match_targets(memory.assignment(decl.id), &positions, &targets);

    // local frame of the element within one instance
    let local_frame = Placement::from_parts(na::Translation3::from(local_pos.coords), local_rot);

    let mut pairs = Vec::with_capacity(required);
    let mut snapped = Vec::new();
    for (t, target) in targets.iter().enumerate() {
        let instance = assignment[t];
        let part = PartId::ArrayInstance {
            array,
            index: instance,
        };
        let target_frame =
            Placement::from_parts(na::Translation3::from(target.pos.coords), target.rot);

        let placement = match placements.get(instance) {
            Some(pla) => {
                let distance = na::distance(&(pla * local_pos), &target.pos);
                let angle =
                    axis_angle_between(&(pla.rotation * local_rot), &target.rot).to_degrees();
                if distance > SNAP_DISTANCE || angle > SNAP_ANGLE_DEG {
                    let snap = match memory.reference_offset(decl.id) {
                        Some(offset) => target_frame * offset,
                        None => target_frame * local_frame.inverse(),
                    };
                    debug!(
                        "{} snap instance {} (d={:.3}, a={:.1})",
                        decl.cstr_name(),
                        instance,
                        distance,
                        angle
                    );
                    snapped.push((part, snap));
                    snap
                } else {
                    // close enough, the solver takes it from here
                    *pla
                }
            }
            None => {
                // brand new instance, place it straight on its target
                let snap = match memory.reference_offset(decl.id) {
                    Some(offset) => target_frame * offset,
                    None => target_frame * local_frame.inverse(),
                };
                snapped.push((part, snap));
                snap
            }
        };

        let mut instance_info = first.clone();
        instance_info.part = part;
        instance_info.part_name = format!("{}.{}", first.part_name, instance);
        instance_info.placement = placement;
        pairs.push((instance_info, target.info.clone()));
    }

    let total = required.max(published).max(placements.len());
    let siblings = (0..total)
        .filter(|i| !assignment.contains(i))
        .collect();

    Ok(Expansion {
        pairs,
        assignment,
        grown_count,
        snapped,
        siblings,
    })
}

/// Probe the non-reference elements: coplanar circular edges of equal
/// radius referencing the same physical edge collapse into one target.
fn collect_targets(rest: &[ElementInfo]) -> Vec<Target> {
    let mut targets: Vec<Target> = Vec::new();
    for info in rest {
        let pos = info.world_pos();
        let rot = info.world_rotation();
        let radius = match info.shape.circular() {
            Some(crate::adapter::Circular::Radius(r)) => Some(r),
            _ => None,
        };
        let duplicate = targets.iter().any(|t| {
            if t.info.part != info.part {
                return false;
            }
            let same_radius = match (radius, t.info.shape.circular()) {
                (Some(a), Some(crate::adapter::Circular::Radius(b))) => {
                    (a - b).abs() < MATCH_EPSILON
                }
                (None, _) => true,
                _ => false,
            };
            same_radius && dist_sq(&t.pos, &pos) < MATCH_EPSILON * MATCH_EPSILON
        });
        if duplicate {
            continue;
        }
        targets.push(Target {
            info: info.clone(),
            pos,
            rot,
        });
    }
    targets
}

/// Match instances to targets: keep the previous assignment where it still
/// fits, greedy nearest-neighbor over a sorted distance table for the rest.
fn match_targets(
    previous: Option<&[usize]>,
    positions: &[Point3],
    targets: &[Target],
) -> Vec<usize> {
    let n = targets.len();
    let mut assignment = vec![usize::MAX; n];
    let mut used = vec![false; positions.len().max(n)];

    if let Some(prev) = previous {
        for (t, target) in targets.iter().enumerate() {
            let Some(&i) = prev.get(t) else { continue };
            if i < positions.len()
                && !used.get(i).copied().unwrap_or(true)
                && dist_sq(&positions[i], &target.pos) < MATCH_EPSILON * MATCH_EPSILON
            {
                assignment[t] = i;
                used[i] = true;
            }
        }
    }

    // distance table over everything still unmatched
    let mut table: Vec<(f64, usize, usize)> = Vec::new();
    for (t, target) in targets.iter().enumerate() {
        if assignment[t] != usize::MAX {
            continue;
        }
        for (i, pos) in positions.iter().enumerate() {
            if !used[i] {
                table.push((dist_sq(pos, &target.pos), i, t));
            }
        }
    }
    table.sort_by(|a, b| a.0.total_cmp(&b.0));
    for (_, i, t) in table {
        if assignment[t] == usize::MAX && !used[i] {
            assignment[t] = i;
            used[i] = true;
        }
    }

    // targets beyond the instance list get fresh indices
    let mut next = positions.len();
    for slot in assignment.iter_mut() {
        if *slot == usize::MAX {
            while used.get(next).copied().unwrap_or(false) {
                next += 1;
            }
            *slot = next;
            next += 1;
        }
    }
    assignment
}
