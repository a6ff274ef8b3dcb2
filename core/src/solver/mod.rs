//! Solver orchestrator.
//!
//! Drives one full solve per assembly: resolves the fixed parts, lazily
//! materializes per-part solver state, translates every active constraint
//! through the registry, invokes the backend, and writes solved placements
//! back to the host with rollback on failure.

use crate::adapter::{
    AdapterError, ElementInfo, ElementRef, ElementShape, HostDocument, ObjectId, PartId,
};
use crate::constraint::entities::{self, BuiltEntity, EntityTag};
use crate::constraint::multiplier::{self, Expansion, MultiplierMemory};
use crate::constraint::redundancy::{RedundancyClass, RedundancyTracker, Verdict};
use crate::constraint::{self, translate, ConstraintDecl, EntitySlot, ValidationError};
use crate::geometry::{
    is_same_placement, placement_from_params, placement_params, Placement, Point3, Vector3,
    PLACEMENT_TOL,
};
use crate::system::{
    ConstraintHandle, EntityHandle, GroupId, ParamHandle, SolveStatus, System, TransformParams,
};
use nalgebra as na;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[cfg(test)]
mod tests_common;
#[cfg(test)]
mod tests_session;

/// Group holding the solved unknowns.
pub const GROUP_SOLVE: GroupId = GroupId(1);
/// Group holding fixed parameters and frozen reference entities.
pub const GROUP_FIXED: GroupId = GroupId(2);
/// Constraint groups are allocated from here on, one per constraint, so a
/// failed backend handle can be attributed by group alone.
const FIRST_CONSTRAINT_GROUP: u32 = 3;

#[derive(Debug, Error)]
pub enum SolverError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Adapter(#[from] AdapterError),

    #[error("constraint {name} is not supported by the solver backend")]
    Unsupported { name: String },

    #[error("constraint {name} must reference a link array to multiply")]
    NotAnArray { name: String },

    #[error("solver busy, nested solve rejected")]
    Reentrancy,

    #[error("failed to solve {assembly}: {status} [{}]", .constraints.join(", "))]
    SolveFailure {
        assembly: String,
        status: SolveStatus,
        constraints: Vec<String>,
    },
}

/// One recorded host mutation, replayed in reverse on failure.
#[derive(Debug, Clone)]
pub enum Mutation {
    Placement { part: PartId, previous: Placement },
    Points {
        part: PartId,
        previous: Vec<(usize, Point3)>,
    },
    ArrayCount { array: ObjectId, previous: usize },
}

/// Undo log for one solve invocation. The caller owns it; when supplied,
/// every host mutation is recorded before it is applied.
#[derive(Debug, Default)]
pub struct RollbackLog {
    entries: Vec<Mutation>,
}

impl RollbackLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn record(&mut self, mutation: Mutation) {
        self.entries.push(mutation);
    }

    /// Undo every mutation recorded at or after `mark`, newest first, and
    /// drop them from the log.
    pub fn replay<D: HostDocument + ?Sized>(&mut self, doc: &mut D, mark: usize) {
        while self.entries.len() > mark {
            match self.entries.pop() {
                Some(Mutation::Placement { part, previous }) => doc.set_placement(&part, previous),
                Some(Mutation::Points { part, previous }) => {
                    doc.set_point_positions(&part, &previous)
                }
                Some(Mutation::ArrayCount { array, previous }) => {
                    doc.set_array_count(array, previous)
                }
                None => break,
            }
        }
    }
}

fn record(log: &mut Option<&mut RollbackLog>, mutation: Mutation) {
    if let Some(log) = log {
        log.record(mutation);
    }
}

/// Solver-side parametrization of one part.
#[derive(Debug)]
pub enum PartParams {
    /// Rigid part: seven shared transform parameters.
    Transform(TransformParams),
    /// Free-form wire: three parameters per touched vertex, each vertex its
    /// own unknown.
    Pointwise(HashMap<usize, [ParamHandle; 3]>),
}

/// The part's own coordinate frame as solver entities.
#[derive(Debug, Clone, Copy)]
pub struct PartBasis {
    pub workplane: EntityHandle,
    pub origin: EntityHandle,
    pub normal: EntityHandle,
}

/// Per-part state for the lifetime of one solve session.
#[derive(Debug)]
pub struct PartInfo {
    pub part: PartId,
    pub name: String,
    /// Placement snapshot taken when the part first joined the session.
    pub placement: Placement,
    pub params: PartParams,
    /// `None` for pointwise parts.
    pub basis: Option<PartBasis>,
    /// Entity cache: identical `(subpath, kind)` never rebuilds.
    pub entity_map: HashMap<(String, EntityTag), BuiltEntity>,
    pub group: GroupId,
    /// Wire part held in place per point rather than by transform.
    pub pinned: bool,
    /// Deferred multiplicity updates: array element counts to publish before
    /// the solve runs.
    pub update: Vec<(ObjectId, usize)>,
}

/// Convenience entities created once per session: zero/one scalars, the
/// world origin and the global XY plane.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SessionHelpers {
    #[allow(dead_code)]
    pub zero: ParamHandle,
    #[allow(dead_code)]
    pub one: ParamHandle,
    pub origin: EntityHandle,
    pub plane_xy: EntityHandle,
}

/// One backend session over one assembly.
pub struct Session<'a, S: System, D: HostDocument + ?Sized> {
    pub(crate) system: S,
    pub(crate) doc: &'a mut D,
    pub(crate) part_map: HashMap<PartId, PartInfo>,
    pub(crate) fixed_parts: HashSet<PartId>,
    pub(crate) tracker: RedundancyTracker,
    pub(crate) helpers: SessionHelpers,
    /// Returned backend handle → active-constraint index.
    pub(crate) cstr_map: HashMap<ConstraintHandle, usize>,
    /// Constraint group → active-constraint index, the attribution fallback.
    pub(crate) group_map: HashMap<GroupId, usize>,
}

impl<'a, S: System, D: HostDocument + ?Sized> Session<'a, S, D> {
    fn new(mut system: S, doc: &'a mut D, relax: bool, fixed_parts: HashSet<PartId>) -> Self {
        let zero = system.add_param(0.0, GROUP_FIXED);
        let one = system.add_param(1.0, GROUP_FIXED);
        let origin = system.add_point3d(zero, zero, zero, GROUP_FIXED);
        let identity = system.add_normal3d(one, zero, zero, zero, GROUP_FIXED);
        let plane_xy = system.add_workplane(origin, identity, GROUP_FIXED);
        Self {
            system,
            doc,
            part_map: HashMap::new(),
            fixed_parts,
            tracker: RedundancyTracker::new(relax),
            helpers: SessionHelpers {
                zero,
                one,
                origin,
                plane_xy,
            },
            cstr_map: HashMap::new(),
            group_map: HashMap::new(),
        }
    }

    pub(crate) fn is_fixed(&self, part: &PartId) -> bool {
        self.fixed_parts.contains(part)
    }

    /// Materialize the part's solver state on first touch.
    pub(crate) fn ensure_part(&mut self, info: &ElementInfo) -> Result<(), SolverError> {
        if self.part_map.contains_key(&info.part) {
            return Ok(());
        }
        let fixed = self.fixed_parts.contains(&info.part);
        let (group, pinned) = if info.pointwise {
            (GROUP_SOLVE, fixed)
        } else if fixed {
            (GROUP_FIXED, false)
        } else {
            (GROUP_SOLVE, false)
        };
        let (params, basis) = if info.pointwise {
            (PartParams::Pointwise(HashMap::new()), None)
        } else {
            let vals = placement_params(&info.placement);
            let params: TransformParams = [
                self.system.add_param(vals[0], group),
                self.system.add_param(vals[1], group),
                self.system.add_param(vals[2], group),
                self.system.add_param(vals[3], group),
                self.system.add_param(vals[4], group),
                self.system.add_param(vals[5], group),
                self.system.add_param(vals[6], group),
            ];
            let origin = self
                .system
                .add_point3d(params[0], params[1], params[2], group);
            let normal = self
                .system
                .add_normal3d(params[3], params[4], params[5], params[6], group);
            let workplane = self.system.add_workplane(origin, normal, group);
            (
                PartParams::Transform(params),
                Some(PartBasis {
                    workplane,
                    origin,
                    normal,
                }),
            )
        };
        debug!(part = %info.part_name, ?group, pinned, "new part info");
        self.part_map.insert(
            info.part,
            PartInfo {
                part: info.part,
                name: info.part_name.clone(),
                placement: info.placement,
                params,
                basis,
                entity_map: HashMap::new(),
                group,
                pinned,
                update: Vec::new(),
            },
        );
        Ok(())
    }

    /// Build (or fetch) the solver entity a slot asks for.
    pub(crate) fn build_entity(
        &mut self,
        info: &ElementInfo,
        slot: EntitySlot,
    ) -> Result<BuiltEntity, SolverError> {
        self.ensure_part(info)?;
        let part = match self.part_map.get_mut(&info.part) {
            Some(part) => part,
            None => unreachable!("part was just ensured"),
        };
        entities::build(&mut self.system, part, slot, info, GROUP_FIXED).map_err(SolverError::from)
    }

    pub(crate) fn part_basis_plane(&self, part: &PartId) -> Option<EntityHandle> {
        self.part_map
            .get(part)
            .and_then(|p| p.basis.as_ref())
            .map(|b| b.workplane)
    }

    pub(crate) fn count_redundancy(
        &mut self,
        class: RedundancyClass,
        increment: usize,
        decl: &ConstraintDecl,
        e1: &ElementInfo,
        e2: &ElementInfo,
        implicit: bool,
    ) -> Verdict {
        let r1 = ElementRef::new(e1.object, e1.subpath.clone());
        let r2 = ElementRef::new(e2.object, e2.subpath.clone());
        self.tracker
            .count(class, increment, decl.id, &r1, &r2, e1.part, e2.part, implicit)
    }

    /// Line through an element's origin along one of its workplane axes,
    /// rigid with the owning part. Used by the degraded coincidence form.
    pub(crate) fn axis_line(
        &mut self,
        info: &ElementInfo,
        origin: EntityHandle,
        axis: Vector3,
    ) -> Result<Option<EntityHandle>, SolverError> {
        self.ensure_part(info)?;
        let part = match self.part_map.get_mut(&info.part) {
            Some(part) => part,
            None => unreachable!("part was just ensured"),
        };
        let group = part.group;
        match entities::axis_point(&mut self.system, part, info, axis, GROUP_FIXED) {
            Some(second) => Ok(Some(self.system.add_line_segment(origin, second, group))),
            None => Ok(None),
        }
    }
}

/// Tuning knobs of one top-level solve call.
#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Expand the target set to dependent assemblies, dependency order.
    pub recursive: bool,
    /// Gather failed-constraint details from the backend on failure.
    pub report_failed: bool,
    /// Ask the host to recompute around each pass.
    pub recompute: bool,
    /// Degrade redundant constraints instead of skipping them.
    pub auto_relax: bool,
    /// Part being interactively dragged, biases the backend best-effort.
    pub drag_part: Option<PartId>,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            recursive: true,
            report_failed: true,
            recompute: true,
            auto_relax: false,
            drag_part: None,
        }
    }
}

/// Long-lived engine state shared across solves: the reentrancy flag, the
/// part→assembly registry the host uses for auto-solve triggering, and the
/// multiplier's remembered correspondences.
#[derive(Debug, Default)]
pub struct SolverContext {
    busy: AtomicBool,
    fixed_parts: HashSet<PartId>,
    drag_part: Option<PartId>,
    part_assemblies: HashMap<PartId, Vec<ObjectId>>,
    multiplier: MultiplierMemory,
}

impl SolverContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the part served as ground reference in the last pass.
    pub fn is_fixed_part(&self, part: &PartId) -> bool {
        self.fixed_parts.contains(part)
    }

    /// Whether the element's owning part is fixed.
    pub fn is_fixed_element<D: HostDocument + ?Sized>(
        &self,
        doc: &D,
        element: &ElementRef,
    ) -> bool {
        doc.resolve(element)
            .map(|info| self.fixed_parts.contains(&info.part))
            .unwrap_or(false)
    }

    pub fn get_drag_part(&self) -> Option<PartId> {
        self.drag_part
    }

    /// Assemblies a part participates in, from the last solve.
    pub fn assemblies_of(&self, part: &PartId) -> &[ObjectId] {
        self.part_assemblies
            .get(part)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }
}

/// Solve a set of assemblies. The single entry point exposed to the host.
///
/// With an empty `targets` slice every assembly in the document is solved.
/// A rollback log, when supplied, records every mutation and is replayed in
/// reverse if a pass fails; without one, state may be left partially
/// applied.
pub fn solve<S, D>(
    ctx: &mut SolverContext,
    doc: &mut D,
    targets: &[ObjectId],
    opts: &SolveOptions,
    mut rollback: Option<&mut RollbackLog>,
) -> Result<(), SolverError>
where
    S: System + Default,
    D: HostDocument + ?Sized,
{
    if ctx.busy.swap(true, Ordering::SeqCst) {
        return Err(SolverError::Reentrancy);
    }
    let result = solve_impl::<S, D>(ctx, doc, targets, opts, rollback.as_deref_mut());
    ctx.busy.store(false, Ordering::SeqCst);
    result
}

fn solve_impl<S, D>(
    ctx: &mut SolverContext,
    doc: &mut D,
    targets: &[ObjectId],
    opts: &SolveOptions,
    mut rollback: Option<&mut RollbackLog>,
) -> Result<(), SolverError>
where
    S: System + Default,
    D: HostDocument + ?Sized,
{
    let mut targets: Vec<ObjectId> = if targets.is_empty() {
        doc.assemblies()
    } else {
        targets.to_vec()
    };
    if targets.is_empty() {
        error!("no assembly found");
        return Ok(());
    }
    if opts.recompute {
        doc.recompute(&targets);
    }
    if opts.recursive {
        targets = dependency_order(doc, &targets);
    }

    ctx.part_assemblies.clear();
    for &assembly in &targets {
        for part in doc.assembly_parts(assembly) {
            ctx.part_assemblies.entry(part).or_default().push(assembly);
        }
    }
    ctx.drag_part = opts.drag_part;

    for &assembly in &targets {
        debug!(%assembly, "solving assembly");
        solve_assembly::<S, D>(ctx, doc, assembly, opts, rollback.as_deref_mut())?;
        if opts.recompute {
            doc.recompute(&[assembly]);
        }
    }
    Ok(())
}

/// Dependencies before dependents, each assembly once.
fn dependency_order<D: HostDocument + ?Sized>(doc: &D, targets: &[ObjectId]) -> Vec<ObjectId> {
    fn visit<D: HostDocument + ?Sized>(
        doc: &D,
        id: ObjectId,
        seen: &mut HashSet<ObjectId>,
        out: &mut Vec<ObjectId>,
    ) {
        if !seen.insert(id) {
            return;
        }
        for dep in doc.assembly_deps(id) {
            visit(doc, dep, seen, out);
        }
        out.push(id);
    }
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for &id in targets {
        visit(doc, id, &mut seen, &mut out);
    }
    out
}

fn solve_assembly<S, D>(
    ctx: &mut SolverContext,
    doc: &mut D,
    assembly: ObjectId,
    opts: &SolveOptions,
    mut rollback: Option<&mut RollbackLog>,
) -> Result<(), SolverError>
where
    S: System + Default,
    D: HostDocument + ?Sized,
{
    // cheap precondition check, the only cancellation point
    let active: Vec<ConstraintDecl> = doc
        .assembly_constraints(assembly)
        .into_iter()
        .filter(|c| !c.disabled)
        .collect();
    if active.is_empty() {
        debug!(%assembly, "no constraint found in assembly");
        return Ok(());
    }
    if doc.assembly_parts(assembly).len() <= 1 {
        debug!(%assembly, "not enough parts");
        return Ok(());
    }

    let mark = rollback.as_ref().map(|log| log.len()).unwrap_or(0);
    match run_pass::<S, D>(ctx, doc, assembly, &active, opts, rollback.as_deref_mut()) {
        Ok(()) => Ok(()),
        Err(err) => {
            if let Some(log) = rollback {
                debug!(%assembly, "rolling back after failure");
                log.replay(doc, mark);
            }
            Err(err)
        }
    }
}

fn run_pass<S, D>(
    ctx: &mut SolverContext,
    doc: &mut D,
    assembly: ObjectId,
    active: &[ConstraintDecl],
    opts: &SolveOptions,
    mut rollback: Option<&mut RollbackLog>,
) -> Result<(), SolverError>
where
    S: System + Default,
    D: HostDocument + ?Sized,
{
    // --- fixed part resolution
    let mut fixed: HashSet<PartId> = HashSet::new();
    for decl in active {
        if !decl.kind.can_fix_parts() {
            continue;
        }
        for element in &decl.elements {
            match doc.resolve(element) {
                Ok(info) => {
                    debug!("lock part {}", info.part_name);
                    fixed.insert(info.part);
                }
                Err(err) => error!("{}: {}", decl.cstr_name(), err),
            }
        }
    }
    if fixed.is_empty() {
        if let Some(element) = active.first().and_then(|d| d.elements.first()) {
            let info = doc.resolve(element)?;
            debug!("lock first part {}", info.part_name);
            fixed.insert(info.part);
        }
    }
    ctx.fixed_parts = fixed.clone();

    let mut sess = Session::new(S::default(), doc, opts.auto_relax, fixed);

    // --- prepare constraints, locked kinds first
    let mut order: Vec<usize> = (0..active.len())
        .filter(|&i| active[i].kind.can_fix_parts())
        .collect();
    order.extend((0..active.len()).filter(|&i| !active[i].kind.can_fix_parts()));

    let mut expansions: Vec<(usize, Expansion)> = Vec::new();
    let mut next_group = FIRST_CONSTRAINT_GROUP;
    for idx in order {
        let decl = &active[idx];
        let group = GroupId(next_group);
        next_group += 1;
        sess.group_map.insert(group, idx);
        debug!("preparing {}", decl.cstr_name());
        match prepare_one(&mut sess, decl, group, &ctx.multiplier, &mut rollback) {
            Ok((handles, expansion)) => {
                for handle in handles {
                    sess.cstr_map.insert(handle, idx);
                }
                if let Some(expansion) = expansion {
                    expansions.push((idx, expansion));
                }
            }
            // locally recoverable: keep the rest of the assembly solvable
            Err(SolverError::Unsupported { name }) => {
                warn!("skip unsupported constraint {}", name);
            }
            Err(SolverError::Validation(err)) => {
                error!("{}", err);
            }
            Err(SolverError::Adapter(err)) => {
                error!("{}: {}", decl.cstr_name(), err);
            }
            Err(other) => return Err(other),
        }
    }

    // --- deferred multiplicity updates
    let pending: Vec<(ObjectId, usize)> = sess
        .part_map
        .values()
        .flat_map(|p| p.update.iter().copied())
        .collect();
    for (array, count) in pending {
        let previous = sess.doc.array_count(array);
        if count > previous {
            record(&mut rollback, Mutation::ArrayCount { array, previous });
            sess.doc.set_array_count(array, count);
        }
    }

    // --- drag bias, best effort
    if let Some(part) = opts.drag_part {
        if let Some(info) = sess.part_map.get(&part) {
            if info.group == GROUP_SOLVE {
                if let Some(basis) = info.basis {
                    sess.system.set_dragged(basis.origin);
                }
            }
        }
    }

    // --- solve
    let status = sess.system.solve(GROUP_SOLVE, opts.report_failed);
    match status {
        SolveStatus::Converged => {}
        SolveStatus::Redundant => {
            // the backend flagged redundancy but still produced a solution
            warn!(%assembly, "backend detected redundant constraints");
        }
        _ => {
            let mut names: Vec<String> = Vec::new();
            for handle in sess.system.failed() {
                let idx = sess.cstr_map.get(&handle).copied().or_else(|| {
                    sess.system
                        .constraint_group(handle)
                        .and_then(|g| sess.group_map.get(&g).copied())
                });
                match idx {
                    Some(i) => {
                        let name = active[i].cstr_name();
                        if !names.contains(&name) {
                            names.push(name);
                        }
                    }
                    None => error!("failed constraint in unexpected group"),
                }
            }
            if opts.report_failed && !names.is_empty() {
                error!("list of failed constraints: {}", names.join(", "));
            }
            return Err(SolverError::SolveFailure {
                assembly: assembly.to_string(),
                status,
                constraints: names,
            });
        }
    }
    debug!("done solving, dof {}", sess.system.dof());

    // --- write back, deterministic order
    let mut part_ids: Vec<PartId> = sess.part_map.keys().copied().collect();
    part_ids.sort();
    for part in part_ids {
        let info = match sess.part_map.get(&part) {
            Some(info) => info,
            None => continue,
        };
        if info.group != GROUP_SOLVE {
            continue;
        }
        match &info.params {
            PartParams::Transform(params) => {
                let vals = [
                    sess.system.param_value(params[0]),
                    sess.system.param_value(params[1]),
                    sess.system.param_value(params[2]),
                    sess.system.param_value(params[3]),
                    sess.system.param_value(params[4]),
                    sess.system.param_value(params[5]),
                    sess.system.param_value(params[6]),
                ];
                let solved = placement_from_params(&vals);
                if is_same_placement(&info.placement, &solved) {
                    debug!("not moving {}", info.name);
                    continue;
                }
                debug!("moving {}", info.name);
                record(
                    &mut rollback,
                    Mutation::Placement {
                        part,
                        previous: info.placement,
                    },
                );
                sess.doc.set_placement(&part, solved);
            }
            PartParams::Pointwise(points) => {
                let inverse = info.placement.inverse();
                let current = sess.doc.wire_points(&part).unwrap_or_default();
                let mut indices: Vec<usize> = points.keys().copied().collect();
                indices.sort_unstable();
                let mut changed = Vec::new();
                let mut previous = Vec::new();
                for index in indices {
                    let params = points[&index];
                    let world = Point3::new(
                        sess.system.param_value(params[0]),
                        sess.system.param_value(params[1]),
                        sess.system.param_value(params[2]),
                    );
                    let local = inverse * world;
                    match current.get(index) {
                        Some(old) if na::distance(old, &local) < PLACEMENT_TOL => continue,
                        Some(old) => previous.push((index, *old)),
                        None => {}
                    }
                    changed.push((index, local));
                }
                if changed.is_empty() {
                    debug!("not moving {}", info.name);
                    continue;
                }
                debug!("moving {} points of {}", changed.len(), info.name);
                record(&mut rollback, Mutation::Points { part, previous });
                sess.doc.set_point_positions(&part, &changed);
            }
        }
    }

    // --- multiplied siblings follow their representative
    for (idx, expansion) in &expansions {
        let decl = &active[*idx];
        let Some((representative, target)) = expansion.pairs.first() else {
            continue;
        };
        let Some(array) = representative.part.array() else {
            continue;
        };
        let solved = sess
            .doc
            .part_placement(&representative.part)
            .unwrap_or(representative.placement);
        let delta = solved * representative.placement.inverse();
        for &index in &expansion.siblings {
            let part = PartId::ArrayInstance { array, index };
            if let Some(previous) = sess.doc.part_placement(&part) {
                let moved = delta * previous;
                if !is_same_placement(&previous, &moved) {
                    record(&mut rollback, Mutation::Placement { part, previous });
                    sess.doc.set_placement(&part, moved);
                }
            }
        }
        ctx.multiplier
            .remember(decl.id, expansion.assignment.clone());
        let target_frame = Placement::from_parts(
            na::Translation3::from(target.world_pos().coords),
            target.world_rotation(),
        );
        ctx.multiplier
            .remember_offset(decl.id, target_frame.inverse() * solved);
    }

    info!(%assembly, "assembly solved");
    Ok(())
}

/// Resolve, check and translate one constraint. Multiplied constraints go
/// through the multiplier first and re-enter the registry per matched pair.
fn prepare_one<S, D>(
    sess: &mut Session<'_, S, D>,
    decl: &ConstraintDecl,
    group: GroupId,
    memory: &MultiplierMemory,
    rollback: &mut Option<&mut RollbackLog>,
) -> Result<(Vec<ConstraintHandle>, Option<Expansion>), SolverError>
where
    S: System,
    D: HostDocument + ?Sized,
{
    let mut infos: Vec<ElementInfo> = Vec::with_capacity(decl.elements.len());
    for element in &decl.elements {
        infos.push(sess.doc.resolve(element)?);
    }
    let shapes: Vec<&ElementShape> = infos.iter().map(|i| &i.shape).collect();
    let multiplied = decl.props.multiply
        && infos
            .first()
            .map(|i| i.part.array().is_some())
            .unwrap_or(false);
    if multiplied {
        constraint::check_multiplied(decl.kind, &decl.cstr_name(), &shapes)?;
    } else {
        constraint::check(decl.kind, &decl.cstr_name(), &shapes)?;
    }
    if !multiplied {
        let handles = translate::prepare(sess, decl, &infos, group)?;
        return Ok((handles, None));
    }

    let (first, rest) = match infos.split_first() {
        Some(split) => split,
        None => unreachable!("checked arity above"),
    };
    let expansion = multiplier::expand(sess.doc, memory, decl, first, rest)?;

    // snap badly placed instances before the solver sees them
    for (part, placement) in &expansion.snapped {
        if let Some(previous) = sess.doc.part_placement(part) {
            record(
                rollback,
                Mutation::Placement {
                    part: *part,
                    previous,
                },
            );
        }
        sess.doc.set_placement(part, *placement);
    }

    let handles = translate::prepare_pairs(sess, decl, &expansion.pairs, group)?;

    // defer the element-count publication to just before the solve
    if let Some(count) = expansion.grown_count {
        if let Some((instance, _)) = expansion.pairs.first() {
            sess.ensure_part(instance)?;
            if let (Some(array), Some(part)) =
                (instance.part.array(), sess.part_map.get_mut(&instance.part))
            {
                part.update.push((array, count));
            }
        }
    }
    Ok((handles, Some(expansion)))
}
