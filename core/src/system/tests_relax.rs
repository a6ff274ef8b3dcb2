use super::*;
use crate::geometry::{placement_params, Placement, Point3, Rotation, Vector3};
use approx::assert_relative_eq;

const FIXED: GroupId = GroupId(2);
const MOVE: GroupId = GroupId(1);

fn add_part(sys: &mut RelaxationSystem, pla: &Placement, group: GroupId) -> TransformParams {
    let vals = placement_params(pla);
    [
        sys.add_param(vals[0], group),
        sys.add_param(vals[1], group),
        sys.add_param(vals[2], group),
        sys.add_param(vals[3], group),
        sys.add_param(vals[4], group),
        sys.add_param(vals[5], group),
        sys.add_param(vals[6], group),
    ]
}

fn add_tpoint(
    sys: &mut RelaxationSystem,
    params: &TransformParams,
    local: Point3,
    group: GroupId,
) -> EntityHandle {
    // base point values are constants, they live in the fixed group
    let base = sys.add_point3d_v(local, FIXED);
    sys.add_transform(base, params, group)
}

fn add_tnormal(
    sys: &mut RelaxationSystem,
    params: &TransformParams,
    local: &Rotation,
    group: GroupId,
) -> EntityHandle {
    let base = sys.add_normal3d_v(local, FIXED);
    sys.add_transform(base, params, group)
}

fn part_placement(sys: &RelaxationSystem, params: &TransformParams) -> Placement {
    let vals = [
        sys.param_value(params[0]),
        sys.param_value(params[1]),
        sys.param_value(params[2]),
        sys.param_value(params[3]),
        sys.param_value(params[4]),
        sys.param_value(params[5]),
        sys.param_value(params[6]),
    ];
    crate::geometry::placement_from_params(&vals)
}

#[test]
fn test_coincident_translates_movable_part() {
    let mut sys = RelaxationSystem::new();
    let fixed = add_part(&mut sys, &Placement::identity(), FIXED);
    let movable = add_part(&mut sys, &Placement::translation(10.0, 4.0, -2.0), MOVE);

    let pa = add_tpoint(&mut sys, &fixed, Point3::new(1.0, 0.0, 0.0), MOVE);
    let pb = add_tpoint(&mut sys, &movable, Point3::new(0.0, 0.0, 0.0), MOVE);
    sys.add_points_coincident(pa, pb, None, MOVE);

    assert_eq!(sys.solve(MOVE, true), SolveStatus::Converged);

    let pla = part_placement(&sys, &movable);
    let solved = pla * Point3::new(0.0, 0.0, 0.0);
    assert_relative_eq!(solved.x, 1.0, epsilon = 1e-7);
    assert_relative_eq!(solved.y, 0.0, epsilon = 1e-7);
    assert_relative_eq!(solved.z, 0.0, epsilon = 1e-7);

    // fixed part parameters must be untouched
    let fixed_pla = part_placement(&sys, &fixed);
    assert!(crate::geometry::is_same_placement(&fixed_pla, &Placement::identity()));
}

#[test]
fn test_parallel_aligns_normals() {
    let mut sys = RelaxationSystem::new();
    let fixed = add_part(&mut sys, &Placement::identity(), FIXED);
    let tilt = Placement::from_parts(
        nalgebra::Translation3::new(0.0, 0.0, 0.0),
        Rotation::from_euler_angles(0.4, 0.0, 0.0),
    );
    let movable = add_part(&mut sys, &tilt, MOVE);

    let na_ = add_tnormal(&mut sys, &fixed, &Rotation::identity(), MOVE);
    let nb = add_tnormal(&mut sys, &movable, &Rotation::identity(), MOVE);
    sys.add_parallel(na_, nb, None, MOVE);

    assert_eq!(sys.solve(MOVE, true), SolveStatus::Converged);

    let pla = part_placement(&sys, &movable);
    let z = pla.rotation.transform_vector(&Vector3::z());
    assert_relative_eq!(z.dot(&Vector3::z()).abs(), 1.0, epsilon = 1e-7);
}

#[test]
fn test_point_plane_distance() {
    let mut sys = RelaxationSystem::new();
    let fixed = add_part(&mut sys, &Placement::identity(), FIXED);
    let movable = add_part(&mut sys, &Placement::translation(0.0, 0.0, 7.0), MOVE);

    // xy workplane of the fixed part
    let origin = add_tpoint(&mut sys, &fixed, Point3::origin(), MOVE);
    let normal = add_tnormal(&mut sys, &fixed, &Rotation::identity(), MOVE);
    let plane = sys.add_workplane(origin, normal, MOVE);

    let p = add_tpoint(&mut sys, &movable, Point3::origin(), MOVE);
    sys.add_point_plane_distance(2.0, p, plane, MOVE);

    assert_eq!(sys.solve(MOVE, true), SolveStatus::Converged);
    let pla = part_placement(&sys, &movable);
    assert_relative_eq!(pla.translation.vector.z, 2.0, epsilon = 1e-7);
}

#[test]
fn test_conflicting_distances_fail_with_report() {
    let mut sys = RelaxationSystem::new();
    let fixed = add_part(&mut sys, &Placement::identity(), FIXED);
    let movable = add_part(&mut sys, &Placement::translation(3.0, 0.0, 0.0), MOVE);

    let pa = add_tpoint(&mut sys, &fixed, Point3::origin(), MOVE);
    let pb = add_tpoint(&mut sys, &movable, Point3::origin(), MOVE);
    let c1 = sys.add_points_distance(5.0, pa, pb, None, MOVE);
    let c2 = sys.add_points_distance(15.0, pa, pb, None, MOVE);

    assert_eq!(sys.solve(MOVE, true), SolveStatus::NotConverging);
    let failed = sys.failed();
    assert!(failed.contains(&c1) || failed.contains(&c2));
}

#[test]
fn test_angle_constraint() {
    let mut sys = RelaxationSystem::new();
    let fixed = add_part(&mut sys, &Placement::identity(), FIXED);
    let movable = add_part(&mut sys, &Placement::identity(), MOVE);

    let n1 = add_tnormal(&mut sys, &fixed, &Rotation::identity(), MOVE);
    let n2 = add_tnormal(&mut sys, &movable, &Rotation::identity(), MOVE);
    sys.add_angle(90.0, false, n1, n2, None, MOVE);

    assert_eq!(sys.solve(MOVE, true), SolveStatus::Converged);
    let pla = part_placement(&sys, &movable);
    let z = pla.rotation.transform_vector(&Vector3::z());
    assert_relative_eq!(z.dot(&Vector3::z()), 0.0, epsilon = 1e-7);
}

#[test]
fn test_wire_point_moves_directly() {
    let mut sys = RelaxationSystem::new();
    // free point parametrized directly, not via a transform
    let free = sys.add_point3d_v(Point3::new(5.0, 5.0, 0.0), MOVE);
    let anchor = sys.add_point3d_v(Point3::new(1.0, 2.0, 3.0), FIXED);
    sys.add_points_coincident(anchor, free, None, MOVE);

    assert_eq!(sys.solve(MOVE, true), SolveStatus::Converged);
    let pos = match sys.solved_point(free) {
        Some(p) => p,
        None => panic!("free point must evaluate"),
    };
    assert_relative_eq!(pos.x, 1.0, epsilon = 1e-9);
    assert_relative_eq!(pos.y, 2.0, epsilon = 1e-9);
    assert_relative_eq!(pos.z, 3.0, epsilon = 1e-9);
}

#[test]
fn test_determinism_across_runs() {
    let run = || {
        let mut sys = RelaxationSystem::new();
        let fixed = add_part(&mut sys, &Placement::identity(), FIXED);
        let tilt = Placement::from_parts(
            nalgebra::Translation3::new(4.0, 1.0, 0.5),
            Rotation::from_euler_angles(0.2, 0.1, 0.0),
        );
        let movable = add_part(&mut sys, &tilt, MOVE);
        let pa = add_tpoint(&mut sys, &fixed, Point3::new(1.0, 1.0, 0.0), MOVE);
        let pb = add_tpoint(&mut sys, &movable, Point3::origin(), MOVE);
        let na_ = add_tnormal(&mut sys, &fixed, &Rotation::identity(), MOVE);
        let nb = add_tnormal(&mut sys, &movable, &Rotation::identity(), MOVE);
        sys.add_points_coincident(pa, pb, None, MOVE);
        sys.add_parallel(na_, nb, None, MOVE);
        assert_eq!(sys.solve(MOVE, true), SolveStatus::Converged);
        part_placement(&sys, &movable)
    };
    let a = run();
    let b = run();
    assert!((a.translation.vector - b.translation.vector).norm() < 1e-7);
    let qa = a.rotation.quaternion().coords;
    let qb = b.rotation.quaternion().coords;
    assert!((qa - qb).amax() < 1e-9);
}
