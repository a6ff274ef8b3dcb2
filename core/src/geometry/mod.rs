use nalgebra as na;

pub type Point3 = na::Point3<f64>;
pub type Vector3 = na::Vector3<f64>;
pub type Rotation = na::UnitQuaternion<f64>;
pub type Placement = na::Isometry3<f64>;

pub const EPSILON: f64 = 1e-6;

/// Tolerance used when deciding whether a solved placement actually moved.
/// Writes below this threshold are skipped entirely.
pub const PLACEMENT_TOL: f64 = 1e-7;

pub trait ApproxEq {
    fn approx_eq(&self, other: &Self) -> bool;
}

impl ApproxEq for f64 {
    fn approx_eq(&self, other: &Self) -> bool {
        (self - other).abs() < EPSILON
    }
}

impl ApproxEq for Point3 {
    fn approx_eq(&self, other: &Self) -> bool {
        na::distance_squared(self, other) < EPSILON * EPSILON
    }
}

impl ApproxEq for Vector3 {
    fn approx_eq(&self, other: &Self) -> bool {
        (self - other).norm_squared() < EPSILON * EPSILON
    }
}

pub fn dist_sq(p1: &Point3, p2: &Point3) -> f64 {
    na::distance_squared(p1, p2)
}

/// Flatten a placement into the 7 scalars the solver parametrizes a rigid
/// part with: translation first, then the rotation quaternion with the
/// scalar component leading.
pub fn placement_params(pla: &Placement) -> [f64; 7] {
    let t = pla.translation.vector;
    let q = pla.rotation.quaternion();
    [t.x, t.y, t.z, q.w, q.i, q.j, q.k]
}

/// Rebuild a placement from solved parameters. The quaternion coming back
/// from the solver is generally slightly off unit length and must be
/// renormalized before it is written anywhere.
pub fn placement_from_params(params: &[f64; 7]) -> Placement {
    let translation = na::Translation3::new(params[0], params[1], params[2]);
    let rotation = Rotation::from_quaternion(na::Quaternion::new(
        params[3], params[4], params[5], params[6],
    ));
    Placement::from_parts(translation, rotation)
}

/// Compare placements component-wise against the write-back tolerance.
pub fn is_same_placement(a: &Placement, b: &Placement) -> bool {
    if (a.translation.vector - b.translation.vector).norm() >= PLACEMENT_TOL {
        return false;
    }
    let qa = a.rotation.quaternion();
    let qb = b.rotation.quaternion();
    // q and -q denote the same rotation
    let direct = (qa.coords - qb.coords).amax();
    let flipped = (qa.coords + qb.coords).amax();
    direct.min(flipped) < PLACEMENT_TOL
}

/// Snap near-zero placement components to exactly zero, so identity-ish
/// placements serialize cleanly.
pub fn round_placement(pla: &Placement) -> Placement {
    let clean = |v: f64| if v.abs() < PLACEMENT_TOL { 0.0 } else { v };
    let t = pla.translation.vector;
    let q = pla.rotation.quaternion();
    let translation = na::Translation3::new(clean(t.x), clean(t.y), clean(t.z));
    let rotation = Rotation::from_quaternion(na::Quaternion::new(
        clean(q.w),
        clean(q.i),
        clean(q.j),
        clean(q.k),
    ));
    Placement::from_parts(translation, rotation)
}

/// Rotation taking +Z (or -Z when `reverse`) onto `axis`. Used to express an
/// element's surface normal or edge direction as a solver quaternion.
pub fn rotation_to_axis(axis: &Vector3, reverse: bool) -> Rotation {
    let from = Vector3::new(0.0, 0.0, if reverse { -1.0 } else { 1.0 });
    match Rotation::rotation_between(&from, axis) {
        Some(r) => r,
        // anti-parallel case is degenerate, pick a fixed perpendicular axis
        None => Rotation::from_axis_angle(&na::Vector3::x_axis(), std::f64::consts::PI),
    }
}

/// Project `point` into the 2D frame of a plane given by `origin` and the
/// plane's `rotation` (plane normal = rotation * Z, x axis = rotation * X).
pub fn project_2d(rotation: &Rotation, origin: &Point3, point: &Point3) -> [f64; 2] {
    let local = rotation.inverse_transform_vector(&(point - origin));
    [local.x, local.y]
}

/// Angle in radians between the Z axes of two orientations, ignoring spin
/// about the axis itself.
pub fn axis_angle_between(a: &Rotation, b: &Rotation) -> f64 {
    let za = a.transform_vector(&Vector3::z());
    let zb = b.transform_vector(&Vector3::z());
    za.dot(&zb).clamp(-1.0, 1.0).acos()
}
