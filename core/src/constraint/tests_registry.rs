use super::*;
use crate::adapter::ElementShape;
use crate::geometry::{Point3, Vector3};

fn vertex() -> ElementShape {
    ElementShape::Vertex {
        position: Point3::origin(),
    }
}

fn face() -> ElementShape {
    ElementShape::PlanarFace {
        center: Point3::origin(),
        normal: Vector3::z(),
        reversed: false,
    }
}

fn segment() -> ElementShape {
    ElementShape::LineSegment {
        start: Point3::origin(),
        end: Point3::new(1.0, 0.0, 0.0),
    }
}

fn circle() -> ElementShape {
    ElementShape::Circle {
        center: Point3::origin(),
        normal: Vector3::z(),
        radius: 1.0,
    }
}

#[test]
fn test_check_accepts_matching_pair() {
    let shapes = [vertex(), vertex()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    check(ConstraintKind::PointsCoincident, "Mate", &refs).unwrap();
}

#[test]
fn test_strict_arity_is_enforced() {
    let err = effective_slots(ConstraintKind::PointsCoincident, "Mate", 1, true).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("wrong number of elements 1"));
    assert!(msg.contains("expecting 2"));
}

#[test]
fn test_check_names_ordinal_and_expected_kind() {
    let shapes = [vertex(), segment()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    let err = check(ConstraintKind::PointsCoincident, "Mate", &refs).unwrap_err();
    let msg = err.to_string();
    assert!(msg.contains("2nd"), "{msg}");
    assert!(msg.contains("a vertex or circular edge/face"), "{msg}");
}

#[test]
fn test_optional_trailing_workplane() {
    let shapes = [vertex(), vertex(), face()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    check(ConstraintKind::PointsCoincident, "Mate", &refs).unwrap();

    // a non-planar trailing element gets its own message
    let shapes = [vertex(), vertex(), segment()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    let err = check(ConstraintKind::PointsCoincident, "Mate", &refs).unwrap_err();
    assert!(err.to_string().contains("planar face for defining a workplane"));
}

#[test]
fn test_multi_kind_needs_two_elements() {
    let shapes = [face()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    let err = check(ConstraintKind::PlaneCoincident, "Stack", &refs).unwrap_err();
    assert!(err.to_string().contains("at least two"));
}

#[test]
fn test_multi_kind_rejects_mixed_elements() {
    let shapes = [face(), segment()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    let err = check(ConstraintKind::PlaneCoincident, "Stack", &refs).unwrap_err();
    assert!(err.to_string().contains("all elements"));
}

#[test]
fn test_locked_accepts_vertex_and_edge_only() {
    let shapes = [vertex(), segment()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    check(ConstraintKind::Locked, "Lock", &refs).unwrap();

    let shapes = [face()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    let err = check(ConstraintKind::Locked, "Lock", &refs).unwrap_err();
    assert!(err.to_string().contains("vertex or linear edge"));
}

#[test]
fn test_check_multiplied() {
    // circles qualify for the point slot through their centers
    let shapes = [vertex(), circle(), circle(), circle()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    check_multiplied(ConstraintKind::PointsCoincident, "Pins", &refs).unwrap();

    let shapes = [vertex()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    assert!(check_multiplied(ConstraintKind::PointsCoincident, "Pins", &refs).is_err());

    let shapes = [vertex(), segment()];
    let refs: Vec<&ElementShape> = shapes.iter().collect();
    let err = check_multiplied(ConstraintKind::PointsCoincident, "Pins", &refs).unwrap_err();
    assert!(err.to_string().contains("2nd"));
}

#[test]
fn test_signatures() {
    let info = ConstraintKind::Angle.info();
    assert_eq!(info.slots.len(), 2);
    assert!(info.optional_workplane);
    assert!(!info.multi);

    let info = ConstraintKind::SameOrientation.info();
    assert!(info.multi);

    assert!(ConstraintKind::Locked.can_fix_parts());
    assert!(!ConstraintKind::PlaneCoincident.can_fix_parts());
    assert!(ConstraintKind::PlaneCoincident.cascades());
    assert!(!ConstraintKind::AxialAlignment.cascades());
}

#[test]
fn test_decl_serde_roundtrip() {
    let a = crate::adapter::ObjectId::from_seed("a");
    let b = crate::adapter::ObjectId::from_seed("b");
    let mut decl = ConstraintDecl::new(
        "Mate",
        ConstraintKind::PlaneCoincident,
        vec![ElementRef::new(a, "Face1"), ElementRef::new(b, "Face2")],
    );
    decl.props.offset = 2.5;
    decl.props.lock_angle = true;

    let json = serde_json::to_string(&decl).unwrap();
    let back: ConstraintDecl = serde_json::from_str(&json).unwrap();
    assert_eq!(back.kind, ConstraintKind::PlaneCoincident);
    assert_eq!(back.props, decl.props);
    assert_eq!(back.elements, decl.elements);
    assert_eq!(back.cstr_name(), "Mate<PlaneCoincident>");
}
