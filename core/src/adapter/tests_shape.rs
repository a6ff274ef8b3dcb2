use super::*;
use crate::geometry::{ApproxEq, Vector3};
use approx::assert_relative_eq;

#[test]
fn test_vertex_classification() {
    let shape = ElementShape::Vertex {
        position: Point3::new(1.0, 2.0, 3.0),
    };
    assert!(shape.has_center());
    assert!(!shape.is_planar());
    assert!(!shape.is_linear_edge());
    assert_eq!(shape.pos(), Point3::new(1.0, 2.0, 3.0));
}

#[test]
fn test_line_pos_is_midpoint() {
    let shape = ElementShape::LineSegment {
        start: Point3::new(0.0, 0.0, 0.0),
        end: Point3::new(10.0, 0.0, 0.0),
    };
    assert!(!shape.has_center());
    assert!(shape.is_linear_edge());
    assert_eq!(shape.pos(), Point3::new(5.0, 0.0, 0.0));

    let dir = shape.rotation().transform_vector(&Vector3::z());
    assert!(dir.approx_eq(&Vector3::new(1.0, 0.0, 0.0)));
}

#[test]
fn test_circle_is_planar_and_circular() {
    let shape = ElementShape::Circle {
        center: Point3::new(0.0, 0.0, 1.0),
        normal: Vector3::z(),
        radius: 2.5,
    };
    assert!(shape.is_planar());
    assert!(shape.is_circular_edge());
    match shape.circular() {
        Some(Circular::Radius(r)) => assert_relative_eq!(r, 2.5),
        other => panic!("expected radius, got {:?}", other),
    }
}

#[test]
fn test_arc_yields_endpoints() {
    let shape = ElementShape::Arc {
        center: Point3::origin(),
        normal: Vector3::z(),
        radius: 1.0,
        start: Point3::new(1.0, 0.0, 0.0),
        end: Point3::new(0.0, 1.0, 0.0),
    };
    match shape.circular() {
        Some(Circular::Endpoints(s, e)) => {
            assert_eq!(s, Point3::new(1.0, 0.0, 0.0));
            assert_eq!(e, Point3::new(0.0, 1.0, 0.0));
        }
        other => panic!("expected endpoints, got {:?}", other),
    }
}

#[test]
fn test_reversed_face_flips_normal() {
    let face = ElementShape::PlanarFace {
        center: Point3::origin(),
        normal: Vector3::z(),
        reversed: true,
    };
    let n = face.rotation().transform_vector(&Vector3::z());
    assert!(n.approx_eq(&Vector3::new(0.0, 0.0, -1.0)));
}

#[test]
fn test_wire_point_index() {
    assert_eq!(wire_point_index("Vertex1"), Some(0));
    assert_eq!(wire_point_index("Vertex12"), Some(11));
    assert_eq!(wire_point_index("Vertex0"), None);
    assert_eq!(wire_point_index("Edge3"), None);
    assert_eq!(wire_point_index("VertexX"), None);
}

#[test]
fn test_element_world_pos() {
    let info = ElementInfo {
        part: PartId::Solid(ObjectId::from_seed("a")),
        part_name: "A".into(),
        placement: crate::geometry::Placement::translation(10.0, 0.0, 0.0),
        object: ObjectId::from_seed("a-obj"),
        subpath: "Vertex1".into(),
        shape: ElementShape::Vertex {
            position: Point3::new(1.0, 2.0, 3.0),
        },
        pointwise: false,
    };
    assert_eq!(info.world_pos(), Point3::new(11.0, 2.0, 3.0));
}

#[test]
fn test_element_ref_serde_roundtrip() {
    let element = ElementRef::new(ObjectId::from_seed("plate"), "Face3");
    let json = serde_json::to_string(&element).unwrap();
    let back: ElementRef = serde_json::from_str(&json).unwrap();
    assert_eq!(element, back);
}
