use super::tests_common::{TestArray, TestDocument, TestPart};
use super::*;
use crate::adapter::ElementShape;
use crate::constraint::{translate, ConstraintDecl, ConstraintKind};
use crate::geometry::Vector3;
use crate::system::RelaxationSystem;
use approx::assert_relative_eq;
use std::sync::atomic::Ordering as AtomicOrdering;

fn vertex(x: f64, y: f64, z: f64) -> ElementShape {
    ElementShape::Vertex {
        position: Point3::new(x, y, z),
    }
}

fn top_face() -> ElementShape {
    ElementShape::PlanarFace {
        center: Point3::origin(),
        normal: Vector3::z(),
        reversed: false,
    }
}

fn hole(x: f64) -> ElementShape {
    ElementShape::Circle {
        center: Point3::new(x, 0.0, 0.0),
        normal: Vector3::z(),
        radius: 2.0,
    }
}

fn edge(len: f64) -> ElementShape {
    ElementShape::LineSegment {
        start: Point3::origin(),
        end: Point3::new(len, 0.0, 0.0),
    }
}

fn run(ctx: &mut SolverContext, doc: &mut TestDocument) -> Result<(), SolverError> {
    solve::<RelaxationSystem, _>(ctx, doc, &[], &SolveOptions::default(), None)
}

#[test]
fn test_locked_coincident_moves_second_part() {
    let mut doc = TestDocument::new();
    let a = TestPart::new("cylinder-a").element("Vertex1", vertex(0.0, 0.0, 5.0));
    let b = TestPart::new("cylinder-b")
        .at(10.0, 3.0, 0.0)
        .element("Vertex1", vertex(0.0, 0.0, 0.0));
    doc.constraints = vec![
        ConstraintDecl::new("Lock", ConstraintKind::Locked, vec![a.element_ref("Vertex1")]),
        ConstraintDecl::new(
            "Mate",
            ConstraintKind::PointsCoincident,
            vec![a.element_ref("Vertex1"), b.element_ref("Vertex1")],
        ),
    ];
    let a_id = a.part_id();
    let b_id = b.part_id();
    doc.parts = vec![a, b];

    let mut ctx = SolverContext::new();
    run(&mut ctx, &mut doc).unwrap();

    // A is the ground reference and must not have moved
    assert_eq!(doc.placement_of("cylinder-a"), Placement::identity());
    assert!(ctx.is_fixed_part(&a_id));
    assert!(!ctx.is_fixed_part(&b_id));

    // B translated so its axis vertex lands on A's
    let solved = doc.placement_of("cylinder-b") * Point3::origin();
    assert_relative_eq!(solved.x, 0.0, epsilon = 1e-7);
    assert_relative_eq!(solved.y, 0.0, epsilon = 1e-7);
    assert_relative_eq!(solved.z, 5.0, epsilon = 1e-7);
}

#[test]
fn test_default_fixed_part_is_first_elements_owner() {
    let mut doc = TestDocument::new();
    let a = TestPart::new("a").element("Vertex1", vertex(1.0, 0.0, 0.0));
    let b = TestPart::new("b")
        .at(4.0, 4.0, 0.0)
        .element("Vertex1", vertex(0.0, 0.0, 0.0));
    doc.constraints = vec![ConstraintDecl::new(
        "Mate",
        ConstraintKind::PointsCoincident,
        vec![a.element_ref("Vertex1"), b.element_ref("Vertex1")],
    )];
    let a_id = a.part_id();
    doc.parts = vec![a, b];

    let mut ctx = SolverContext::new();
    run(&mut ctx, &mut doc).unwrap();

    assert_eq!(ctx.fixed_parts.len(), 1);
    assert!(ctx.is_fixed_part(&a_id));
    assert_eq!(doc.placement_of("a"), Placement::identity());
    let solved = doc.placement_of("b") * Point3::origin();
    assert_relative_eq!(solved.x, 1.0, epsilon = 1e-7);
}

#[test]
fn test_cascade_emits_two_pair_sets() {
    let mut doc = TestDocument::new();
    let a = TestPart::new("a").element("Face1", top_face());
    let b = TestPart::new("b").at(0.0, 0.0, 1.0).element("Face1", top_face());
    let c = TestPart::new("c").at(0.0, 0.0, 2.0).element("Face1", top_face());
    let decl = ConstraintDecl::new(
        "Stack",
        ConstraintKind::PlaneCoincident,
        vec![
            a.element_ref("Face1"),
            b.element_ref("Face1"),
            c.element_ref("Face1"),
        ],
    );
    let fixed: HashSet<PartId> = [a.part_id()].into_iter().collect();
    doc.parts = vec![a, b, c];

    let infos: Vec<ElementInfo> = decl
        .elements
        .iter()
        .map(|e| doc.resolve(e).unwrap())
        .collect();
    let mut sess = Session::new(RelaxationSystem::new(), &mut doc, false, fixed);
    let handles = translate::prepare(&mut sess, &decl, &infos, GroupId(3)).unwrap();

    // pairs 1-2 and 2-3 only, each one coincidence plus one parallel
    assert_eq!(handles.len(), 4);
}

#[test]
fn test_second_plane_coincident_degrades_to_point_on_line() {
    let mut doc = TestDocument::new();
    let a = TestPart::new("a").element("Face1", top_face());
    let b = TestPart::new("b").at(0.0, 0.5, 0.0).element("Face1", top_face());
    let first = ConstraintDecl::new(
        "Mate1",
        ConstraintKind::PlaneCoincident,
        vec![a.element_ref("Face1"), b.element_ref("Face1")],
    );
    let second = ConstraintDecl::new(
        "Mate2",
        ConstraintKind::PlaneCoincident,
        vec![a.element_ref("Face1"), b.element_ref("Face1")],
    );
    let fixed: HashSet<PartId> = [a.part_id()].into_iter().collect();
    doc.parts = vec![a, b];

    let infos1: Vec<ElementInfo> = first
        .elements
        .iter()
        .map(|e| doc.resolve(e).unwrap())
        .collect();
    let infos2 = infos1.clone();
    let mut sess = Session::new(RelaxationSystem::new(), &mut doc, false, fixed);

    let handles1 = translate::prepare(&mut sess, &first, &infos1, GroupId(3)).unwrap();
    assert_eq!(handles1.len(), 2); // coincidence + parallel

    let handles2 = translate::prepare(&mut sess, &second, &infos2, GroupId(4)).unwrap();
    assert_eq!(handles2.len(), 1); // degraded to a single point-on-line
}

#[test]
fn test_multiplier_grows_and_matches_stably() {
    let mut doc = TestDocument::new();
    let plate = TestPart::new("plate")
        .element("Vertex1", vertex(-5.0, 0.0, 0.0))
        .element("Edge1", hole(0.0))
        .element("Edge2", hole(10.0))
        .element("Edge3", hole(20.0))
        .element("Edge4", hole(30.0))
        .element("Edge5", hole(40.0));
    let pins = TestArray::new("pins", vec![Placement::identity()])
        .element("Vertex1", vertex(0.0, 0.0, 0.0));
    let mut mate = ConstraintDecl::new(
        "PinMate",
        ConstraintKind::PointsCoincident,
        vec![
            pins.element_ref("Vertex1"),
            plate.element_ref("Edge1"),
            plate.element_ref("Edge2"),
            plate.element_ref("Edge3"),
            plate.element_ref("Edge4"),
            plate.element_ref("Edge5"),
        ],
    );
    mate.props.multiply = true;
    let mate_id = mate.id;
    let pins_id = pins.id;
    doc.constraints = vec![
        ConstraintDecl::new("Lock", ConstraintKind::Locked, vec![plate.element_ref("Vertex1")]),
        mate,
    ];
    doc.parts = vec![plate];
    doc.arrays = vec![pins];

    let mut ctx = SolverContext::new();
    run(&mut ctx, &mut doc).unwrap();

    // array published count raised to the hole count
    assert_eq!(doc.array_count(pins_id), 5);
    let placements = doc.array_placements(pins_id);
    assert_eq!(placements.len(), 5);
    for (i, pla) in placements.iter().enumerate() {
        assert_relative_eq!(pla.translation.vector.x, 10.0 * i as f64, epsilon = 1e-6);
    }
    let first_assignment = ctx.multiplier.assignment(mate_id).unwrap().to_vec();
    assert_eq!(first_assignment, vec![0, 1, 2, 3, 4]);

    // unperturbed re-run reproduces the correspondence
    run(&mut ctx, &mut doc).unwrap();
    assert_eq!(
        ctx.multiplier.assignment(mate_id).unwrap(),
        first_assignment.as_slice()
    );

    // re-author with the holes selected in shuffled order: the physical
    // pairing must survive
    let plate_id = doc.parts[0].id;
    let shuffled = ["Edge3", "Edge1", "Edge5", "Edge2", "Edge4"];
    let mut mate2 = ConstraintDecl::new(
        "PinMate",
        ConstraintKind::PointsCoincident,
        std::iter::once(crate::adapter::ElementRef::new(pins_id, "Vertex1"))
            .chain(
                shuffled
                    .iter()
                    .map(|s| crate::adapter::ElementRef::new(plate_id, *s)),
            )
            .collect(),
    );
    mate2.props.multiply = true;
    mate2.id = mate_id;
    doc.constraints[1] = mate2;

    run(&mut ctx, &mut doc).unwrap();
    assert_eq!(
        ctx.multiplier.assignment(mate_id).unwrap().to_vec(),
        vec![2, 0, 4, 1, 3]
    );
    // instances still sit on their holes
    let placements = doc.array_placements(pins_id);
    for (i, pla) in placements.iter().enumerate() {
        assert_relative_eq!(pla.translation.vector.x, 10.0 * i as f64, epsilon = 1e-6);
    }
}

#[test]
fn test_rollback_restores_placements_on_failure() {
    let mut doc = TestDocument::new();
    let plate = TestPart::new("plate")
        .element("Vertex1", vertex(0.0, 0.0, 0.0))
        .element("Edge1", hole(0.0))
        .element("Edge2", hole(10.0));
    // instances start far out, so the multiplier snaps them (a pre-solve
    // host mutation that must roll back)
    let pins = TestArray::new(
        "pins",
        vec![
            Placement::translation(100.0, 0.0, 0.0),
            Placement::translation(200.0, 0.0, 0.0),
        ],
    )
    .element("Vertex1", vertex(0.0, 0.0, 0.0));
    let floater = TestPart::new("floater")
        .at(3.0, 0.0, 0.0)
        .element("Vertex1", vertex(0.0, 0.0, 0.0));

    let mut mate = ConstraintDecl::new(
        "PinMate",
        ConstraintKind::PointsCoincident,
        vec![
            pins.element_ref("Vertex1"),
            plate.element_ref("Edge1"),
            plate.element_ref("Edge2"),
        ],
    );
    mate.props.multiply = true;
    let mut near = ConstraintDecl::new(
        "Near",
        ConstraintKind::PointsDistance,
        vec![plate.element_ref("Vertex1"), floater.element_ref("Vertex1")],
    );
    near.props.distance = 5.0;
    let mut far = ConstraintDecl::new(
        "Far",
        ConstraintKind::PointsDistance,
        vec![plate.element_ref("Vertex1"), floater.element_ref("Vertex1")],
    );
    far.props.distance = 15.0;

    doc.constraints = vec![
        ConstraintDecl::new("Lock", ConstraintKind::Locked, vec![plate.element_ref("Vertex1")]),
        mate,
        near,
        far,
    ];
    let pins_id = pins.id;
    let original_pins = pins.placements.clone();
    let original_floater = floater.placement;
    doc.parts = vec![plate, floater];
    doc.arrays = vec![pins];

    let mut ctx = SolverContext::new();
    let mut log = RollbackLog::new();
    let err = solve::<RelaxationSystem, _>(
        &mut ctx,
        &mut doc,
        &[],
        &SolveOptions::default(),
        Some(&mut log),
    )
    .unwrap_err();

    match err {
        SolverError::SolveFailure {
            status,
            constraints,
            ..
        } => {
            assert_eq!(status, SolveStatus::NotConverging);
            // the conflicting distance pair is implicated; at termination at
            // least the currently unsatisfied one is reported by name
            assert!(!constraints.is_empty());
            assert!(constraints
                .iter()
                .all(|c| c.contains("Near") || c.contains("Far")));
        }
        other => panic!("expected solve failure, got {other:?}"),
    }

    // every mutation rolled back bit-identically
    assert_eq!(doc.array_placements(pins_id), original_pins);
    assert_eq!(doc.placement_of("floater"), original_floater);
    assert_eq!(doc.placement_of("plate"), Placement::identity());
    assert!(log.is_empty());
}

#[test]
fn test_resolving_converged_assembly_writes_nothing() {
    let mut doc = TestDocument::new();
    let a = TestPart::new("a").element("Vertex1", vertex(0.0, 0.0, 5.0));
    let b = TestPart::new("b")
        .at(10.0, 3.0, 0.0)
        .element("Vertex1", vertex(0.0, 0.0, 0.0));
    doc.constraints = vec![
        ConstraintDecl::new("Lock", ConstraintKind::Locked, vec![a.element_ref("Vertex1")]),
        ConstraintDecl::new(
            "Mate",
            ConstraintKind::PointsCoincident,
            vec![a.element_ref("Vertex1"), b.element_ref("Vertex1")],
        ),
    ];
    doc.parts = vec![a, b];

    let mut ctx = SolverContext::new();
    run(&mut ctx, &mut doc).unwrap();
    let writes = doc.writes;
    assert!(writes > 0);

    // nothing changed, so nothing may be written
    run(&mut ctx, &mut doc).unwrap();
    assert_eq!(doc.writes, writes);
}

#[test]
fn test_wire_points_written_back() {
    let mut doc = TestDocument::new();
    let a = TestPart::new("anchor").element("Vertex1", vertex(1.0, 2.0, 3.0));
    let w = TestPart::new("wire").wire(vec![
        Point3::new(0.0, 0.0, 0.0),
        Point3::new(5.0, 0.0, 0.0),
    ]);
    doc.constraints = vec![
        ConstraintDecl::new("Lock", ConstraintKind::Locked, vec![a.element_ref("Vertex1")]),
        ConstraintDecl::new(
            "Tie",
            ConstraintKind::PointsCoincident,
            vec![a.element_ref("Vertex1"), w.element_ref("Vertex1")],
        ),
    ];
    doc.parts = vec![a, w];

    let mut ctx = SolverContext::new();
    run(&mut ctx, &mut doc).unwrap();

    let points = doc.part("wire").points.clone().unwrap();
    assert_relative_eq!(points[0].x, 1.0, epsilon = 1e-7);
    assert_relative_eq!(points[0].y, 2.0, epsilon = 1e-7);
    assert_relative_eq!(points[0].z, 3.0, epsilon = 1e-7);
    // the untouched vertex stays put
    assert_eq!(points[1], Point3::new(5.0, 0.0, 0.0));
}

#[test]
fn test_unsupported_constraint_is_skipped() {
    let mut doc = TestDocument::new();
    let a = TestPart::new("a")
        .element("Vertex1", vertex(1.0, 0.0, 0.0))
        .element("Edge1", edge(4.0));
    let b = TestPart::new("b")
        .at(9.0, 0.0, 0.0)
        .element("Vertex1", vertex(0.0, 0.0, 0.0))
        .element("Edge1", edge(6.0));
    doc.constraints = vec![
        ConstraintDecl::new(
            "Mate",
            ConstraintKind::PointsCoincident,
            vec![a.element_ref("Vertex1"), b.element_ref("Vertex1")],
        ),
        // rigid parts cannot change edge lengths; the backend reports the
        // operation unsupported and the solve continues without it
        ConstraintDecl::new(
            "SameLength",
            ConstraintKind::EqualLength,
            vec![a.element_ref("Edge1"), b.element_ref("Edge1")],
        ),
    ];
    doc.parts = vec![a, b];

    let mut ctx = SolverContext::new();
    run(&mut ctx, &mut doc).unwrap();
    let solved = doc.placement_of("b") * Point3::origin();
    assert_relative_eq!(solved.x, 1.0, epsilon = 1e-7);
}

#[test]
fn test_invalid_constraint_is_absorbed() {
    let mut doc = TestDocument::new();
    let a = TestPart::new("a").element("Vertex1", vertex(1.0, 0.0, 0.0));
    let b = TestPart::new("b")
        .at(7.0, 0.0, 0.0)
        .element("Vertex1", vertex(0.0, 0.0, 0.0));
    doc.constraints = vec![
        // arity error: one element missing
        ConstraintDecl::new(
            "Broken",
            ConstraintKind::PointsCoincident,
            vec![a.element_ref("Vertex1")],
        ),
        ConstraintDecl::new(
            "Mate",
            ConstraintKind::PointsCoincident,
            vec![a.element_ref("Vertex1"), b.element_ref("Vertex1")],
        ),
    ];
    doc.parts = vec![a, b];

    let mut ctx = SolverContext::new();
    run(&mut ctx, &mut doc).unwrap();
    let solved = doc.placement_of("b") * Point3::origin();
    assert_relative_eq!(solved.x, 1.0, epsilon = 1e-7);
}

#[test]
fn test_reentrancy_guard() {
    let mut doc = TestDocument::new();
    let a = TestPart::new("a").element("Vertex1", vertex(0.0, 0.0, 0.0));
    let b = TestPart::new("b")
        .at(1.0, 0.0, 0.0)
        .element("Vertex1", vertex(0.0, 0.0, 0.0));
    doc.constraints = vec![ConstraintDecl::new(
        "Mate",
        ConstraintKind::PointsCoincident,
        vec![a.element_ref("Vertex1"), b.element_ref("Vertex1")],
    )];
    doc.parts = vec![a, b];

    let mut ctx = SolverContext::new();
    ctx.busy.store(true, AtomicOrdering::SeqCst);
    let err = run(&mut ctx, &mut doc).unwrap_err();
    assert!(matches!(err, SolverError::Reentrancy));

    ctx.busy.store(false, AtomicOrdering::SeqCst);
    run(&mut ctx, &mut doc).unwrap();
}

#[test]
fn test_drag_part_query() {
    let mut doc = TestDocument::new();
    let a = TestPart::new("a").element("Vertex1", vertex(0.0, 0.0, 0.0));
    let b = TestPart::new("b")
        .at(2.0, 0.0, 0.0)
        .element("Vertex1", vertex(0.0, 0.0, 0.0));
    doc.constraints = vec![ConstraintDecl::new(
        "Mate",
        ConstraintKind::PointsCoincident,
        vec![a.element_ref("Vertex1"), b.element_ref("Vertex1")],
    )];
    let b_id = b.part_id();
    let a_ref = a.element_ref("Vertex1");
    doc.parts = vec![a, b];

    let mut ctx = SolverContext::new();
    let opts = SolveOptions {
        drag_part: Some(b_id),
        ..SolveOptions::default()
    };
    solve::<RelaxationSystem, _>(&mut ctx, &mut doc, &[], &opts, None).unwrap();
    assert_eq!(ctx.get_drag_part(), Some(b_id));
    assert!(ctx.is_fixed_element(&doc, &a_ref));
}
