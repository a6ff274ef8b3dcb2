//! Host-side interface: stable object identities, element resolution and the
//! write-back surface.
//!
//! The engine never talks to a document model or a topology kernel directly.
//! Everything it needs from the host is the [`HostDocument`] trait, and
//! everything it learns about one geometric element is an [`ElementInfo`]
//! snapshot produced by `resolve`.

use crate::constraint::ConstraintDecl;
use crate::geometry::{Placement, Point3, Rotation, Vector3, EPSILON};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// A universally unique identifier for a host object (part, link array,
/// assembly, constraint). Wrapped for strong typing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub Uuid);

impl ObjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id from a string seed. Test fixtures use this so runs
    /// are reproducible.
    pub fn from_seed(seed: &str) -> Self {
        Self(Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()))
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // short form keeps logs readable
        let s = self.0.simple().to_string();
        write!(f, "{}", &s[..8])
    }
}

/// Identity of a part participating in a solve. Array instances are
/// addressed by `(array object, index)` so that a collapsed link array can
/// still have individually movable members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PartId {
    Solid(ObjectId),
    ArrayInstance { array: ObjectId, index: usize },
}

impl PartId {
    /// The owning array, if this part is an array instance.
    pub fn array(&self) -> Option<ObjectId> {
        match self {
            PartId::ArrayInstance { array, .. } => Some(*array),
            PartId::Solid(_) => None,
        }
    }
}

/// Reference to one geometric element: a container object plus a subpath
/// string such as `"Face3"` or `"Vertex1"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ElementRef {
    pub container: ObjectId,
    pub subpath: String,
}

impl ElementRef {
    pub fn new(container: ObjectId, subpath: impl Into<String>) -> Self {
        Self {
            container,
            subpath: subpath.into(),
        }
    }
}

/// Localized geometry of one element, expressed in the owning part's frame.
/// The part's live placement is applied later, by the solver's transform
/// entities, never baked into the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ElementShape {
    Vertex {
        position: Point3,
    },
    LineSegment {
        start: Point3,
        end: Point3,
    },
    Circle {
        center: Point3,
        normal: Vector3,
        radius: f64,
    },
    Arc {
        center: Point3,
        normal: Vector3,
        radius: f64,
        start: Point3,
        end: Point3,
    },
    PlanarFace {
        center: Point3,
        normal: Vector3,
        reversed: bool,
    },
    CylindricalFace {
        center: Point3,
        axis: Vector3,
        radius: f64,
    },
    SphericalFace {
        center: Point3,
        radius: f64,
    },
}

/// Circular classification of an edge: a closed circle yields its radius, an
/// open arc yields its endpoints (the radius is recoverable from the shape).
#[derive(Debug, Clone, PartialEq)]
pub enum Circular {
    Radius(f64),
    Endpoints(Point3, Point3),
}

impl ElementShape {
    /// Whether the element has a well-defined characteristic point.
    pub fn has_center(&self) -> bool {
        !matches!(self, ElementShape::LineSegment { .. })
    }

    /// Whether the element carries a planar surface normal. Circular edges
    /// count: their plane is the workplane most constraints want.
    pub fn is_planar(&self) -> bool {
        matches!(
            self,
            ElementShape::Circle { .. } | ElementShape::Arc { .. } | ElementShape::PlanarFace { .. }
        )
    }

    pub fn is_linear_edge(&self) -> bool {
        matches!(self, ElementShape::LineSegment { .. })
    }

    pub fn is_circular_edge(&self) -> bool {
        matches!(self, ElementShape::Circle { .. } | ElementShape::Arc { .. })
    }

    /// The characteristic point of the element in part-local coordinates:
    /// the vertex itself, a circle/arc center, a face center, or the
    /// midpoint of a linear edge.
    pub fn pos(&self) -> Point3 {
        match self {
            ElementShape::Vertex { position } => *position,
            ElementShape::LineSegment { start, end } => na_mid(start, end),
            ElementShape::Circle { center, .. }
            | ElementShape::Arc { center, .. }
            | ElementShape::PlanarFace { center, .. }
            | ElementShape::CylindricalFace { center, .. }
            | ElementShape::SphericalFace { center, .. } => *center,
        }
    }

    /// Orientation of the element as a rotation taking +Z onto its
    /// normal/axis/direction. Spheres and bare vertices have no orientation
    /// and yield identity.
    pub fn rotation(&self) -> Rotation {
        let (axis, reversed) = match self {
            ElementShape::Vertex { .. } | ElementShape::SphericalFace { .. } => {
                return Rotation::identity()
            }
            ElementShape::LineSegment { start, end } => {
                let dir = end - start;
                if dir.norm() < EPSILON {
                    return Rotation::identity();
                }
                (dir.normalize(), false)
            }
            ElementShape::Circle { normal, .. } | ElementShape::Arc { normal, .. } => {
                (*normal, false)
            }
            ElementShape::PlanarFace {
                normal, reversed, ..
            } => (*normal, *reversed),
            ElementShape::CylindricalFace { axis, .. } => (*axis, false),
        };
        crate::geometry::rotation_to_axis(&axis, reversed)
    }

    /// Radius if the edge is a closed circle, endpoints if it is an arc,
    /// `None` for everything else.
    pub fn circular(&self) -> Option<Circular> {
        match self {
            ElementShape::Circle { radius, .. } => Some(Circular::Radius(*radius)),
            ElementShape::Arc { start, end, .. } => Some(Circular::Endpoints(*start, *end)),
            _ => None,
        }
    }

    /// Endpoints when the element is a linear edge.
    pub fn endpoints(&self) -> Option<(Point3, Point3)> {
        match self {
            ElementShape::LineSegment { start, end } => Some((*start, *end)),
            _ => None,
        }
    }
}

fn na_mid(a: &Point3, b: &Point3) -> Point3 {
    Point3::from((a.coords + b.coords) * 0.5)
}

/// Immutable snapshot of one resolved element. Never persisted across
/// solves; the orchestrator re-resolves every pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementInfo {
    /// The movable part owning the element.
    pub part: PartId,
    /// Display name for log and error messages.
    pub part_name: String,
    /// The part's placement at resolution time.
    pub placement: Placement,
    /// The geometric object the shape actually came from (shared between
    /// link siblings, keys the entity cache).
    pub object: ObjectId,
    /// Subpath within the part, after link/array trimming.
    pub subpath: String,
    /// Localized shape of the element.
    pub shape: ElementShape,
    /// Set when the owning part is a free-form wire whose points move
    /// individually instead of through a rigid transform.
    pub pointwise: bool,
}

impl ElementInfo {
    /// World-space characteristic point, using the snapshot placement.
    pub fn world_pos(&self) -> Point3 {
        self.placement * self.shape.pos()
    }

    /// World-space orientation of the element.
    pub fn world_rotation(&self) -> Rotation {
        self.placement.rotation * self.shape.rotation()
    }
}

/// Parse the 1-based vertex index out of a `"VertexN"` subpath, as the
/// 0-based point index of a wire part.
pub fn wire_point_index(subpath: &str) -> Option<usize> {
    let rest = subpath.strip_prefix("Vertex")?;
    let idx: usize = rest.parse().ok()?;
    if idx == 0 {
        return None;
    }
    Some(idx - 1)
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unknown object {0}")]
    UnknownObject(ObjectId),

    #[error("'{subpath}' of {container} is not a usable geometric element: {reason}")]
    NotAnElement {
        container: ObjectId,
        subpath: String,
        reason: String,
    },
}

/// Everything the engine consumes from, and writes back to, the host
/// document. One implementation per host; the test suite carries an
/// in-memory one.
pub trait HostDocument {
    /// Resolve an element reference into a fresh [`ElementInfo`] snapshot.
    /// Must fail descriptively when the subpath names nothing usable.
    fn resolve(&self, element: &ElementRef) -> Result<ElementInfo, AdapterError>;

    /// All assemblies in the document.
    fn assemblies(&self) -> Vec<ObjectId>;

    /// Assemblies this assembly depends on (for dependency-ordered solving).
    fn assembly_deps(&self, _assembly: ObjectId) -> Vec<ObjectId> {
        Vec::new()
    }

    /// Parts grouped under one assembly.
    fn assembly_parts(&self, assembly: ObjectId) -> Vec<PartId>;

    /// Constraint declarations of one assembly, in authoring order.
    fn assembly_constraints(&self, assembly: ObjectId) -> Vec<ConstraintDecl>;

    /// Current placement of a part.
    fn part_placement(&self, part: &PartId) -> Option<Placement>;

    /// Points of a free-form wire part, `None` for rigid parts.
    fn wire_points(&self, part: &PartId) -> Option<Vec<Point3>>;

    /// Published element count of a link array.
    fn array_count(&self, array: ObjectId) -> usize;

    /// Publish a new element count for a link array. The engine only ever
    /// grows it during expansion; rollback may restore a smaller value.
    fn set_array_count(&mut self, array: ObjectId, count: usize);

    /// Per-instance placements of a link array, one per element.
    fn array_placements(&self, array: ObjectId) -> Vec<Placement>;

    /// Write a solved placement. Must be idempotent.
    fn set_placement(&mut self, part: &PartId, placement: Placement);

    /// Write solved points of a wire part. Must be idempotent.
    fn set_point_positions(&mut self, part: &PartId, points: &[(usize, Point3)]);

    /// Best-effort host recompute hook, invoked around each pass.
    fn recompute(&mut self, _objects: &[ObjectId]) {}
}

#[cfg(test)]
mod tests_shape;
