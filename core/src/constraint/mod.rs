//! Constraint type registry.
//!
//! Every constraint kind is a closed enum variant carrying its entity-kind
//! signature and numeric properties as data. Validation (`check`) runs
//! against resolved element shapes before any solver entity exists, so a
//! badly authored constraint fails with a message naming the offending
//! element ordinal and the geometry it expected.

use crate::adapter::{ElementRef, ElementShape, ObjectId};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub mod entities;
pub mod multiplier;
pub mod redundancy;
pub(crate) mod translate;

#[cfg(test)]
mod tests_registry;

/// The closed taxonomy of constraint kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstraintKind {
    /// Fixes absolute position of a vertex or linear edge in world space.
    Locked,
    PointsCoincident,
    PointInPlane,
    PointOnLine,
    PointsDistance,
    PointsProjectDistance,
    PointPlaneDistance,
    PointLineDistance,
    EqualLength,
    LengthRatio,
    LengthDifference,
    EqualLengthPointLineDistance,
    EqualPointLineDistance,
    EqualAngle,
    EqualLineArcLength,
    Symmetric,
    SymmetricHorizontal,
    SymmetricVertical,
    SymmetricLine,
    MidPoint,
    PointsHorizontal,
    PointsVertical,
    LineHorizontal,
    LineVertical,
    Diameter,
    PointOnCircle,
    ArcLineTangent,
    EqualRadius,
    Angle,
    Perpendicular,
    Parallel,
    /// Parallel plus point-on-line between two linear edges.
    Colinear,
    WhereDragged,
    // composite kinds pairing N >= 2 elements
    PlaneCoincident,
    PlaneAlignment,
    AxialAlignment,
    SameOrientation,
    MultiParallel,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Entity kind expected in one signature slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntitySlot {
    Point,
    Normal,
    Line,
    /// Either a line or a normal, depending on the element's shape.
    LineOrNormal,
    Workplane,
    Circle,
    Arc,
}

/// Static per-kind signature data.
#[derive(Debug, Clone, Copy)]
pub struct KindInfo {
    /// Fixed slots, or the one repeated slot for composite kinds.
    pub slots: &'static [EntitySlot],
    /// An extra trailing planar element may define a projection workplane.
    pub optional_workplane: bool,
    /// Composite kinds take N >= 2 elements of the repeated slot kind.
    pub multi: bool,
}

use EntitySlot::*;

impl ConstraintKind {
    pub fn info(&self) -> KindInfo {
        let (slots, optional_workplane, multi): (&'static [EntitySlot], bool, bool) = match self {
            ConstraintKind::Locked => (&[Point], false, false),
            ConstraintKind::PointsCoincident => (&[Point, Point], true, false),
            ConstraintKind::PointInPlane => (&[Point, Workplane], false, false),
            ConstraintKind::PointOnLine => (&[Point, Line], true, false),
            ConstraintKind::PointsDistance => (&[Point, Point], true, false),
            ConstraintKind::PointsProjectDistance => (&[Point, Point, Line], false, false),
            ConstraintKind::PointPlaneDistance => (&[Point, Workplane], false, false),
            ConstraintKind::PointLineDistance => (&[Point, Line], true, false),
            ConstraintKind::EqualLength => (&[Line, Line], true, false),
            ConstraintKind::LengthRatio => (&[Line, Line], true, false),
            ConstraintKind::LengthDifference => (&[Line, Line], true, false),
            ConstraintKind::EqualLengthPointLineDistance => (&[Point, Line, Line], true, false),
            ConstraintKind::EqualPointLineDistance => (&[Point, Line, Point, Line], true, false),
            ConstraintKind::EqualAngle => (&[Line, Line, Line, Line], true, false),
            ConstraintKind::EqualLineArcLength => (&[Line, Arc], true, false),
            ConstraintKind::Symmetric => (&[Point, Point, Workplane], true, false),
            ConstraintKind::SymmetricHorizontal => (&[Point, Point, Workplane], false, false),
            ConstraintKind::SymmetricVertical => (&[Point, Point, Workplane], false, false),
            ConstraintKind::SymmetricLine => (&[Point, Point, Line, Workplane], false, false),
            ConstraintKind::MidPoint => (&[Point, Point, Line], true, false),
            ConstraintKind::PointsHorizontal => (&[Point, Point], true, false),
            ConstraintKind::PointsVertical => (&[Point, Point], true, false),
            ConstraintKind::LineHorizontal => (&[Line], true, false),
            ConstraintKind::LineVertical => (&[Line], true, false),
            ConstraintKind::Diameter => (&[Circle], false, false),
            ConstraintKind::PointOnCircle => (&[Point, Circle], false, false),
            ConstraintKind::ArcLineTangent => (&[Arc, Line], false, false),
            ConstraintKind::EqualRadius => (&[Circle, Circle], false, false),
            ConstraintKind::Angle => (&[LineOrNormal, LineOrNormal], true, false),
            ConstraintKind::Perpendicular => (&[LineOrNormal, LineOrNormal], true, false),
            ConstraintKind::Parallel => (&[LineOrNormal, LineOrNormal], true, false),
            ConstraintKind::Colinear => (&[Line, Line], true, false),
            ConstraintKind::WhereDragged => (&[Point], true, false),
            ConstraintKind::PlaneCoincident => (&[Workplane], false, true),
            ConstraintKind::PlaneAlignment => (&[Workplane], false, true),
            ConstraintKind::AxialAlignment => (&[Workplane], false, true),
            ConstraintKind::SameOrientation => (&[Normal], false, true),
            ConstraintKind::MultiParallel => (&[LineOrNormal], false, true),
        };
        KindInfo {
            slots,
            optional_workplane,
            multi,
        }
    }

    /// Whether this kind can contribute parts to the fixed set.
    pub fn can_fix_parts(&self) -> bool {
        matches!(self, ConstraintKind::Locked)
    }

    /// Composite kinds whose pairing walks a chain instead of a star.
    pub fn cascades(&self) -> bool {
        matches!(
            self,
            ConstraintKind::PlaneCoincident | ConstraintKind::PlaneAlignment
        )
    }
}

/// Numeric properties and flags carried by a declaration. Kinds read only
/// the fields their translation uses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstraintProps {
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub offset: f64,
    /// Degrees.
    #[serde(default)]
    pub angle: f64,
    #[serde(default)]
    pub ratio: f64,
    #[serde(default)]
    pub difference: f64,
    #[serde(default)]
    pub diameter: f64,
    /// If set, the second angle is calculated as 180 - angle.
    #[serde(default)]
    pub supplement: bool,
    /// Tangent at the end point instead of the start point.
    #[serde(default)]
    pub at_end: bool,
    /// Chain successive elements instead of pairing against a reference.
    #[serde(default = "default_true")]
    pub cascade: bool,
    /// Also lock the rotation angle about the aligned axis.
    #[serde(default)]
    pub lock_angle: bool,
    /// Expand across every instance of a link array.
    #[serde(default)]
    pub multiply: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ConstraintProps {
    fn default() -> Self {
        Self {
            distance: 0.0,
            offset: 0.0,
            angle: 0.0,
            ratio: 0.0,
            difference: 0.0,
            diameter: 0.0,
            supplement: false,
            at_end: false,
            cascade: true,
            lock_angle: false,
            multiply: false,
        }
    }
}

/// One authored constraint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintDecl {
    pub id: ObjectId,
    pub name: String,
    pub kind: ConstraintKind,
    pub elements: Vec<ElementRef>,
    #[serde(default)]
    pub props: ConstraintProps,
    #[serde(default)]
    pub disabled: bool,
}

impl ConstraintDecl {
    pub fn new(name: impl Into<String>, kind: ConstraintKind, elements: Vec<ElementRef>) -> Self {
        Self {
            id: ObjectId::new(),
            name: name.into(),
            kind,
            elements,
            props: ConstraintProps::default(),
            disabled: false,
        }
    }

    /// Display form used in every log and error message.
    pub fn cstr_name(&self) -> String {
        format!("{}<{}>", self.name, self.kind)
    }
}

const ORDINALS: [&str; 7] = ["1st", "2nd", "3rd", "4th", "5th", "6th", "7th"];

pub(crate) fn ordinal(i: usize) -> &'static str {
    ORDINALS.get(i).copied().unwrap_or("nth")
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("constraint {name} has wrong number of elements {got}, expecting {expected}")]
    WrongElementCount {
        name: String,
        got: usize,
        expected: usize,
    },

    #[error("constraint {name} requires at least two elements")]
    TooFewElements { name: String },

    #[error("constraint {name} requires the {ordinal} element to be {expected}")]
    BadElementKind {
        name: String,
        ordinal: &'static str,
        expected: &'static str,
    },

    #[error(
        "constraint {name} requires the optional {ordinal} element to be \
         a planar face for defining a workplane"
    )]
    BadWorkplaneSlot { name: String, ordinal: &'static str },

    #[error("constraint {name} requires all elements to be {expected}")]
    MixedElements {
        name: String,
        expected: &'static str,
    },

    #[error("constraint {name} cannot lock the {ordinal} element, must be a vertex or linear edge")]
    NotLockable { name: String, ordinal: &'static str },

    #[error("element '{subpath}' is not {expected}")]
    ShapeMismatch {
        subpath: String,
        expected: &'static str,
    },
}

/// Resolve the effective slot list for an element count, accepting the
/// optional trailing workplane where a kind declares one.
pub fn effective_slots(
    kind: ConstraintKind,
    name: &str,
    count: usize,
    check_count: bool,
) -> Result<Vec<EntitySlot>, ValidationError> {
    let info = kind.info();
    if info.multi {
        return Ok(vec![info.slots[0]; count]);
    }
    if count == info.slots.len() {
        return Ok(info.slots.to_vec());
    }
    if !check_count && count < info.slots.len() {
        return Ok(info.slots[..count].to_vec());
    }
    if info.optional_workplane && count == info.slots.len() + 1 {
        let mut slots = info.slots.to_vec();
        slots.push(EntitySlot::Workplane);
        return Ok(slots);
    }
    Err(ValidationError::WrongElementCount {
        name: name.to_string(),
        got: count,
        expected: info.slots.len(),
    })
}

/// Applicability check for a constraint that will be expanded across an
/// array: at least two elements, the first matching the kind's first slot
/// and every further element matching the pairing slot.
pub fn check_multiplied(
    kind: ConstraintKind,
    name: &str,
    shapes: &[&ElementShape],
) -> Result<(), ValidationError> {
    let info = kind.info();
    if info.multi {
        return check(kind, name, shapes);
    }
    if shapes.len() < 2 {
        return Err(ValidationError::TooFewElements {
            name: name.to_string(),
        });
    }
    for (i, shape) in shapes.iter().enumerate() {
        let slot = info.slots[i.min(info.slots.len() - 1)];
        if let Some(expected) = entities::requirement(slot, shape) {
            return Err(ValidationError::BadElementKind {
                name: name.to_string(),
                ordinal: ordinal(i),
                expected,
            });
        }
    }
    Ok(())
}

/// Pre-flight applicability check against resolved shapes. Runs before any
/// solver entity is built.
pub fn check(
    kind: ConstraintKind,
    name: &str,
    shapes: &[&ElementShape],
) -> Result<(), ValidationError> {
    let info = kind.info();

    if kind == ConstraintKind::Locked {
        for (i, shape) in shapes.iter().enumerate() {
            if !matches!(
                shape,
                ElementShape::Vertex { .. } | ElementShape::LineSegment { .. }
            ) {
                return Err(ValidationError::NotLockable {
                    name: name.to_string(),
                    ordinal: ordinal(i),
                });
            }
        }
        return Ok(());
    }

    if info.multi {
        if shapes.len() < 2 {
            return Err(ValidationError::TooFewElements {
                name: name.to_string(),
            });
        }
        for shape in shapes {
            if let Some(expected) = entities::requirement(info.slots[0], shape) {
                return Err(ValidationError::MixedElements {
                    name: name.to_string(),
                    expected,
                });
            }
        }
        return Ok(());
    }

    let slots = effective_slots(kind, name, shapes.len(), false)?;
    for (i, (slot, shape)) in slots.iter().zip(shapes.iter()).enumerate() {
        if let Some(expected) = entities::requirement(*slot, shape) {
            if i == info.slots.len() {
                return Err(ValidationError::BadWorkplaneSlot {
                    name: name.to_string(),
                    ordinal: ordinal(i),
                });
            }
            return Err(ValidationError::BadElementKind {
                name: name.to_string(),
                ordinal: ordinal(i),
                expected,
            });
        }
    }
    Ok(())
}
