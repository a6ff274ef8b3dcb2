//! In-memory host document used by the orchestrator tests.

use crate::adapter::{
    wire_point_index, AdapterError, ElementInfo, ElementRef, ElementShape, HostDocument, ObjectId,
    PartId,
};
use crate::constraint::ConstraintDecl;
use crate::geometry::{Placement, Point3};
use std::collections::HashMap;

pub struct TestPart {
    pub id: ObjectId,
    pub name: String,
    pub placement: Placement,
    pub elements: HashMap<String, ElementShape>,
    /// `Some` turns the part into a free-form wire.
    pub points: Option<Vec<Point3>>,
}

impl TestPart {
    pub fn new(name: &str) -> Self {
        Self {
            id: ObjectId::from_seed(name),
            name: name.to_string(),
            placement: Placement::identity(),
            elements: HashMap::new(),
            points: None,
        }
    }

    pub fn at(mut self, x: f64, y: f64, z: f64) -> Self {
        self.placement = Placement::translation(x, y, z);
        self
    }

    pub fn element(mut self, subpath: &str, shape: ElementShape) -> Self {
        self.elements.insert(subpath.to_string(), shape);
        self
    }

    pub fn wire(mut self, points: Vec<Point3>) -> Self {
        self.points = Some(points);
        self
    }

    pub fn part_id(&self) -> PartId {
        PartId::Solid(self.id)
    }

    pub fn element_ref(&self, subpath: &str) -> ElementRef {
        ElementRef::new(self.id, subpath)
    }
}

pub struct TestArray {
    pub id: ObjectId,
    pub name: String,
    pub count: usize,
    pub placements: Vec<Placement>,
    /// Elements of the (identical) child part, in child-local coordinates.
    pub elements: HashMap<String, ElementShape>,
}

impl TestArray {
    pub fn new(name: &str, placements: Vec<Placement>) -> Self {
        Self {
            id: ObjectId::from_seed(name),
            name: name.to_string(),
            count: placements.len(),
            placements,
            elements: HashMap::new(),
        }
    }

    pub fn element(mut self, subpath: &str, shape: ElementShape) -> Self {
        self.elements.insert(subpath.to_string(), shape);
        self
    }

    pub fn element_ref(&self, subpath: &str) -> ElementRef {
        ElementRef::new(self.id, subpath)
    }
}

#[derive(Default)]
pub struct TestDocument {
    pub assembly: ObjectId,
    pub parts: Vec<TestPart>,
    pub arrays: Vec<TestArray>,
    pub constraints: Vec<ConstraintDecl>,
    /// Host writes observed, for idempotence assertions.
    pub writes: usize,
}

impl TestDocument {
    pub fn new() -> Self {
        Self {
            assembly: ObjectId::from_seed("assembly"),
            ..Self::default()
        }
    }

    pub fn part(&self, name: &str) -> &TestPart {
        match self.parts.iter().find(|p| p.name == name) {
            Some(part) => part,
            None => panic!("no part {name}"),
        }
    }

    pub fn placement_of(&self, name: &str) -> Placement {
        self.part(name).placement
    }
}

impl HostDocument for TestDocument {
    fn resolve(&self, element: &ElementRef) -> Result<ElementInfo, AdapterError> {
        if let Some(part) = self.parts.iter().find(|p| p.id == element.container) {
            if let Some(points) = &part.points {
                let index = wire_point_index(&element.subpath).ok_or_else(|| {
                    AdapterError::NotAnElement {
                        container: element.container,
                        subpath: element.subpath.clone(),
                        reason: "wire parts only expose vertices".into(),
                    }
                })?;
                let position = *points.get(index).ok_or_else(|| AdapterError::NotAnElement {
                    container: element.container,
                    subpath: element.subpath.clone(),
                    reason: format!("wire has only {} points", points.len()),
                })?;
                return Ok(ElementInfo {
                    part: part.part_id(),
                    part_name: part.name.clone(),
                    placement: part.placement,
                    object: part.id,
                    subpath: element.subpath.clone(),
                    shape: ElementShape::Vertex { position },
                    pointwise: true,
                });
            }
            let shape = part
                .elements
                .get(&element.subpath)
                .ok_or_else(|| AdapterError::NotAnElement {
                    container: element.container,
                    subpath: element.subpath.clone(),
                    reason: "no such subelement".into(),
                })?
                .clone();
            return Ok(ElementInfo {
                part: part.part_id(),
                part_name: part.name.clone(),
                placement: part.placement,
                object: part.id,
                subpath: element.subpath.clone(),
                shape,
                pointwise: false,
            });
        }
        if let Some(array) = self.arrays.iter().find(|a| a.id == element.container) {
            let shape = array
                .elements
                .get(&element.subpath)
                .ok_or_else(|| AdapterError::NotAnElement {
                    container: element.container,
                    subpath: element.subpath.clone(),
                    reason: "no such subelement".into(),
                })?
                .clone();
            let placement = array
                .placements
                .first()
                .copied()
                .unwrap_or_else(Placement::identity);
            return Ok(ElementInfo {
                part: PartId::ArrayInstance {
                    array: array.id,
                    index: 0,
                },
                part_name: array.name.clone(),
                placement,
                object: array.id,
                subpath: element.subpath.clone(),
                shape,
                pointwise: false,
            });
        }
        Err(AdapterError::UnknownObject(element.container))
    }

    fn assemblies(&self) -> Vec<ObjectId> {
        vec![self.assembly]
    }

    fn assembly_parts(&self, _assembly: ObjectId) -> Vec<PartId> {
        let mut parts: Vec<PartId> = self.parts.iter().map(|p| p.part_id()).collect();
        for array in &self.arrays {
            for index in 0..array.placements.len() {
                parts.push(PartId::ArrayInstance {
                    array: array.id,
                    index,
                });
            }
        }
        parts
    }

    fn assembly_constraints(&self, _assembly: ObjectId) -> Vec<ConstraintDecl> {
        self.constraints.clone()
    }

    fn part_placement(&self, part: &PartId) -> Option<Placement> {
        match part {
            PartId::Solid(id) => self.parts.iter().find(|p| p.id == *id).map(|p| p.placement),
            PartId::ArrayInstance { array, index } => self
                .arrays
                .iter()
                .find(|a| a.id == *array)
                .and_then(|a| a.placements.get(*index).copied()),
        }
    }

    fn wire_points(&self, part: &PartId) -> Option<Vec<Point3>> {
        match part {
            PartId::Solid(id) => self
                .parts
                .iter()
                .find(|p| p.id == *id)
                .and_then(|p| p.points.clone()),
            PartId::ArrayInstance { .. } => None,
        }
    }

    fn array_count(&self, array: ObjectId) -> usize {
        self.arrays
            .iter()
            .find(|a| a.id == array)
            .map(|a| a.count)
            .unwrap_or(0)
    }

    fn set_array_count(&mut self, array: ObjectId, count: usize) {
        if let Some(array) = self.arrays.iter_mut().find(|a| a.id == array) {
            array.count = count;
        }
    }

    fn array_placements(&self, array: ObjectId) -> Vec<Placement> {
        self.arrays
            .iter()
            .find(|a| a.id == array)
            .map(|a| a.placements.clone())
            .unwrap_or_default()
    }

    fn set_placement(&mut self, part: &PartId, placement: Placement) {
        self.writes += 1;
        match part {
            PartId::Solid(id) => {
                if let Some(p) = self.parts.iter_mut().find(|p| p.id == *id) {
                    p.placement = placement;
                }
            }
            PartId::ArrayInstance { array, index } => {
                if let Some(a) = self.arrays.iter_mut().find(|a| a.id == *array) {
                    if a.placements.len() <= *index {
                        a.placements.resize(*index + 1, Placement::identity());
                    }
                    a.placements[*index] = placement;
                }
            }
        }
    }

    fn set_point_positions(&mut self, part: &PartId, points: &[(usize, Point3)]) {
        self.writes += 1;
        if let PartId::Solid(id) = part {
            if let Some(p) = self.parts.iter_mut().find(|p| p.id == *id) {
                if let Some(existing) = &mut p.points {
                    for (index, position) in points {
                        if let Some(slot) = existing.get_mut(*index) {
                            *slot = *position;
                        }
                    }
                }
            }
        }
    }
}
