//! Redundancy accounting with auto-relax support.
//!
//! Constraint contributions are counted per unordered part pair and
//! redundancy class. A constraint spanning more than two parts decomposes
//! into implicit pairwise contributions; those are grouped through a
//! disjoint-set keyed by `(class, element)`, so a later explicit pair
//! constraint over the same elements merges with the implicit one instead of
//! double-counting.

use super::ConstraintKind;
use crate::adapter::{ElementRef, ObjectId, PartId};
use std::collections::HashMap;
use tracing::{info, warn};

/// Which per-pair budget a constraint kind counts against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RedundancyClass {
    Coincident,
    Alignment,
}

impl RedundancyClass {
    /// Per-class contribution limits. Empirical values reproduced from the
    /// source as-is; there is no general formula.
    pub fn limit(&self) -> usize {
        match self {
            RedundancyClass::Coincident => 2,
            RedundancyClass::Alignment => 3,
        }
    }
}

/// The class a kind counts against, if any.
pub fn class_of(kind: ConstraintKind) -> Option<RedundancyClass> {
    match kind {
        ConstraintKind::PlaneCoincident | ConstraintKind::AxialAlignment => {
            Some(RedundancyClass::Coincident)
        }
        ConstraintKind::PlaneAlignment => Some(RedundancyClass::Alignment),
        _ => None,
    }
}

/// Outcome of registering one more contribution for a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Below the limit; add the constraint normally.
    Added(usize),
    /// Exactly at the limit: this is the determining constraint; callers may
    /// degrade it to a lower-DOF form.
    Saturated(usize),
    /// Over the limit: redundant. Skip (warn) or, in auto-relax mode, reuse
    /// existing entities and log.
    Overflow,
}

type Node = (RedundancyClass, ElementRef);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PairKey {
    class: RedundancyClass,
    a: PartId,
    b: PartId,
}

impl PairKey {
    fn new(class: RedundancyClass, a: PartId, b: PartId) -> Self {
        if a <= b {
            Self { class, a, b }
        } else {
            Self { class, a: b, b: a }
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    #[allow(dead_code)]
    cstr: ObjectId,
    root: Node,
    implicit: bool,
}

/// Per-session contribution counter.
#[derive(Debug, Default)]
pub struct RedundancyTracker {
    parent: HashMap<Node, Node>,
    entries: HashMap<PairKey, Vec<Entry>>,
    /// Auto-relax mode: degrade instead of skipping on overflow.
    pub relax: bool,
}

impl RedundancyTracker {
    pub fn new(relax: bool) -> Self {
        Self {
            relax,
            ..Self::default()
        }
    }

    fn find(&mut self, node: Node) -> Node {
        let mut current = node.clone();
        loop {
            match self.parent.get(&current) {
                Some(p) if *p != current => current = p.clone(),
                _ => break,
            }
        }
        // path compression
        let root = current.clone();
        let mut walk = node;
        while let Some(p) = self.parent.get(&walk).cloned() {
            if p == root {
                break;
            }
            self.parent.insert(walk.clone(), root.clone());
            walk = p;
        }
        root
    }

    fn union(&mut self, a: Node, b: Node) -> Node {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra != rb {
            self.parent.insert(rb, ra.clone());
        }
        ra
    }

    /// Live contribution count for a pair, without adding anything.
    pub fn existing(&self, class: RedundancyClass, a: PartId, b: PartId) -> usize {
        self.entries
            .get(&PairKey::new(class, a, b))
            .map(|v| v.len())
            .unwrap_or(0)
    }

    /// Register `increment` contributions of `class` between two parts,
    /// grouped under the two participating elements.
    #[allow(clippy::too_many_arguments)]
    pub fn count(
        &mut self,
        class: RedundancyClass,
        increment: usize,
        cstr: ObjectId,
        e1: &ElementRef,
        e2: &ElementRef,
        a: PartId,
        b: PartId,
        implicit: bool,
    ) -> Verdict {
        let root = self.union((class, e1.clone()), (class, e2.clone()));
        let key = PairKey::new(class, a, b);

        // re-canonicalize stored roots, unions may have moved them
        let stale: Vec<Node> = self
            .entries
            .get(&key)
            .map(|entries| entries.iter().map(|e| e.root.clone()).collect())
            .unwrap_or_default();
        let fresh: Vec<Node> = stale.into_iter().map(|r| self.find(r)).collect();
        if let Some(entries) = self.entries.get_mut(&key) {
            for (entry, root) in entries.iter_mut().zip(fresh) {
                entry.root = root;
            }
        }

        let entries = self.entries.entry(key).or_default();
        if implicit {
            if !entries.iter().any(|e| e.root == root) {
                entries.push(Entry {
                    cstr,
                    root,
                    implicit: true,
                });
            }
        } else if let Some(entry) = entries.iter_mut().find(|e| e.implicit && e.root == root) {
            // the explicit constraint takes over the implicit contribution
            entry.cstr = cstr;
            entry.implicit = false;
        } else {
            for _ in 0..increment {
                entries.push(Entry {
                    cstr,
                    root: root.clone(),
                    implicit: false,
                });
            }
        }

        let total = entries.len();
        let limit = class.limit();
        if total > limit {
            Verdict::Overflow
        } else if total == limit {
            Verdict::Saturated(total)
        } else {
            Verdict::Added(total)
        }
    }

    /// Log a redundancy decision: a warning when the constraint is skipped,
    /// an informational note when it is auto-relaxed or degraded.
    pub fn report(&self, cstr_label: &str, first: &str, second: &str, skipped: bool) {
        if skipped {
            warn!("skip redundant {} between {} and {}", cstr_label, first, second);
        } else {
            info!("auto relax {} between {} and {}", cstr_label, first, second);
        }
    }
}
