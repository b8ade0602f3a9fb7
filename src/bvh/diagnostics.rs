//! Tree statistics and structural validation
//!
//! `stats` is a cheap snapshot for tuning; `validate` is a full
//! structural audit that collects every violated invariant into a
//! report instead of asserting. Both traversals are iterative and
//! cycle-checked, so they stay safe on a corrupt tree.
//!
//! Author: Moroya Sakamoto

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::node::{Node, NodeKind};
use super::tree::Bvh;
use crate::types::RECIP_EPSILON;

/// Snapshot of tree shape and occupancy
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BvhStats {
    /// Total live nodes (internal + leaves)
    pub node_count: u32,
    /// Leaf nodes, populated or empty
    pub leaf_count: u32,
    /// Deepest node, as traversal distance from the root
    pub max_depth: u32,
    /// `min / max` of the root children's subtree depths; `1.0` when
    /// either subtree is empty
    pub balance_factor: f32,
    /// Objects stored
    pub object_count: u32,
    /// Rough memory footprint of nodes and the id map, in bytes
    pub memory_bytes: usize,
}

/// A single violated structural invariant
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// A node is reachable through two different paths
    #[error("cycle: node {0} reached twice during traversal")]
    Cycle(u32),

    /// A child's parent link does not point at its actual parent
    #[error("node {child}: parent link does not match actual parent {parent}")]
    ParentMismatch {
        /// The child with the bad link
        child: u32,
        /// The node that actually owns it
        parent: u32,
    },

    /// The root carries a parent link
    #[error("root node {0} has a parent link")]
    RootHasParent(u32),

    /// A stored depth disagrees with the traversal distance
    #[error("node {node}: stored depth {stored} but distance from root is {actual}")]
    DepthMismatch {
        /// Offending node
        node: u32,
        /// Depth recorded on the node
        stored: u32,
        /// True distance from the root
        actual: u32,
    },

    /// A child index points at a freed or out-of-range slot
    #[error("node {node}: child index {child} is dead")]
    DeadChild {
        /// Parent holding the reference
        node: u32,
        /// The dead index
        child: u32,
    },

    /// An internal node's bounds do not cover its children
    #[error("node {0}: bounds do not cover children")]
    BoundsNotCovering(u32),

    /// The same object id appears in more than one leaf
    #[error("object id {0} appears in more than one leaf")]
    DuplicateId(u64),

    /// A leaf id is missing from the object map, or mapped elsewhere
    #[error("object id {0} is missing from or mismatched in the object map")]
    MapMismatch(u64),

    /// An id at or beyond the allocator watermark
    #[error("object id {0} was never allocated (next_id is {1})")]
    IdOutOfRange(u64, u64),

    /// A map entry points at a node that is not a leaf holding that id
    #[error("object map entry {0} points at node {1} which does not hold it")]
    StaleMapEntry(u64, u32),

    /// A live arena node is unreachable from the root
    #[error("node {0} is allocated but unreachable from the root")]
    UnreachableNode(u32),

    /// The stored object count disagrees with the leaf sweep
    #[error("count is {stored} but {actual} populated leaves exist")]
    CountMismatch {
        /// Count recorded on the tree
        stored: u32,
        /// Populated leaves found
        actual: u32,
    },
}

/// Result of a structural audit. `ok` iff `errors` is empty.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    /// True when no invariant is violated
    pub ok: bool,
    /// Every violation found, in traversal order
    pub errors: Vec<ValidationError>,
}

impl<P: Clone> Bvh<P> {
    /// Snapshot node counts, depth, balance and occupancy.
    ///
    /// Traversal is iterative with a visited-set cycle check, so a
    /// corrupt tree yields a truncated snapshot rather than a hang.
    pub fn stats(&self) -> BvhStats {
        let mut node_count = 0u32;
        let mut leaf_count = 0u32;
        let mut max_depth = 0u32;

        if let Some(root) = self.root {
            let mut visited: HashSet<u32> = HashSet::new();
            let mut stack = vec![(root, 0u32)];
            while let Some((index, depth)) = stack.pop() {
                if !visited.insert(index) {
                    log::warn!("cycle at node {} during stats traversal", index);
                    break;
                }
                let Some(node) = self.arena.get(index) else {
                    continue;
                };
                node_count += 1;
                max_depth = max_depth.max(depth);
                match &node.kind {
                    NodeKind::Leaf(_) => leaf_count += 1,
                    NodeKind::Internal { left, right } => {
                        stack.push((*left, depth + 1));
                        if let Some(r) = right {
                            stack.push((*r, depth + 1));
                        }
                    }
                }
            }
        }

        let balance_factor = self.root_balance();
        let memory_bytes = self.arena.slot_count() * std::mem::size_of::<Node<P>>()
            + self.object_map.len()
                * (std::mem::size_of::<u64>() + std::mem::size_of::<u32>());

        BvhStats {
            node_count,
            leaf_count,
            max_depth,
            balance_factor,
            object_count: self.count,
            memory_bytes,
        }
    }

    /// `min / max` of the root children's subtree depths; `1.0` when the
    /// root is a leaf or either subtree is missing.
    fn root_balance(&self) -> f32 {
        let Some(root) = self.root else {
            return 1.0;
        };
        let Some(NodeKind::Internal { left, right }) = self.arena.get(root).map(|n| &n.kind)
        else {
            return 1.0;
        };
        let Some(right) = right else {
            return 1.0;
        };
        let ld = self.subtree_depth(*left);
        let rd = self.subtree_depth(*right);
        if ld == 0 || rd == 0 {
            return 1.0;
        }
        ld.min(rd) as f32 / ld.max(rd) as f32
    }

    /// Height of a subtree in nodes (1 for a lone leaf), iterative and
    /// cycle-checked
    fn subtree_depth(&self, root: u32) -> u32 {
        let mut visited: HashSet<u32> = HashSet::new();
        let mut max = 0u32;
        let mut stack = vec![(root, 1u32)];
        while let Some((index, depth)) = stack.pop() {
            if !visited.insert(index) {
                break;
            }
            let Some(node) = self.arena.get(index) else {
                continue;
            };
            max = max.max(depth);
            if let NodeKind::Internal { left, right } = &node.kind {
                stack.push((*left, depth + 1));
                if let Some(r) = right {
                    stack.push((*r, depth + 1));
                }
            }
        }
        max
    }

    /// Audit every structural invariant and collect the violations.
    ///
    /// Never panics and never mutates; safe to call on a tree in any
    /// state, including one a validation failure describes.
    pub fn validate(&self) -> ValidationReport {
        let mut errors = Vec::new();
        let mut visited: HashSet<u32> = HashSet::new();
        let mut leaf_ids: HashMap<u64, u32> = HashMap::new();
        let mut populated_leaves = 0u32;

        if let Some(root) = self.root {
            if self.arena.get(root).is_some_and(|n| n.parent.is_some()) {
                errors.push(ValidationError::RootHasParent(root));
            }

            // (index, expected parent, expected depth)
            let mut stack: Vec<(u32, Option<u32>, u32)> = vec![(root, None, 0)];
            let cap = self.arena.slot_count() + 1;
            let mut steps = 0usize;

            while let Some((index, expected_parent, expected_depth)) = stack.pop() {
                steps += 1;
                if steps > cap * 2 {
                    errors.push(ValidationError::Cycle(index));
                    break;
                }
                if !visited.insert(index) {
                    errors.push(ValidationError::Cycle(index));
                    continue;
                }
                let Some(node) = self.arena.get(index) else {
                    if let Some(parent) = expected_parent {
                        errors.push(ValidationError::DeadChild {
                            node: parent,
                            child: index,
                        });
                    }
                    continue;
                };

                if let Some(parent) = expected_parent {
                    if node.parent != Some(parent) {
                        errors.push(ValidationError::ParentMismatch {
                            child: index,
                            parent,
                        });
                    }
                }
                if node.depth != expected_depth {
                    errors.push(ValidationError::DepthMismatch {
                        node: index,
                        stored: node.depth,
                        actual: expected_depth,
                    });
                }

                match &node.kind {
                    NodeKind::Leaf(Some(data)) => {
                        populated_leaves += 1;
                        if leaf_ids.insert(data.id, index).is_some() {
                            errors.push(ValidationError::DuplicateId(data.id));
                        }
                        if data.id >= self.next_id {
                            errors.push(ValidationError::IdOutOfRange(data.id, self.next_id));
                        }
                        if self.object_map.get(&data.id) != Some(&index) {
                            errors.push(ValidationError::MapMismatch(data.id));
                        }
                    }
                    NodeKind::Leaf(None) => {}
                    NodeKind::Internal { left, right } => {
                        let mut union = crate::types::Aabb::EMPTY;
                        if let Some(l) = self.arena.get(*left) {
                            union.expand_aabb(&l.bounds);
                        }
                        if let Some(r) = right.and_then(|r| self.arena.get(r)) {
                            union.expand_aabb(&r.bounds);
                        }
                        if union.is_valid() {
                            let covers = node.bounds.min.x <= union.min.x + RECIP_EPSILON
                                && node.bounds.min.y <= union.min.y + RECIP_EPSILON
                                && node.bounds.min.z <= union.min.z + RECIP_EPSILON
                                && node.bounds.max.x >= union.max.x - RECIP_EPSILON
                                && node.bounds.max.y >= union.max.y - RECIP_EPSILON
                                && node.bounds.max.z >= union.max.z - RECIP_EPSILON;
                            if !covers {
                                errors.push(ValidationError::BoundsNotCovering(index));
                            }
                        }
                        stack.push((*left, Some(index), expected_depth + 1));
                        if let Some(r) = right {
                            stack.push((*r, Some(index), expected_depth + 1));
                        }
                    }
                }
            }
        }

        // Map entries must mirror the leaf sweep
        for (&id, &index) in &self.object_map {
            let holds = self
                .arena
                .get(index)
                .and_then(|n| n.leaf_id())
                .is_some_and(|leaf_id| leaf_id == id);
            if !holds {
                errors.push(ValidationError::StaleMapEntry(id, index));
            }
        }

        // Every live arena node must be reachable
        for (index, _) in self.arena.iter() {
            if !visited.contains(&index) {
                errors.push(ValidationError::UnreachableNode(index));
            }
        }

        if populated_leaves != self.count {
            errors.push(ValidationError::CountMismatch {
                stored: self.count,
                actual: populated_leaves,
            });
        }

        ValidationReport {
            ok: errors.is_empty(),
            errors,
        }
    }
}
