//! # Incremental Merkle Tree (IMT)
//!
//! A fixed-depth, fixed-arity Merkle tree over field elements holding the
//! identity commitments of a group. Leaves are appended at the next free
//! index and may later be overwritten (removal writes the zero value, so
//! indices stay stable for the lifetime of the tree).
//!
//! ## Algorithm
//!
//! Level 0 holds the leaves. A node at level `l + 1` is
//! `H(child_0, ..., child_{arity-1})` over its `arity` children at level `l`.
//! Positions that were never written read as the precomputed zero subtree
//! root for their level, so the tree only stores nodes covering `[0, size)`
//! and every mutation rehashes exactly one path: O(depth · arity) hashes.
//!
//! ## Security Invariant
//!
//! Mutations are computed in full before storage is touched. A rejected
//! `insert` or `update` leaves the tree byte-for-byte unchanged, and the
//! `preview_*` methods return the root a mutation would produce without
//! applying it.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use rln_core::{FieldElement, FieldHasher};

/// Default tree depth (2^15 = 32768 members).
pub const DEFAULT_DEPTH: usize = 15;

/// Default tree arity.
pub const DEFAULT_ARITY: usize = 2;

/// Deepest tree accepted by [`TreeConfig::validate`].
pub const MAX_DEPTH: usize = 32;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors from tree operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    /// Every leaf slot is already allocated.
    #[error("tree capacity of {capacity} leaves exhausted")]
    CapacityExceeded {
        /// Maximum number of leaves.
        capacity: usize,
    },

    /// The index does not refer to an allocated leaf.
    #[error("leaf index {index} out of range (size {size})")]
    IndexOutOfRange {
        /// Requested index.
        index: usize,
        /// Current number of allocated leaves.
        size: usize,
    },

    /// No live leaf holds the requested value.
    #[error("leaf {0} not found")]
    NotFound(String),

    /// Only the most recently inserted leaf can be rolled back.
    #[error("cannot roll back leaf {index}: last inserted index is {last:?}")]
    NotLastInsert {
        /// Requested index.
        index: usize,
        /// Index of the last allocated leaf, if any.
        last: Option<usize>,
    },

    /// The tree shape is unusable.
    #[error("invalid tree configuration: {0}")]
    InvalidConfig(String),
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Shape of a tree: depth, arity, and the value of unused leaves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Number of levels above the leaves.
    pub depth: usize,
    /// Children per node.
    pub arity: usize,
    /// Value of unoccupied and removed leaves.
    pub zero_value: FieldElement,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            depth: DEFAULT_DEPTH,
            arity: DEFAULT_ARITY,
            zero_value: FieldElement::zero(),
        }
    }
}

impl TreeConfig {
    /// Check the shape and return the leaf capacity `arity^depth`.
    pub fn validate(&self) -> Result<usize, TreeError> {
        if self.depth == 0 || self.depth > MAX_DEPTH {
            return Err(TreeError::InvalidConfig(format!(
                "depth must be in 1..={MAX_DEPTH}, got {}",
                self.depth
            )));
        }
        if self.arity < 2 {
            return Err(TreeError::InvalidConfig(format!(
                "arity must be at least 2, got {}",
                self.arity
            )));
        }
        u32::try_from(self.depth)
            .ok()
            .and_then(|depth| self.arity.checked_pow(depth))
            .ok_or_else(|| {
                TreeError::InvalidConfig(format!(
                    "arity {} at depth {} overflows the index space",
                    self.arity, self.depth
                ))
            })
    }
}

// ---------------------------------------------------------------------------
// Proofs
// ---------------------------------------------------------------------------

/// One level of a Merkle path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathStep {
    /// The other `arity - 1` children of the parent, in position order.
    pub siblings: Vec<FieldElement>,
    /// Position of the path node among its parent's children
    /// (for a binary tree: 0 = left, 1 = right).
    pub position: usize,
}

/// Inclusion proof for one leaf against one root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleProof {
    /// The proven leaf value.
    pub leaf: FieldElement,
    /// Index of the leaf.
    pub leaf_index: usize,
    /// Root the proof was generated against.
    pub root: FieldElement,
    /// Path from the leaf level upward; exactly `depth` steps.
    pub path: Vec<PathStep>,
}

impl MerkleProof {
    /// Number of (siblings, direction) steps.
    pub fn len(&self) -> usize {
        self.path.len()
    }

    /// Whether the proof has no steps.
    pub fn is_empty(&self) -> bool {
        self.path.is_empty()
    }

    /// All siblings flattened bottom-up, the layout program inputs expect.
    pub fn siblings(&self) -> Vec<FieldElement> {
        self.path
            .iter()
            .flat_map(|step| step.siblings.iter().cloned())
            .collect()
    }

    /// Direction of each step, bottom-up.
    pub fn path_indices(&self) -> Vec<usize> {
        self.path.iter().map(|step| step.position).collect()
    }

    /// Verify the proof and additionally require it to target `root`.
    pub fn verify_against(&self, root: &FieldElement, hasher: &dyn FieldHasher) -> bool {
        &self.root == root && verify_proof(self, hasher)
    }
}

/// Recompute the root a proof's path leads to. `None` for a malformed path.
pub fn compute_proof_root(proof: &MerkleProof, hasher: &dyn FieldHasher) -> Option<FieldElement> {
    let mut node = proof.leaf.clone();
    for step in &proof.path {
        if step.position > step.siblings.len() {
            return None;
        }
        let mut children = Vec::with_capacity(step.siblings.len() + 1);
        children.extend_from_slice(&step.siblings[..step.position]);
        children.push(node);
        children.extend_from_slice(&step.siblings[step.position..]);
        node = hasher.hash(&children);
    }
    Some(node)
}

/// Verify that the proof's path hashes from its leaf to its recorded root.
pub fn verify_proof(proof: &MerkleProof, hasher: &dyn FieldHasher) -> bool {
    compute_proof_root(proof, hasher).as_ref() == Some(&proof.root)
}

/// Compute a root from scratch over an explicit leaf list.
///
/// Reference computation used to cross-check the incremental tree.
pub fn compute_root_from_leaves(
    config: &TreeConfig,
    hasher: &dyn FieldHasher,
    leaves: &[FieldElement],
) -> Result<FieldElement, TreeError> {
    let capacity = config.validate()?;
    if leaves.len() > capacity {
        return Err(TreeError::CapacityExceeded { capacity });
    }
    let zeroes = zero_roots(config, hasher);
    let mut level: Vec<FieldElement> = leaves.to_vec();
    for zero in zeroes.iter().take(config.depth) {
        if level.is_empty() {
            // Only zero subtrees remain from here up.
            level.push(zero.clone());
        }
        let mut next = Vec::with_capacity(level.len().div_ceil(config.arity));
        for chunk in level.chunks(config.arity) {
            let mut children = chunk.to_vec();
            children.resize(config.arity, zero.clone());
            next.push(hasher.hash(&children));
        }
        level = next;
    }
    Ok(level.swap_remove(0))
}

/// Roots of all-zero subtrees; entry `l` is the empty node at level `l`.
fn zero_roots(config: &TreeConfig, hasher: &dyn FieldHasher) -> Vec<FieldElement> {
    let mut zeroes = Vec::with_capacity(config.depth + 1);
    zeroes.push(config.zero_value.clone());
    for level in 0..config.depth {
        let children = vec![zeroes[level].clone(); config.arity];
        zeroes.push(hasher.hash(&children));
    }
    zeroes
}

// ---------------------------------------------------------------------------
// The tree
// ---------------------------------------------------------------------------

/// A computed-but-unapplied path: node values at levels `0..depth` plus the root.
struct PathUpdate {
    index: usize,
    nodes: Vec<FieldElement>,
    root: FieldElement,
}

/// Incremental Merkle tree with append, update, lookup, and proofs.
#[derive(Clone)]
pub struct IncrementalMerkleTree {
    config: TreeConfig,
    capacity: usize,
    hasher: Arc<dyn FieldHasher>,
    zeroes: Vec<FieldElement>,
    /// `levels[l]` covers positions `[0, ceil(size / arity^l))` at level `l`.
    levels: Vec<Vec<FieldElement>>,
    root: FieldElement,
    size: usize,
    positions: HashMap<FieldElement, usize>,
}

impl std::fmt::Debug for IncrementalMerkleTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncrementalMerkleTree")
            .field("depth", &self.config.depth)
            .field("arity", &self.config.arity)
            .field("size", &self.size)
            .field("root", &self.root)
            .field("hasher", &self.hasher.name())
            .finish()
    }
}

impl IncrementalMerkleTree {
    /// Create an empty tree. Zero subtree roots are computed once here.
    pub fn new(config: TreeConfig, hasher: Arc<dyn FieldHasher>) -> Result<Self, TreeError> {
        let capacity = config.validate()?;
        let zeroes = zero_roots(&config, hasher.as_ref());
        let root = zeroes[config.depth].clone();
        Ok(Self {
            levels: vec![Vec::new(); config.depth],
            config,
            capacity,
            hasher,
            zeroes,
            root,
            size: 0,
            positions: HashMap::new(),
        })
    }

    /// Current root.
    pub fn root(&self) -> &FieldElement {
        &self.root
    }

    /// Root of the tree with no leaves.
    pub fn empty_root(&self) -> &FieldElement {
        &self.zeroes[self.config.depth]
    }

    /// Number of allocated leaf slots (live or removed).
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of leaves not equal to the zero value.
    pub fn live_count(&self) -> usize {
        self.levels[0]
            .iter()
            .filter(|leaf| **leaf != self.config.zero_value)
            .count()
    }

    /// Maximum number of leaves (`arity^depth`).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tree shape.
    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// The hasher this tree was built with.
    pub fn hasher(&self) -> &Arc<dyn FieldHasher> {
        &self.hasher
    }

    /// Leaf value at `index`.
    pub fn leaf(&self, index: usize) -> Result<&FieldElement, TreeError> {
        self.levels[0].get(index).ok_or(TreeError::IndexOutOfRange {
            index,
            size: self.size,
        })
    }

    /// Whether the slot at `index` holds the zero value.
    pub fn is_vacant(&self, index: usize) -> Result<bool, TreeError> {
        Ok(*self.leaf(index)? == self.config.zero_value)
    }

    /// Append `leaf` at index `size`. Returns the assigned index.
    pub fn insert(&mut self, leaf: FieldElement) -> Result<usize, TreeError> {
        let update = self.plan_insert(&leaf)?;
        let index = update.index;
        self.apply(update);
        self.index_leaf(leaf, index);
        self.size += 1;
        Ok(index)
    }

    /// Overwrite the leaf at `index`. Removal is `update(index, zero_value)`.
    pub fn update(&mut self, index: usize, value: FieldElement) -> Result<(), TreeError> {
        let update = self.plan_update(index, &value)?;
        let previous = self.levels[0][index].clone();
        if self.positions.get(&previous) == Some(&index) {
            self.positions.remove(&previous);
        }
        self.apply(update);
        self.index_leaf(value, index);
        Ok(())
    }

    /// Write the zero value at `index`.
    pub fn remove(&mut self, index: usize) -> Result<(), TreeError> {
        self.update(index, self.config.zero_value.clone())
    }

    /// Undo the most recent `insert`, releasing its slot for reuse.
    ///
    /// Only valid for the last allocated index. Used to compensate an
    /// insertion that was never confirmed, so the next insert lands on the
    /// same index the ledger will assign.
    pub fn rollback_insert(&mut self, index: usize) -> Result<(), TreeError> {
        let last = self.size.checked_sub(1);
        if last != Some(index) {
            return Err(TreeError::NotLastInsert { index, last });
        }
        self.update(index, self.config.zero_value.clone())?;
        self.size = index;
        for (level, nodes) in self.levels.iter_mut().enumerate() {
            let span = self.config.arity.pow(level as u32);
            nodes.truncate(self.size.div_ceil(span));
        }
        Ok(())
    }

    /// Index of the live leaf holding `leaf`.
    pub fn index_of(&self, leaf: &FieldElement) -> Result<usize, TreeError> {
        self.positions
            .get(leaf)
            .copied()
            .ok_or_else(|| TreeError::NotFound(leaf.abbreviated()))
    }

    /// Root the tree would have after `insert(leaf)`.
    pub fn preview_insert(&self, leaf: &FieldElement) -> Result<FieldElement, TreeError> {
        Ok(self.plan_insert(leaf)?.root)
    }

    /// Root the tree would have after `update(index, value)`.
    pub fn preview_update(
        &self,
        index: usize,
        value: &FieldElement,
    ) -> Result<FieldElement, TreeError> {
        Ok(self.plan_update(index, value)?.root)
    }

    /// Inclusion proof for the leaf at `index` against the current root.
    pub fn create_proof(&self, index: usize) -> Result<MerkleProof, TreeError> {
        let leaf = self.leaf(index)?.clone();
        let arity = self.config.arity;
        let mut path = Vec::with_capacity(self.config.depth);
        let mut position = index;
        for level in 0..self.config.depth {
            let first = position - position % arity;
            let siblings = (first..first + arity)
                .filter(|p| *p != position)
                .map(|p| self.node(level, p))
                .collect();
            path.push(PathStep {
                siblings,
                position: position % arity,
            });
            position /= arity;
        }
        Ok(MerkleProof {
            leaf,
            leaf_index: index,
            root: self.root.clone(),
            path,
        })
    }

    // ─── Internals ───────────────────────────────────────────────────

    fn node(&self, level: usize, position: usize) -> FieldElement {
        self.levels[level]
            .get(position)
            .cloned()
            .unwrap_or_else(|| self.zeroes[level].clone())
    }

    fn plan_insert(&self, leaf: &FieldElement) -> Result<PathUpdate, TreeError> {
        if self.size >= self.capacity {
            return Err(TreeError::CapacityExceeded {
                capacity: self.capacity,
            });
        }
        Ok(self.plan_path(self.size, leaf))
    }

    fn plan_update(&self, index: usize, value: &FieldElement) -> Result<PathUpdate, TreeError> {
        if index >= self.size {
            return Err(TreeError::IndexOutOfRange {
                index,
                size: self.size,
            });
        }
        Ok(self.plan_path(index, value))
    }

    fn plan_path(&self, index: usize, leaf: &FieldElement) -> PathUpdate {
        let arity = self.config.arity;
        let mut nodes = Vec::with_capacity(self.config.depth);
        let mut node = leaf.clone();
        let mut position = index;
        for level in 0..self.config.depth {
            let first = position - position % arity;
            let children: Vec<FieldElement> = (first..first + arity)
                .map(|p| {
                    if p == position {
                        node.clone()
                    } else {
                        self.node(level, p)
                    }
                })
                .collect();
            nodes.push(node);
            node = self.hasher.hash(&children);
            position /= arity;
        }
        PathUpdate {
            index,
            nodes,
            root: node,
        }
    }

    fn apply(&mut self, update: PathUpdate) {
        let mut position = update.index;
        for (level, value) in update.nodes.into_iter().enumerate() {
            let nodes = &mut self.levels[level];
            if nodes.len() <= position {
                nodes.resize(position + 1, self.zeroes[level].clone());
            }
            nodes[position] = value;
            position /= self.config.arity;
        }
        self.root = update.root;
    }

    fn index_leaf(&mut self, leaf: FieldElement, index: usize) {
        if leaf != self.config.zero_value {
            self.positions.insert(leaf, index);
        }
    }
}
