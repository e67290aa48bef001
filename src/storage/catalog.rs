//! Container catalog: the node tree and the array table
//!
//! The catalog is kept in memory while a container is open and written as
//! a single bincode blob on every flush.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::path::split_path;
use crate::types::PersistedType;

pub type ArrayId = u64;

/// Maximum length of one array dimension
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Extent {
    Fixed(u64),
    Unlimited,
}

impl Extent {
    pub fn is_unlimited(self) -> bool {
        matches!(self, Extent::Unlimited)
    }

    /// Whether a current length of `len` is allowed.
    pub fn admits(self, len: u64) -> bool {
        match self {
            Extent::Fixed(max) => len <= max,
            Extent::Unlimited => true,
        }
    }

    pub fn fixed(self) -> Option<u64> {
        match self {
            Extent::Fixed(max) => Some(max),
            Extent::Unlimited => None,
        }
    }
}

impl std::fmt::Display for Extent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Extent::Fixed(n) => write!(f, "{}", n),
            Extent::Unlimited => f.write_str("unlimited"),
        }
    }
}

/// Location of one stored chunk blob
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSlot {
    pub offset: u64,
    pub stored_len: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayEntry {
    pub ty: PersistedType,
    pub dims: Vec<u64>,
    pub max_dims: Vec<Extent>,
    pub chunk_dims: Vec<u64>,
    /// False for fixed-shape arrays created without explicit chunking
    pub chunked: bool,
    pub compression: Option<u8>,
    /// Chunk grid coordinates -> stored blob
    pub chunks: BTreeMap<Vec<u64>, ChunkSlot>,
    /// Set by a shrink; cleared once stale bytes past the extent are zeroed
    pub needs_tail_scrub: bool,
}

impl ArrayEntry {
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn element_size(&self) -> usize {
        self.ty.size as usize
    }

    pub fn chunk_elements(&self) -> u64 {
        self.chunk_dims.iter().product()
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_elements() as usize * self.element_size()
    }

    pub fn element_count(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Bytes of committed chunk blobs
    pub fn stored_bytes(&self) -> u64 {
        self.chunks.values().map(|s| s.stored_len).sum()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupNode {
    pub children: BTreeMap<String, Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Group(GroupNode),
    Array(ArrayId),
    NamedType(PersistedType),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    root: Node,
    arrays: BTreeMap<ArrayId, ArrayEntry>,
    next_array_id: ArrayId,
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

impl Catalog {
    pub fn new() -> Self {
        Self {
            root: Node::Group(GroupNode::default()),
            arrays: BTreeMap::new(),
            next_array_id: 1,
        }
    }

    /// Node at a normalized path; `"/"` is the root group.
    pub fn node(&self, path: &str) -> Option<&Node> {
        let mut cur = &self.root;
        for segment in split_path(path) {
            cur = match cur {
                Node::Group(g) => g.children.get(segment)?,
                _ => return None,
            };
        }
        Some(cur)
    }

    pub fn group(&self, path: &str) -> Option<&GroupNode> {
        match self.node(path)? {
            Node::Group(g) => Some(g),
            _ => None,
        }
    }

    fn group_mut(&mut self, path: &str) -> Option<&mut GroupNode> {
        let mut cur = &mut self.root;
        for segment in split_path(path) {
            cur = match cur {
                Node::Group(g) => g.children.get_mut(segment)?,
                _ => return None,
            };
        }
        match cur {
            Node::Group(g) => Some(g),
            _ => None,
        }
    }

    /// Link `node` as `name` under the group at `parent`.
    pub fn insert_child(&mut self, parent: &str, name: &str, node: Node) -> Result<()> {
        let group = self
            .group_mut(parent)
            .ok_or_else(|| StoreError::PathNotFound(parent.to_string()))?;
        if group.children.contains_key(name) {
            return Err(StoreError::PathExists(name.to_string()));
        }
        group.children.insert(name.to_string(), node);
        Ok(())
    }

    /// Unlink the node at `parent/name`; array entries are dropped with it.
    pub fn remove_child(&mut self, parent: &str, name: &str) -> Option<Node> {
        let removed = self.group_mut(parent)?.children.remove(name)?;
        if let Node::Array(id) = removed {
            self.arrays.remove(&id);
        }
        Some(removed)
    }

    pub fn add_array(&mut self, entry: ArrayEntry) -> ArrayId {
        let id = self.next_array_id;
        self.next_array_id += 1;
        self.arrays.insert(id, entry);
        id
    }

    /// Drop an array entry that was never linked into the tree.
    pub fn forget_array(&mut self, id: ArrayId) -> Option<ArrayEntry> {
        self.arrays.remove(&id)
    }

    pub fn array(&self, id: ArrayId) -> Option<&ArrayEntry> {
        self.arrays.get(&id)
    }

    pub fn array_mut(&mut self, id: ArrayId) -> Option<&mut ArrayEntry> {
        self.arrays.get_mut(&id)
    }

    /// Array id and entry at a normalized path
    pub fn array_at(&self, path: &str) -> Option<(ArrayId, &ArrayEntry)> {
        match self.node(path)? {
            Node::Array(id) => self.arrays.get(id).map(|e| (*id, e)),
            _ => None,
        }
    }

    pub fn array_count(&self) -> usize {
        self.arrays.len()
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let catalog: Catalog = bincode::deserialize(bytes)
            .map_err(|e| StoreError::Corrupt(format!("catalog decode failed: {}", e)))?;
        if !matches!(catalog.root, Node::Group(_)) {
            return Err(StoreError::Corrupt("catalog root is not a group".into()));
        }
        Ok(catalog)
    }
}
