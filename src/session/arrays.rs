//! Array creation and description

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{logged, Session};
use crate::error::{Result, StoreError};
use crate::path::{is_root, leaf_name, normalize_path, parent_path};
use crate::storage::{ArrayEntry, Extent, Node};
use crate::types::{ElementType, PersistedType, TypeClass};

/// Highest supported array rank
pub const MAX_RANK: usize = 32;

/// Upper bound for one chunk's uncompressed size (4 GiB)
pub const MAX_CHUNK_BYTES: u64 = 1 << 32;

/// Parameters for [`Session::create_array`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayCreateParams {
    pub path: String,
    pub element_type: ElementType,
    pub initial_dims: Vec<u64>,
    pub max_dims: Vec<Extent>,
    /// Required when any max dimension is unlimited
    pub chunk_dims: Option<Vec<u64>>,
    /// zstd level 0..=9 (clamped); `None` stores chunks uncompressed
    pub compression: Option<u8>,
}

impl ArrayCreateParams {
    pub fn new(path: impl Into<String>, element_type: ElementType) -> Self {
        Self {
            path: path.into(),
            element_type,
            initial_dims: Vec::new(),
            max_dims: Vec::new(),
            chunk_dims: None,
            compression: None,
        }
    }

    pub fn dims(mut self, initial: Vec<u64>, max: Vec<Extent>) -> Self {
        self.initial_dims = initial;
        self.max_dims = max;
        self
    }

    pub fn chunks(mut self, chunk_dims: Vec<u64>) -> Self {
        self.chunk_dims = Some(chunk_dims);
        self
    }

    pub fn compression(mut self, level: u8) -> Self {
        self.compression = Some(level.min(9));
        self
    }

    pub fn rank(&self) -> usize {
        self.initial_dims.len()
    }

    /// Shape checks that need no container.
    pub fn validate(&self) -> Result<()> {
        let path = normalize_path(&self.path);
        let rank = self.rank();

        if rank == 0 || rank > MAX_RANK {
            return Err(StoreError::params(&path, format!("rank {} outside 1..={}", rank, MAX_RANK)));
        }
        if self.max_dims.len() != rank {
            return Err(StoreError::params(
                &path,
                format!("max dims length {} != rank {}", self.max_dims.len(), rank),
            ));
        }
        for (d, (&cur, max)) in self.initial_dims.iter().zip(&self.max_dims).enumerate() {
            if !max.admits(cur) {
                return Err(StoreError::params(&path, format!("dim {}: initial {} exceeds max {}", d, cur, max)));
            }
        }

        let any_unlimited = self.max_dims.iter().any(|m| m.is_unlimited());
        match &self.chunk_dims {
            Some(chunks) => {
                if chunks.len() != rank {
                    return Err(StoreError::params(
                        &path,
                        format!("chunk dims length {} != rank {}", chunks.len(), rank),
                    ));
                }
                for (d, (&c, max)) in chunks.iter().zip(&self.max_dims).enumerate() {
                    if c == 0 {
                        return Err(StoreError::params(&path, format!("dim {}: chunk size is 0", d)));
                    }
                    if let Some(limit) = max.fixed() {
                        if c > limit {
                            return Err(StoreError::params(
                                &path,
                                format!("dim {}: chunk {} exceeds fixed max {}", d, c, limit),
                            ));
                        }
                    }
                }
            }
            None if any_unlimited => {
                return Err(StoreError::params(&path, "chunking is required for unlimited dimensions"));
            }
            None => {}
        }

        let chunk_bytes = self
            .effective_chunk_dims()
            .iter()
            .try_fold(self.element_type.size() as u64, |acc, &c| acc.checked_mul(c));
        match chunk_bytes {
            Some(bytes) if bytes <= MAX_CHUNK_BYTES => Ok(()),
            _ => Err(StoreError::params(&path, format!("chunk larger than {} bytes", MAX_CHUNK_BYTES))),
        }
    }

    /// Explicit chunk dims, or one chunk spanning the fixed maximum shape.
    fn effective_chunk_dims(&self) -> Vec<u64> {
        match &self.chunk_dims {
            Some(chunks) => chunks.clone(),
            None => self.max_dims.iter().map(|m| m.fixed().unwrap_or(1).max(1)).collect(),
        }
    }
}

/// Shape, type and storage layout of one array
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayDescriptor {
    pub path: String,
    pub rank: usize,
    pub dims: Vec<u64>,
    pub max_dims: Vec<Extent>,
    pub type_class: TypeClass,
    pub persisted_type: PersistedType,
    /// `None` when the stored type has no registry entry
    pub element_type: Option<ElementType>,
    pub element_size: usize,
    pub chunked: bool,
    pub chunk_dims: Vec<u64>,
    pub compression: Option<u8>,
}

impl ArrayDescriptor {
    fn from_entry(path: &str, entry: &ArrayEntry) -> Self {
        Self {
            path: path.to_string(),
            rank: entry.rank(),
            dims: entry.dims.clone(),
            max_dims: entry.max_dims.clone(),
            type_class: entry.ty.class,
            persisted_type: entry.ty,
            element_type: ElementType::from_persisted(&entry.ty),
            element_size: entry.element_size(),
            chunked: entry.chunked,
            chunk_dims: if entry.chunked { entry.chunk_dims.clone() } else { Vec::new() },
            compression: entry.compression,
        }
    }

    /// Whether dimension `dim` can grow without bound.
    pub fn is_extendible(&self, dim: usize) -> bool {
        self.max_dims.get(dim).map_or(false, |m| m.is_unlimited())
    }

    pub fn element_count(&self) -> u64 {
        self.dims.iter().product()
    }
}

impl Session {
    /// Create an array. Parent groups are created as needed; an existing
    /// node at the path is never replaced.
    pub fn create_array(&mut self, params: &ArrayCreateParams) -> Result<()> {
        let path = normalize_path(&params.path);
        let result = self.create_array_inner(&path, params);
        logged("create_array", &path, result)
    }

    fn create_array_inner(&mut self, path: &str, params: &ArrayCreateParams) -> Result<()> {
        self.container()?;
        if path.is_empty() || is_root(path) {
            return Err(StoreError::InvalidPath(params.path.clone()));
        }
        params.validate()?;
        if self.exists(path) {
            return Err(StoreError::PathExists(path.to_string()));
        }

        let parent = parent_path(path);
        self.ensure_group(&parent)?;

        let entry = ArrayEntry {
            ty: params.element_type.persisted(),
            dims: params.initial_dims.clone(),
            max_dims: params.max_dims.clone(),
            chunk_dims: params.effective_chunk_dims(),
            chunked: params.chunk_dims.is_some(),
            compression: params.compression.map(|l| l.min(9)),
            chunks: BTreeMap::new(),
            needs_tail_scrub: false,
        };

        let catalog = self.container_mut()?.catalog_mut();
        let id = catalog.add_array(entry);
        if let Err(e) = catalog.insert_child(&parent, leaf_name(path), Node::Array(id)) {
            catalog.forget_array(id);
            return Err(e);
        }

        self.flush_after_mutation("create_array", path);
        info!(
            "Created array {} type={} dims={:?} max={:?} chunks={:?}",
            path,
            params.element_type,
            params.initial_dims,
            params.max_dims,
            params.chunk_dims
        );
        Ok(())
    }

    /// Describe the array at `path`.
    pub fn describe(&self, path: &str) -> Result<ArrayDescriptor> {
        let p = normalize_path(path);
        let result = self.array_ref(&p).map(|(_, entry)| ArrayDescriptor::from_entry(&p, entry));
        logged("describe", &p, result)
    }

    /// Bytes per element
    pub fn element_byte_size(&self, path: &str) -> Result<usize> {
        let p = normalize_path(path);
        self.array_ref(&p).map(|(_, e)| e.element_size())
    }

    /// Product of the current dimensions
    pub fn element_count(&self, path: &str) -> Result<u64> {
        let p = normalize_path(path);
        self.array_ref(&p).map(|(_, e)| e.element_count())
    }

    /// Bytes of committed chunk storage. Unwritten chunks take no space,
    /// so this can be less than the logical size.
    pub fn storage_byte_size(&self, path: &str) -> Result<u64> {
        let p = normalize_path(path);
        self.array_ref(&p).map(|(_, e)| e.stored_bytes())
    }

    /// Registry name of the stored element type.
    pub fn array_type_name(&self, path: &str) -> Result<&'static str> {
        let p = normalize_path(path);
        let (_, entry) = self.array_ref(&p)?;
        ElementType::from_persisted(&entry.ty)
            .map(ElementType::name)
            .ok_or_else(|| StoreError::UnsupportedType(entry.ty.to_string()))
    }

    /// Strict check of the stored type against a type name.
    pub fn array_matches_type(&self, path: &str, type_text: &str) -> bool {
        match (ElementType::from_name(type_text), self.array_type_name(path)) {
            (Some(want), Ok(have)) => want.name() == have,
            _ => false,
        }
    }

    /// True when the array has the given rank and type class and can
    /// grow along its first dimension.
    pub fn can_append_along_first_dim(&self, path: &str, rank: usize, class: TypeClass) -> bool {
        let p = normalize_path(path);
        match self.array_ref(&p) {
            Ok((_, e)) => e.rank() == rank && e.ty.class == class && e.max_dims[0].is_unlimited(),
            Err(_) => false,
        }
    }
}
