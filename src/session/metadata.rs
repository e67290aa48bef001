//! Provenance metadata groups
//!
//! A metadata group holds four parallel 1-D arrays, one element per
//! capture run. All four always have the same length; extension happens
//! for all of them before any value is written.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{logged, require_path, ArrayCreateParams, NodeType, Session};
use crate::error::{Result, SchemaIssue, StoreError};
use crate::path::{is_root, join_path, normalize_path};
use crate::storage::{Extent, Hyperslab};
use crate::types::ElementType;

/// Member arrays of a metadata group with their element types
pub const METADATA_MEMBERS: [(&str, ElementType); 4] = [
    ("first_trace", ElementType::UInt64),
    ("trace_count", ElementType::UInt64),
    ("timestamp", ElementType::Utf8),
    ("settings", ElementType::Utf8),
];

/// One run of captured traces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataRecord {
    pub first_trace: u64,
    pub trace_count: u64,
    pub timestamp: String,
    pub settings: String,
}

/// Result of inspecting a would-be metadata group without changing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataStatus {
    Valid { records: u64 },
    /// Nothing exists at the path
    Absent,
    /// Group exists; these members are missing and can be created
    Incomplete { missing: Vec<String> },
    /// Something exists with the wrong kind, shape, type or length
    Conflicting { reasons: Vec<String> },
}

impl MetadataStatus {
    pub fn is_valid(&self) -> bool {
        matches!(self, MetadataStatus::Valid { .. })
    }

    /// Whether `ensure_metadata_group` can make the group valid.
    pub fn is_repairable(&self) -> bool {
        !matches!(self, MetadataStatus::Conflicting { .. })
    }
}

impl Session {
    /// Check one member array against the schema.
    fn metadata_member_issue(&self, group: &str, name: &str, ty: ElementType) -> Option<SchemaIssue> {
        let path = join_path(group, name);
        match self.node_type(&path) {
            NodeType::Missing => return Some(SchemaIssue::Missing(name.to_string())),
            NodeType::Array => {}
            other => return Some(SchemaIssue::Conflict(format!("{} is a {}, not an array", path, other))),
        }
        let (_, entry) = match self.array_ref(&path) {
            Ok(found) => found,
            Err(e) => return Some(SchemaIssue::Conflict(format!("{}: {}", path, e))),
        };

        if entry.rank() != 1 {
            return Some(SchemaIssue::Conflict(format!("{} has rank {}, expected 1", path, entry.rank())));
        }
        if !entry.max_dims[0].is_unlimited() {
            return Some(SchemaIssue::Conflict(format!("{} is not extendible (max {})", path, entry.max_dims[0])));
        }
        if ElementType::from_persisted(&entry.ty) != Some(ty) {
            return Some(SchemaIssue::Conflict(format!("{} has type {}, expected {}", path, entry.ty, ty)));
        }
        None
    }

    fn metadata_lengths(&self, group: &str) -> Result<[u64; 4]> {
        let mut lengths = [0u64; 4];
        for (slot, (name, _)) in lengths.iter_mut().zip(METADATA_MEMBERS) {
            let (_, entry) = self.array_ref(&join_path(group, name))?;
            *slot = entry.dims[0];
        }
        Ok(lengths)
    }

    /// Classify the node at `path` as a metadata group.
    pub fn metadata_group_status(&self, path: &str) -> Result<MetadataStatus> {
        let p = require_path(path)?;
        self.container()?;

        match self.node_type(&p) {
            NodeType::Missing => return Ok(MetadataStatus::Absent),
            NodeType::Group => {}
            other => {
                return Ok(MetadataStatus::Conflicting { reasons: vec![format!("{} is a {}, not a group", p, other)] });
            }
        }

        let mut missing = Vec::new();
        let mut reasons = Vec::new();
        for (name, ty) in METADATA_MEMBERS {
            match self.metadata_member_issue(&p, name, ty) {
                None => {}
                Some(SchemaIssue::Missing(m)) => missing.push(m),
                Some(issue) => reasons.push(issue.to_string()),
            }
        }
        if !reasons.is_empty() {
            return Ok(MetadataStatus::Conflicting { reasons });
        }
        if !missing.is_empty() {
            return Ok(MetadataStatus::Incomplete { missing });
        }

        let [first_trace, trace_count, timestamp, settings] = self.metadata_lengths(&p)?;
        if first_trace == trace_count && first_trace == timestamp && first_trace == settings {
            Ok(MetadataStatus::Valid { records: first_trace })
        } else {
            let issue = SchemaIssue::LengthMismatch { first_trace, trace_count, timestamp, settings };
            Ok(MetadataStatus::Conflicting { reasons: vec![issue.to_string()] })
        }
    }

    /// Read-only schema check; returns the common record count.
    pub fn validate_metadata_group(&self, path: &str) -> Result<u64> {
        let p = normalize_path(path);
        logged("validate_metadata_group", &p, self.validate_metadata_group_inner(&p))
    }

    fn validate_metadata_group_inner(&self, p: &str) -> Result<u64> {
        self.container()?;
        if p.is_empty() {
            return Err(StoreError::InvalidPath(p.to_string()));
        }
        match self.node_type(p) {
            NodeType::Group => {}
            NodeType::Missing => return Err(StoreError::schema(p, SchemaIssue::Missing(p.to_string()))),
            found => return Err(StoreError::WrongKind { path: p.to_string(), expected: "group", found }),
        }

        for (name, ty) in METADATA_MEMBERS {
            if let Some(issue) = self.metadata_member_issue(p, name, ty) {
                return Err(StoreError::schema(p, issue));
            }
        }

        let [first_trace, trace_count, timestamp, settings] = self.metadata_lengths(p)?;
        if first_trace != trace_count || first_trace != timestamp || first_trace != settings {
            return Err(StoreError::schema(
                p,
                SchemaIssue::LengthMismatch { first_trace, trace_count, timestamp, settings },
            ));
        }
        Ok(first_trace)
    }

    /// Create the group and any missing member arrays, then validate.
    ///
    /// Existing members are never modified: a member with the wrong kind,
    /// rank, extendibility or type fails the call.
    pub fn ensure_metadata_group(&mut self, path: &str) -> Result<()> {
        let p = normalize_path(path);
        let result = self.ensure_metadata_group_inner(&p);
        logged("ensure_metadata_group", &p, result)
    }

    fn ensure_metadata_group_inner(&mut self, p: &str) -> Result<()> {
        self.container()?;
        if p.is_empty() {
            return Err(StoreError::InvalidPath(p.to_string()));
        }
        if is_root(p) {
            return Err(StoreError::params(p, "metadata group cannot be the root group"));
        }

        self.ensure_group(p)?;

        let chunk_len = self.options().metadata_chunk_len.max(1);
        let mut created = 0;
        for (name, ty) in METADATA_MEMBERS {
            match self.metadata_member_issue(p, name, ty) {
                None => {}
                Some(SchemaIssue::Missing(_)) => {
                    let params = ArrayCreateParams::new(join_path(p, name), ty)
                        .dims(vec![0], vec![Extent::Unlimited])
                        .chunks(vec![chunk_len]);
                    self.create_array(&params)?;
                    created += 1;
                }
                Some(issue) => return Err(StoreError::schema(p, issue)),
            }
        }
        if created > 0 {
            debug!("Created {} metadata members in {}", created, p);
        }

        self.validate_metadata_group_inner(p).map(|_| ())
    }

    /// Append one record to a valid metadata group and return its index.
    pub fn append_metadata_record(
        &mut self,
        group: &str,
        first_trace: u64,
        trace_count: u64,
        timestamp: &str,
        settings: &str,
    ) -> Result<u64> {
        let p = normalize_path(group);
        let result = self.append_metadata_record_inner(&p, first_trace, trace_count, timestamp, settings);
        logged("append_metadata_record", &p, result)
    }

    fn append_metadata_record_inner(
        &mut self,
        p: &str,
        first_trace: u64,
        trace_count: u64,
        timestamp: &str,
        settings: &str,
    ) -> Result<u64> {
        let index = self.validate_metadata_group_inner(p)?;
        let next = index
            .checked_add(1)
            .ok_or_else(|| StoreError::shape(p, "metadata length overflow"))?;

        let mut ids = [0u64; 4];
        for (id, (name, _)) in ids.iter_mut().zip(METADATA_MEMBERS) {
            *id = self.array_ref(&join_path(p, name))?.0;
        }
        let [first_id, count_id, timestamp_id, settings_id] = ids;

        // Extend all four before writing any value.
        let c = self.container_mut()?;
        for id in ids {
            c.set_extent(id, &[next])?;
        }
        self.flush_after_mutation("append_metadata_record", p);

        let slot = Hyperslab::new(vec![index], vec![1]);
        let c = self.container_mut()?;
        c.write_selection(first_id, &slot, &first_trace.to_le_bytes())?;
        c.write_selection(count_id, &slot, &trace_count.to_le_bytes())?;
        let reference = c.write_string(timestamp)?;
        c.write_selection(timestamp_id, &slot, &reference)?;
        let reference = c.write_string(settings)?;
        c.write_selection(settings_id, &slot, &reference)?;

        info!("Appended metadata record #{} to {} (first_trace={}, trace_count={})", index, p, first_trace, trace_count);
        Ok(index)
    }

    /// All records of a valid metadata group, in append order.
    pub fn read_metadata_records(&mut self, group: &str) -> Result<Vec<MetadataRecord>> {
        let p = normalize_path(group);
        let result = self.read_metadata_records_inner(&p);
        logged("read_metadata_records", &p, result)
    }

    fn read_metadata_records_inner(&mut self, p: &str) -> Result<Vec<MetadataRecord>> {
        let n = self.validate_metadata_group_inner(p)?;
        if n == 0 {
            return Ok(Vec::new());
        }

        let first = self.read_linear(&join_path(p, "first_trace"), 0, n)?.to_u64_vec()?;
        let counts = self.read_linear(&join_path(p, "trace_count"), 0, n)?.to_u64_vec()?;
        let timestamps = self.read_strings(&join_path(p, "timestamp"), 0, n)?;
        let settings = self.read_strings(&join_path(p, "settings"), 0, n)?;

        Ok(first
            .into_iter()
            .zip(counts)
            .zip(timestamps)
            .zip(settings)
            .map(|(((first_trace, trace_count), timestamp), settings)| MetadataRecord {
                first_trace,
                trace_count,
                timestamp,
                settings,
            })
            .collect())
    }
}
