//! Conventional export layout for captured traces
//!
//! Each channel gets a 2-D trace array (one row per captured waveform) and
//! a metadata group recording which rows each capture run produced:
//!
//! ```text
//! /ch{alias}/traces   [unlimited, samples]  one numeric type
//! /ch{alias}/runs     metadata group
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{logged, ArrayCreateParams, Session};
use crate::error::{Result, StoreError};
use crate::path::normalize_path;
use crate::storage::Extent;
use crate::types::{ElementType, Sample, SampleType};

/// Chunk size aimed for by [`propose_trace_chunks`] (1 MiB)
pub const TRACE_CHUNK_TARGET_BYTES: u64 = 1 << 20;

const MAX_CHUNK_ROWS: u64 = 1024;

/// Where one channel's traces and capture metadata go
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExportTarget {
    pub traces: String,
    pub metadata: String,
}

impl ExportTarget {
    pub fn new(traces: &str, metadata: &str) -> Self {
        Self { traces: normalize_path(traces), metadata: normalize_path(metadata) }
    }

    /// Default layout for a channel alias: `/ch{alias}/traces` and `/ch{alias}/runs`.
    pub fn for_channel(alias: impl fmt::Display) -> Self {
        Self::new(&format!("ch{}/traces", alias), &format!("ch{}/runs", alias))
    }
}

/// Chunk shape `[rows, cols]` for a trace array of `samples` columns.
///
/// One chunk holds about [`TRACE_CHUNK_TARGET_BYTES`]: rows wider than the
/// target are split by column, and the row count is clamped to 1..=1024.
pub fn propose_trace_chunks(samples: u64, elem_bytes: usize) -> [u64; 2] {
    if samples == 0 || elem_bytes == 0 {
        return [1, 1];
    }
    let elem = elem_bytes as u64;

    let mut cols = samples;
    if cols.saturating_mul(elem) > TRACE_CHUNK_TARGET_BYTES {
        cols = (TRACE_CHUNK_TARGET_BYTES / elem).clamp(1, samples);
    }
    let rows = (TRACE_CHUNK_TARGET_BYTES / (cols * elem)).clamp(1, MAX_CHUNK_ROWS);
    [rows, cols]
}

/// Creation parameters for an empty trace array of `samples` columns.
pub fn trace_array_params(path: &str, samples: u64, sample_type: SampleType) -> ArrayCreateParams {
    let [rows, cols] = propose_trace_chunks(samples, sample_type.size());
    ArrayCreateParams::new(path, sample_type.element_type())
        .dims(vec![0, samples], vec![Extent::Unlimited, Extent::Fixed(samples)])
        .chunks(vec![rows, cols])
}

/// What [`Session::ensure_export_structure`] did
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructureReport {
    pub created: Vec<String>,
    pub repaired: Vec<String>,
    /// Nodes left untouched because they do not match the layout
    pub conflicts: Vec<String>,
}

impl StructureReport {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }
}

impl fmt::Display for StructureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "created {}, repaired {}, conflicts {}",
            self.created.len(),
            self.repaired.len(),
            self.conflicts.len()
        )
    }
}

/// Outcome of [`Session::append_trace_batch`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub traces: String,
    pub metadata: String,
    pub first_trace: u64,
    pub trace_count: u64,
    /// Index of the metadata record describing the batch
    pub record_index: u64,
}

impl Session {
    /// Check that `path` is a usable trace array for `samples` columns of
    /// `sample_type` (`samples == 0` skips the column check).
    pub fn check_trace_array(&self, path: &str, samples: u64, sample_type: SampleType) -> Result<()> {
        let p = normalize_path(path);
        let (_, entry) = self.array_ref(&p)?;

        if entry.rank() != 2 {
            return Err(StoreError::shape(&p, format!("rank is {}, expected 2", entry.rank())));
        }
        if !entry.max_dims[0].is_unlimited() {
            return Err(StoreError::shape(&p, "dim 0 is not unlimited"));
        }
        if samples != 0 && entry.dims[1] != samples {
            return Err(StoreError::shape(&p, format!("{} columns, expected {}", entry.dims[1], samples)));
        }
        if ElementType::from_persisted(&entry.ty) != Some(sample_type.element_type()) {
            return Err(StoreError::TypeMismatch {
                path: p,
                expected: sample_type.name().to_string(),
                found: entry.ty.to_string(),
            });
        }
        Ok(())
    }

    /// Bring every target up to the export layout without touching
    /// anything that already exists in a different shape.
    ///
    /// Missing trace arrays and metadata groups are created, incomplete
    /// metadata groups are completed, and everything else that does not
    /// fit is listed as a conflict.
    pub fn ensure_export_structure(
        &mut self,
        targets: &[ExportTarget],
        samples: u64,
        sample_type: SampleType,
    ) -> Result<StructureReport> {
        self.container()?;
        let mut report = StructureReport::default();

        for target in targets {
            let meta = &target.metadata;
            let existed = self.exists(meta);
            let valid_before = existed && matches!(self.metadata_group_status(meta), Ok(s) if s.is_valid());

            match self.ensure_metadata_group(meta) {
                Ok(()) if !existed => report.created.push(meta.clone()),
                Ok(()) if !valid_before => report.repaired.push(meta.clone()),
                Ok(()) => {}
                Err(e) => report.conflicts.push(format!("{}: cannot ensure valid metadata group: {}", meta, e)),
            }

            let traces = &target.traces;
            if !self.exists(traces) {
                if samples == 0 {
                    report.conflicts.push(format!("{}: cannot create trace array with 0 samples per trace", traces));
                    continue;
                }
                match self.create_array(&trace_array_params(traces, samples, sample_type)) {
                    Ok(()) => report.created.push(traces.clone()),
                    Err(e) => report.conflicts.push(format!("{}: failed to create trace array: {}", traces, e)),
                }
            } else if !self.is_array(traces) {
                report.conflicts.push(format!("{}: exists but is not an array", traces));
            } else if let Err(e) = self.check_trace_array(traces, samples, sample_type) {
                report.conflicts.push(format!("{}: does not match the trace layout: {}", traces, e));
            }
        }

        if report.is_clean() {
            info!("Export structure ready: {}", report);
        } else {
            warn!("Export structure has conflicts: {}", report);
        }
        Ok(report)
    }

    /// Append whole traces to `target.traces` and record the run in
    /// `target.metadata`.
    ///
    /// Every row must have the same length. See
    /// [`append_trace_rows`](Self::append_trace_rows) for failure behavior.
    pub fn append_trace_batch<T, R>(
        &mut self,
        target: &ExportTarget,
        rows: &[R],
        timestamp: &str,
        settings: &str,
    ) -> Result<BatchSummary>
    where
        T: Sample,
        R: AsRef<[T]>,
    {
        let first = match rows.first() {
            Some(first) => first,
            None => {
                let err = StoreError::params(&target.traces, "batch has no traces");
                return logged("append_trace_batch", &target.traces, Err(err));
            }
        };
        let cols = first.as_ref().len();
        if let Some(bad) = rows.iter().position(|r| r.as_ref().len() != cols) {
            let err = StoreError::shape(
                &target.traces,
                format!("trace {} has {} samples, expected {}", bad, rows[bad].as_ref().len(), cols),
            );
            return logged("append_trace_batch", &target.traces, Err(err));
        }

        let mut data = Vec::with_capacity(rows.len() * cols * T::SAMPLE_TYPE.size());
        for row in rows {
            T::extend_le_bytes(row.as_ref(), &mut data);
        }
        self.append_trace_rows(target, T::SAMPLE_TYPE, cols as u64, &data, timestamp, settings)
    }

    /// Byte-level form of [`append_trace_batch`](Self::append_trace_batch):
    /// `data` holds whole rows of `cols` little-endian samples.
    ///
    /// If a row write fails the append is ended, the error is returned and
    /// no metadata record is written; the rows already reserved stay in the
    /// array.
    pub fn append_trace_rows(
        &mut self,
        target: &ExportTarget,
        sample_type: SampleType,
        cols: u64,
        data: &[u8],
        timestamp: &str,
        settings: &str,
    ) -> Result<BatchSummary> {
        let result = self.append_trace_rows_inner(target, sample_type, cols, data, timestamp, settings);
        logged("append_trace_rows", &target.traces, result)
    }

    fn append_trace_rows_inner(
        &mut self,
        target: &ExportTarget,
        sample_type: SampleType,
        cols: u64,
        data: &[u8],
        timestamp: &str,
        settings: &str,
    ) -> Result<BatchSummary> {
        let row_bytes = usize::try_from(cols)
            .ok()
            .and_then(|c| c.checked_mul(sample_type.size()))
            .filter(|&n| n > 0)
            .ok_or_else(|| StoreError::params(&target.traces, format!("invalid samples per trace: {}", cols)))?;
        if data.is_empty() {
            return Err(StoreError::params(&target.traces, "batch has no traces"));
        }
        if data.len() % row_bytes != 0 {
            return Err(StoreError::shape(
                &target.traces,
                format!("{} bytes is not a whole number of {}-byte rows", data.len(), row_bytes),
            ));
        }
        self.validate_metadata_group(&target.metadata)?;

        let rows = (data.len() / row_bytes) as u64;
        let mut handle = self.begin_append(&target.traces, cols, sample_type, rows)?;
        for row in data.chunks_exact(row_bytes) {
            if let Err(e) = self.append_row(&mut handle, row, sample_type) {
                self.end_append(&mut handle);
                return Err(e);
            }
        }
        self.end_append(&mut handle);
        if let Some(reason) = handle.write_back_error() {
            return Err(StoreError::WriteBackFailed {
                path: target.traces.clone(),
                reason: reason.to_string(),
            });
        }

        let record_index = self.append_metadata_record(
            &target.metadata,
            handle.first_row(),
            handle.rows_written(),
            timestamp,
            settings,
        )?;

        debug!("Batch of {} traces written to {} (record #{})", rows, target.traces, record_index);
        Ok(BatchSummary {
            traces: target.traces.clone(),
            metadata: target.metadata.clone(),
            first_trace: handle.first_row(),
            trace_count: handle.rows_written(),
            record_index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MetadataRecord;

    fn session() -> Session {
        let mut s = Session::new();
        s.create_in_memory().unwrap();
        s
    }

    #[test]
    fn test_propose_trace_chunks() {
        assert_eq!(propose_trace_chunks(0, 4), [1, 1]);
        assert_eq!(propose_trace_chunks(1024, 4), [256, 1024]);
        assert_eq!(propose_trace_chunks(16, 1), [1024, 16]);
        assert_eq!(propose_trace_chunks(1 << 20, 2), [1, 1 << 19]);
        assert_eq!(propose_trace_chunks(3 << 20, 8), [1, 1 << 17]);
    }

    #[test]
    fn test_targets_for_channel() {
        let t = ExportTarget::for_channel(3);
        assert_eq!(t.traces, "/ch3/traces");
        assert_eq!(t.metadata, "/ch3/runs");
        assert_eq!(ExportTarget::new("a//b/", "c").traces, "/a/b");
    }

    #[test]
    fn test_ensure_export_structure_reports() {
        let mut s = session();
        let targets = [ExportTarget::for_channel(1), ExportTarget::for_channel(2), ExportTarget::for_channel(3)];

        // ch2: incomplete metadata group; ch3: wrong trace type.
        s.ensure_group("/ch2/runs").unwrap();
        s.create_array(&trace_array_params("/ch3/traces", 128, SampleType::Int16)).unwrap();

        let report = s.ensure_export_structure(&targets, 128, SampleType::Real32).unwrap();
        assert_eq!(report.created, vec!["/ch1/runs", "/ch1/traces", "/ch2/traces", "/ch3/runs"]);
        assert_eq!(report.repaired, vec!["/ch2/runs"]);
        assert_eq!(report.conflicts.len(), 1);
        assert!(report.conflicts[0].starts_with("/ch3/traces"));
        assert_eq!(s.array_type_name("/ch3/traces").unwrap(), "int16");

        let again = s.ensure_export_structure(&targets[..2], 128, SampleType::Real32).unwrap();
        assert!(again.created.is_empty() && again.repaired.is_empty() && again.is_clean());
    }

    #[test]
    fn test_zero_samples_is_a_conflict() {
        let mut s = session();
        let report = s.ensure_export_structure(&[ExportTarget::for_channel(1)], 0, SampleType::UInt8).unwrap();
        assert_eq!(report.created, vec!["/ch1/runs"]);
        assert_eq!(report.conflicts.len(), 1);
        assert!(!s.exists("/ch1/traces"));
    }

    #[test]
    fn test_append_trace_batch_records_runs() {
        let mut s = session();
        let target = ExportTarget::for_channel("A");
        s.ensure_export_structure(std::slice::from_ref(&target), 4, SampleType::Int16).unwrap();

        let first = s
            .append_trace_batch::<i16, _>(&target, &[vec![1i16, 2, 3, 4], vec![5, 6, 7, 8]], "t0", "{}")
            .unwrap();
        assert_eq!((first.first_trace, first.trace_count, first.record_index), (0, 2, 0));

        let second = s.append_trace_batch::<i16, _>(&target, &[[9i16, 9, 9, 9]], "t1", "{\"n\":1}").unwrap();
        assert_eq!((second.first_trace, second.trace_count, second.record_index), (2, 1, 1));

        let out = s.read_rect("/chA/traces", 0, 3, 0, 4).unwrap();
        assert_eq!(out.to_vec::<i16>().unwrap(), vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 9, 9, 9]);
        let records = s.read_metadata_records("/chA/runs").unwrap();
        assert_eq!(
            records[1],
            MetadataRecord { first_trace: 2, trace_count: 1, timestamp: "t1".into(), settings: "{\"n\":1}".into() }
        );
    }

    #[test]
    fn test_append_trace_batch_rejects_ragged_rows() {
        let mut s = session();
        let target = ExportTarget::for_channel(1);
        s.ensure_export_structure(std::slice::from_ref(&target), 2, SampleType::Real64).unwrap();

        let ragged: Vec<Vec<f64>> = vec![vec![1.0, 2.0], vec![3.0]];
        assert!(matches!(s.append_trace_batch::<f64, _>(&target, &ragged, "t", ""), Err(StoreError::ShapeMismatch { .. })));
        let empty: Vec<Vec<f64>> = Vec::new();
        assert!(matches!(s.append_trace_batch::<f64, _>(&target, &empty, "t", ""), Err(StoreError::InvalidParams { .. })));
        assert_eq!(s.element_count("/ch1/traces").unwrap(), 0);
        assert_eq!(s.validate_metadata_group("/ch1/runs").unwrap(), 0);
    }

    #[test]
    fn test_append_trace_rows_from_bytes() {
        let mut s = session();
        let target = ExportTarget::for_channel(7);
        s.ensure_export_structure(std::slice::from_ref(&target), 2, SampleType::UInt8).unwrap();

        assert!(matches!(
            s.append_trace_rows(&target, SampleType::UInt8, 2, &[1, 2, 3], "t", ""),
            Err(StoreError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            s.append_trace_rows(&target, SampleType::UInt8, 0, &[1, 2], "t", ""),
            Err(StoreError::InvalidParams { .. })
        ));
        assert!(matches!(
            s.append_trace_rows(&target, SampleType::Int8, 2, &[1, 2], "t", ""),
            Err(StoreError::TypeMismatch { .. })
        ));

        let summary = s.append_trace_rows(&target, SampleType::UInt8, 2, &[1, 2, 3, 4], "t", "").unwrap();
        assert_eq!(summary.trace_count, 2);
        assert_eq!(s.validate_metadata_group("/ch7/runs").unwrap(), 1);
        assert_eq!(s.element_count("/ch7/traces").unwrap(), 4);
    }
}
