//! Incremental writes: reserved row appends and bulk raw-slice appends
//!
//! `begin_append` grows dimension 0 once by the number of rows the caller
//! intends to write; `append_row` then fills the reservation one row at a
//! time. Rows reserved but never written stay allocated and read as zero.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::{logged, Session};
use crate::error::{Result, StoreError};
use crate::path::normalize_path;
use crate::storage::{ArrayId, Hyperslab};
use crate::types::{ElementType, Sample, SampleType};

/// Cursor over rows reserved by [`Session::begin_append`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendHandle {
    path: String,
    array: ArrayId,
    cols: u64,
    first_row: u64,
    next_row: u64,
    end_row: u64,
    sample_type: SampleType,
    active: bool,
    generation: u64,
    write_back_error: Option<String>,
}

impl AppendHandle {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn cols(&self) -> u64 {
        self.cols
    }

    /// First row reserved by this handle
    pub fn first_row(&self) -> u64 {
        self.first_row
    }

    /// Next row to be written
    pub fn next_row(&self) -> u64 {
        self.next_row
    }

    /// Exclusive end of the reservation
    pub fn end_row(&self) -> u64 {
        self.end_row
    }

    pub fn rows_written(&self) -> u64 {
        self.next_row - self.first_row
    }

    pub fn remaining(&self) -> u64 {
        self.end_row - self.next_row
    }

    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Why the rows could not be written back when the append ended.
    ///
    /// The rows stay buffered in the session and are retried by the next
    /// flush, but callers should not record them as stored yet.
    pub fn write_back_error(&self) -> Option<&str> {
        self.write_back_error.as_deref()
    }
}

/// Append guard that ends the append when dropped.
///
/// Holding an `Appender` borrows the session mutably, so the container
/// cannot be closed while rows are being written through it.
pub struct Appender<'s> {
    session: &'s mut Session,
    handle: AppendHandle,
}

impl<'s> Appender<'s> {
    pub fn write_row(&mut self, bytes: &[u8], provided: SampleType) -> Result<()> {
        self.session.append_row(&mut self.handle, bytes, provided)
    }

    pub fn write<T: Sample>(&mut self, values: &[T]) -> Result<()> {
        self.session.append_row_typed(&mut self.handle, values)
    }

    pub fn handle(&self) -> &AppendHandle {
        &self.handle
    }

    /// End the append and return the final cursor state.
    pub fn finish(mut self) -> AppendHandle {
        self.session.end_append(&mut self.handle);
        self.handle.clone()
    }
}

impl Drop for Appender<'_> {
    fn drop(&mut self) {
        self.session.end_append(&mut self.handle);
    }
}

/// Outcome of [`Session::append_raw_slice`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAppendSummary {
    pub file: Option<PathBuf>,
    pub path: String,
    pub element_type: ElementType,
    pub start_byte: u64,
    pub byte_count: u64,
    pub rank: usize,
    pub cols: u64,
    pub elements: u64,
    /// Growth of dimension 0 (rows for rank 2, elements for rank 1)
    pub extend_by: u64,
    /// Dimension-0 length before the append
    pub first_row: u64,
}

impl fmt::Display for RawAppendSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "<memory>".into());
        writeln!(f, "File: {}", file)?;
        writeln!(f, "Dataset: {}", self.path)?;
        writeln!(f, "Type: {} ({} bytes/element)", self.element_type, self.element_type.size())?;
        writeln!(f, "Slice: startByte={} byteCount={}", self.start_byte, self.byte_count)?;
        writeln!(
            f,
            "Write: rank={} cols={} elements={} extend0={}",
            self.rank, self.cols, self.elements, self.extend_by
        )?;
        write!(f, "OK: append completed")
    }
}

impl Session {
    /// Reserve `rows` rows at the end of a 2-D array and return a cursor
    /// positioned at the first reserved row.
    ///
    /// The array must have an unlimited first dimension, exactly `cols`
    /// columns and the element type of `sample_type`. On failure the
    /// array's extent is unchanged.
    pub fn begin_append(&mut self, path: &str, cols: u64, sample_type: SampleType, rows: u64) -> Result<AppendHandle> {
        let p = normalize_path(path);
        let result = self.begin_append_inner(&p, cols, sample_type, rows);
        logged("begin_append", &p, result)
    }

    fn begin_append_inner(&mut self, p: &str, cols: u64, sample_type: SampleType, rows: u64) -> Result<AppendHandle> {
        self.container()?;
        let (id, entry) = self.array_ref(p)?;

        if entry.rank() != 2 {
            return Err(StoreError::shape(p, format!("rank is {}, expected 2", entry.rank())));
        }
        if cols == 0 {
            return Err(StoreError::params(p, "samples per trace is 0"));
        }
        if rows == 0 {
            return Err(StoreError::params(p, "rows to append is 0"));
        }
        if !entry.max_dims[0].is_unlimited() {
            return Err(StoreError::shape(p, "dim 0 is not unlimited"));
        }
        if entry.dims[1] != cols {
            return Err(StoreError::shape(p, format!("columns mismatch: got {} expected {}", entry.dims[1], cols)));
        }
        if ElementType::from_persisted(&entry.ty) != Some(sample_type.element_type()) {
            return Err(StoreError::TypeMismatch {
                path: p.to_string(),
                expected: sample_type.name().to_string(),
                found: entry.ty.to_string(),
            });
        }

        let old_rows = entry.dims[0];
        let new_rows = old_rows
            .checked_add(rows)
            .ok_or_else(|| StoreError::shape(p, "dim 0 overflow on extend"))?;

        self.container_mut()?.set_extent(id, &[new_rows, cols])?;
        self.flush_after_mutation("begin_append", p);
        debug!("Reserved rows {}..{} of {}", old_rows, new_rows, p);

        Ok(AppendHandle {
            path: p.to_string(),
            array: id,
            cols,
            first_row: old_rows,
            next_row: old_rows,
            end_row: new_rows,
            sample_type,
            active: true,
            generation: self.generation(),
            write_back_error: None,
        })
    }

    /// Write one full row at the handle's cursor and advance it.
    pub fn append_row(&mut self, handle: &mut AppendHandle, bytes: &[u8], provided: SampleType) -> Result<()> {
        let path = handle.path.clone();
        let result = self.append_row_inner(handle, bytes, provided);
        logged("append_row", &path, result)
    }

    fn append_row_inner(&mut self, h: &mut AppendHandle, bytes: &[u8], provided: SampleType) -> Result<()> {
        if !h.active {
            return Err(StoreError::HandleInactive);
        }
        if h.generation != self.generation() {
            return Err(StoreError::StaleHandle);
        }
        let c = self.container_mut()?;
        if c.catalog().array(h.array).is_none() {
            return Err(StoreError::PathNotFound(h.path.clone()));
        }
        if h.next_row >= h.end_row {
            return Err(StoreError::ReservationExhausted {
                path: h.path.clone(),
                next_row: h.next_row,
                end_row: h.end_row,
            });
        }
        if provided != h.sample_type {
            return Err(StoreError::TypeMismatch {
                path: h.path.clone(),
                expected: h.sample_type.name().to_string(),
                found: provided.name().to_string(),
            });
        }
        let expected = h.cols as usize * h.sample_type.size();
        if bytes.len() != expected {
            return Err(StoreError::shape(
                &h.path,
                format!("row is {} bytes, expected {} ({} x {})", bytes.len(), expected, h.cols, h.sample_type.size()),
            ));
        }

        c.write_selection(h.array, &Hyperslab::rows(h.next_row, 1, h.cols), bytes)?;
        h.next_row += 1;
        Ok(())
    }

    /// Typed form of [`append_row`](Self::append_row).
    pub fn append_row_typed<T: Sample>(&mut self, handle: &mut AppendHandle, values: &[T]) -> Result<()> {
        let bytes = T::to_le_bytes_vec(values);
        self.append_row(handle, &bytes, T::SAMPLE_TYPE)
    }

    /// Finish an append. Idempotent; problems are logged, never returned.
    /// A failed write-back is recorded on the handle.
    pub fn end_append(&mut self, handle: &mut AppendHandle) {
        if !handle.active {
            return;
        }
        handle.active = false;

        if handle.generation != self.generation() {
            warn!("end_append: container for {} was closed before the append ended", handle.path);
            return;
        }
        if let Ok(c) = self.container_mut() {
            if let Err(e) = c.commit_array(handle.array) {
                error!("end_append: failed to write rows of {}: {}", handle.path, e);
                handle.write_back_error = Some(e.to_string());
            }
        }
        self.flush_after_mutation("end_append", &handle.path);

        if handle.next_row < handle.end_row {
            debug!(
                "end_append: {} rows of {} reserved but not written",
                handle.end_row - handle.next_row,
                handle.path
            );
        }
    }

    /// Begin an append and wrap the handle in a guard.
    pub fn appender(&mut self, path: &str, cols: u64, sample_type: SampleType, rows: u64) -> Result<Appender<'_>> {
        let handle = self.begin_append(path, cols, sample_type, rows)?;
        Ok(Appender { session: self, handle })
    }

    /// Append a pre-serialized byte range as whole elements (`cols == 0`,
    /// rank-1 target) or whole rows (`cols > 0`, rank-2 target with exactly
    /// `cols` fixed columns).
    ///
    /// The bytes are stored as-is and must already be in the array's
    /// little-endian element encoding. Dimension 0 grows once; if the bulk
    /// write fails the previous extent is restored.
    pub fn append_raw_slice(
        &mut self,
        path: &str,
        payload: &[u8],
        start_byte: u64,
        byte_count: u64,
        cols: u64,
        type_text: &str,
    ) -> Result<RawAppendSummary> {
        let p = normalize_path(path);
        let result = self.append_raw_slice_inner(&p, payload, start_byte, byte_count, cols, type_text);
        logged("append_raw_slice", &p, result)
    }

    fn append_raw_slice_inner(
        &mut self,
        p: &str,
        payload: &[u8],
        start_byte: u64,
        byte_count: u64,
        cols: u64,
        type_text: &str,
    ) -> Result<RawAppendSummary> {
        self.container()?;

        let ty = ElementType::from_name(type_text)
            .filter(|t| t.is_numeric())
            .ok_or_else(|| StoreError::UnsupportedType(type_text.to_string()))?;
        let elem = ty.size() as u64;

        let total = payload.len() as u64;
        if start_byte > total {
            return Err(StoreError::range(p, format!("start byte out of range ({} > {})", start_byte, total)));
        }
        if byte_count == 0 {
            return Err(StoreError::range(p, "byte count is 0"));
        }
        if start_byte.checked_add(byte_count).map_or(true, |end| end > total) {
            return Err(StoreError::range(
                p,
                format!("range exceeds payload size: start {} count {} total {}", start_byte, byte_count, total),
            ));
        }
        if byte_count % elem != 0 {
            return Err(StoreError::Misaligned { byte_count, element_size: elem });
        }
        let elements = byte_count / elem;
        if cols > 0 && elements % cols != 0 {
            return Err(StoreError::shape(
                p,
                format!("element count ({}) not divisible by cols ({})", elements, cols),
            ));
        }

        if p.is_empty() {
            return Err(StoreError::InvalidPath(p.to_string()));
        }
        let (id, entry) = self.array_ref(p)?;

        if !entry.max_dims[0].is_unlimited() {
            return Err(StoreError::shape(p, "dataset is not unlimited in dim 0"));
        }
        if !entry.chunked {
            return Err(StoreError::shape(p, "dataset is not chunked (cannot extend)"));
        }
        let rank = if cols == 0 { 1 } else { 2 };
        if rank == 1 && entry.rank() != 1 {
            return Err(StoreError::shape(p, format!("rank mismatch: expected 1, got {}", entry.rank())));
        }
        if rank == 2 {
            if entry.rank() != 2 {
                return Err(StoreError::shape(p, format!("rank mismatch: expected 2, got {}", entry.rank())));
            }
            if entry.dims[1] != cols {
                return Err(StoreError::shape(p, format!("second dimension {} != cols {}", entry.dims[1], cols)));
            }
            if entry.max_dims[1].fixed() != Some(cols) {
                return Err(StoreError::shape(
                    p,
                    format!("max second dimension {} must equal cols {}", entry.max_dims[1], cols),
                ));
            }
        }
        if ElementType::from_persisted(&entry.ty) != Some(ty) {
            return Err(StoreError::TypeMismatch {
                path: p.to_string(),
                expected: ty.name().to_string(),
                found: entry.ty.to_string(),
            });
        }

        let extend_by = if cols == 0 { elements } else { elements / cols };
        let old_dims = entry.dims.clone();
        let first_row = old_dims[0];
        let mut new_dims = old_dims.clone();
        new_dims[0] = first_row
            .checked_add(extend_by)
            .ok_or_else(|| StoreError::shape(p, "dataset size overflow on extend"))?;

        let slab = if cols == 0 {
            Hyperslab::new(vec![first_row], vec![extend_by])
        } else {
            Hyperslab::rows(first_row, extend_by, cols)
        };
        let start = start_byte as usize;
        let slice = &payload[start..start + byte_count as usize];

        let summary = RawAppendSummary {
            file: self.file_path().map(Path::to_path_buf),
            path: p.to_string(),
            element_type: ty,
            start_byte,
            byte_count,
            rank,
            cols,
            elements,
            extend_by,
            first_row,
        };

        let c = self.container_mut()?;
        c.commit_array(id)?;
        c.set_extent(id, &new_dims)?;

        let written = match c.write_selection(id, &slab, slice) {
            Ok(()) => c.commit_array(id).map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            c.discard_array(id);
            match c.set_extent(id, &old_dims) {
                Ok(()) => warn!("append_raw_slice: write failed, restored {} to {} rows", p, first_row),
                Err(re) => error!("append_raw_slice: rollback of {} failed: {}", p, re),
            }
            return Err(e);
        }

        self.flush_after_mutation("append_raw_slice", p);
        for line in summary.to_string().lines() {
            debug!("{}", line);
        }
        info!("Appended {} {} elements to {}", elements, ty, p);
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ArrayCreateParams;
    use crate::storage::Extent;

    fn session_with_traces(cols: u64, ty: ElementType) -> Session {
        let mut s = Session::new();
        s.create_in_memory().unwrap();
        s.create_array(
            &ArrayCreateParams::new("/ch1/traces", ty)
                .dims(vec![0, cols], vec![Extent::Unlimited, Extent::Fixed(cols)])
                .chunks(vec![4, cols]),
        )
        .unwrap();
        s
    }

    #[test]
    fn test_begin_append_preconditions() {
        let mut s = session_with_traces(8, ElementType::Int16);

        assert!(matches!(s.begin_append("/ch1/traces", 0, SampleType::Int16, 1), Err(StoreError::InvalidParams { .. })));
        assert!(matches!(s.begin_append("/ch1/traces", 8, SampleType::Int16, 0), Err(StoreError::InvalidParams { .. })));
        assert!(matches!(s.begin_append("/ch1/traces", 7, SampleType::Int16, 1), Err(StoreError::ShapeMismatch { .. })));
        assert!(matches!(s.begin_append("/ch1/traces", 8, SampleType::UInt16, 1), Err(StoreError::TypeMismatch { .. })));
        assert!(matches!(s.begin_append("/ch1", 8, SampleType::Int16, 1), Err(StoreError::WrongKind { .. })));
        assert_eq!(s.describe("/ch1/traces").unwrap().dims, vec![0, 8]);
    }

    #[test]
    fn test_rank1_target_rejected() {
        let mut s = Session::new();
        s.create_in_memory().unwrap();
        s.create_array(&ArrayCreateParams::new("/v", ElementType::UInt8).dims(vec![0], vec![Extent::Unlimited]).chunks(vec![8]))
            .unwrap();
        assert!(matches!(s.begin_append("/v", 1, SampleType::UInt8, 1), Err(StoreError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_append_row_checks() {
        let mut s = session_with_traces(4, ElementType::UInt8);
        let mut h = s.begin_append("/ch1/traces", 4, SampleType::UInt8, 2).unwrap();

        assert!(matches!(s.append_row(&mut h, &[1, 2, 3], SampleType::UInt8), Err(StoreError::ShapeMismatch { .. })));
        assert!(matches!(s.append_row(&mut h, &[1, 2, 3, 4], SampleType::Int8), Err(StoreError::TypeMismatch { .. })));
        assert_eq!(h.next_row(), 0);

        s.append_row(&mut h, &[1, 2, 3, 4], SampleType::UInt8).unwrap();
        s.append_row_typed(&mut h, &[5u8, 6, 7, 8]).unwrap();
        assert_eq!(h.rows_written(), 2);
        assert!(matches!(
            s.append_row(&mut h, &[9, 9, 9, 9], SampleType::UInt8),
            Err(StoreError::ReservationExhausted { next_row: 2, end_row: 2, .. })
        ));

        s.end_append(&mut h);
        s.end_append(&mut h);
        assert!(!h.is_active());
        assert!(matches!(s.append_row(&mut h, &[0; 4], SampleType::UInt8), Err(StoreError::HandleInactive)));

        let out = s.read_rect("/ch1/traces", 0, 2, 0, 4).unwrap();
        assert_eq!(out.bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_stale_handle_after_reopen() {
        let mut s = session_with_traces(2, ElementType::UInt8);
        let mut h = s.begin_append("/ch1/traces", 2, SampleType::UInt8, 1).unwrap();
        s.close().unwrap();
        s.create_in_memory().unwrap();
        assert!(matches!(s.append_row(&mut h, &[1, 2], SampleType::UInt8), Err(StoreError::StaleHandle)));
        s.end_append(&mut h);
        assert!(!h.is_active());
    }

    #[test]
    fn test_appender_guard_ends_on_drop() {
        let mut s = session_with_traces(3, ElementType::Float64);
        {
            let mut a = s.appender("/ch1/traces", 3, SampleType::Real64, 2).unwrap();
            a.write(&[1.0f64, 2.0, 3.0]).unwrap();
            assert_eq!(a.handle().rows_written(), 1);
        }
        let d = s.describe("/ch1/traces").unwrap();
        assert_eq!(d.dims, vec![2, 3]);
        let out = s.read_rect("/ch1/traces", 0, 2, 0, 3).unwrap();
        assert_eq!(out.to_vec::<f64>().unwrap(), vec![1.0, 2.0, 3.0, 0.0, 0.0, 0.0]);

        let a = s.appender("/ch1/traces", 3, SampleType::Real64, 1).unwrap();
        let h = a.finish();
        assert!(!h.is_active());
        assert_eq!(h.first_row(), 2);
    }

    #[test]
    fn test_raw_slice_validation_order() {
        let mut s = session_with_traces(2, ElementType::Int16);
        let payload = [0u8; 16];

        assert!(matches!(s.append_raw_slice("/ch1/traces", &payload, 0, 4, 2, "int24"), Err(StoreError::UnsupportedType(_))));
        assert!(matches!(s.append_raw_slice("/ch1/traces", &payload, 0, 4, 2, "string"), Err(StoreError::UnsupportedType(_))));
        assert!(matches!(s.append_raw_slice("/ch1/traces", &payload, 17, 1, 2, "int16"), Err(StoreError::OutOfRange { .. })));
        assert!(matches!(s.append_raw_slice("/ch1/traces", &payload, 0, 0, 2, "int16"), Err(StoreError::OutOfRange { .. })));
        assert!(matches!(s.append_raw_slice("/ch1/traces", &payload, 8, 10, 2, "int16"), Err(StoreError::OutOfRange { .. })));
        assert!(matches!(
            s.append_raw_slice("/ch1/traces", &payload, 0, 3, 2, "int16"),
            Err(StoreError::Misaligned { byte_count: 3, element_size: 2 })
        ));
        assert!(matches!(s.append_raw_slice("/ch1/traces", &payload, 0, 6, 2, "int16"), Err(StoreError::ShapeMismatch { .. })));
        assert!(matches!(s.append_raw_slice("/ch1/traces", &payload, 0, 8, 0, "int16"), Err(StoreError::ShapeMismatch { .. })));
        assert!(matches!(s.append_raw_slice("/ch1/traces", &payload, 0, 8, 4, "int16"), Err(StoreError::ShapeMismatch { .. })));
        assert!(matches!(s.append_raw_slice("/ch1/traces", &payload, 0, 8, 2, "uint16"), Err(StoreError::TypeMismatch { .. })));
        assert_eq!(s.element_count("/ch1/traces").unwrap(), 0);
    }

    #[test]
    fn test_raw_slice_rows_and_summary() {
        let mut s = session_with_traces(2, ElementType::Int16);
        let payload = i16::to_le_bytes_vec(&[0, 1, 2, 3, 4, 5]);

        let summary = s.append_raw_slice("/ch1/traces", &payload, 4, 8, 2, "int16").unwrap();
        assert_eq!(summary.elements, 4);
        assert_eq!(summary.extend_by, 2);
        assert_eq!(summary.first_row, 0);
        let text = summary.to_string();
        assert!(text.contains("Type: int16 (2 bytes/element)"));
        assert!(text.contains("Write: rank=2 cols=2 elements=4 extend0=2"));
        assert!(text.ends_with("OK: append completed"));

        let out = s.read_rect("/ch1/traces", 0, 2, 0, 2).unwrap();
        assert_eq!(out.to_vec::<i16>().unwrap(), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_raw_slice_fixed_or_contiguous_rejected() {
        let mut s = Session::new();
        s.create_in_memory().unwrap();
        s.create_array(&ArrayCreateParams::new("/fixed", ElementType::UInt8).dims(vec![4], vec![Extent::Fixed(8)]))
            .unwrap();
        assert!(matches!(s.append_raw_slice("/fixed", &[1, 2], 0, 2, 0, "uint8"), Err(StoreError::ShapeMismatch { .. })));
        assert!(matches!(s.append_raw_slice("/nope", &[1, 2], 0, 2, 0, "uint8"), Err(StoreError::PathNotFound(_))));
    }
}
