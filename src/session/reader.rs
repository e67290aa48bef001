//! Bounded reads of 1-D and 2-D arrays

use std::fmt;

use tracing::debug;

use super::{logged, Session};
use crate::error::{Result, StoreError};
use crate::path::normalize_path;
use crate::storage::{ArrayId, Hyperslab};
use crate::types::{ElementType, Sample, STRING_REF_SIZE};

/// Bytes of a selection in the array's little-endian element encoding
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOutput {
    pub bytes: Vec<u8>,
    /// Shape of the selection: `[count]` or `[rows, cols]`
    pub dims: Vec<u64>,
    pub element_type: ElementType,
}

impl ReadOutput {
    pub fn element_count(&self) -> u64 {
        self.dims.iter().product()
    }

    /// Decode as `T`; the stored type must be exactly `T`'s.
    pub fn to_vec<T: Sample>(&self) -> Result<Vec<T>> {
        let want = T::SAMPLE_TYPE.element_type();
        if want != self.element_type {
            return Err(self.type_mismatch(want));
        }
        Ok(T::decode_le_bytes(&self.bytes))
    }

    pub fn to_u64_vec(&self) -> Result<Vec<u64>> {
        if self.element_type != ElementType::UInt64 {
            return Err(self.type_mismatch(ElementType::UInt64));
        }
        Ok(self.bytes.chunks_exact(8).map(|c| u64::from_le_bytes(le8(c))).collect())
    }

    pub fn to_i64_vec(&self) -> Result<Vec<i64>> {
        if self.element_type != ElementType::Int64 {
            return Err(self.type_mismatch(ElementType::Int64));
        }
        Ok(self.bytes.chunks_exact(8).map(|c| i64::from_le_bytes(le8(c))).collect())
    }

    fn type_mismatch(&self, want: ElementType) -> StoreError {
        StoreError::TypeMismatch {
            path: "<read output>".into(),
            expected: want.name().to_string(),
            found: self.element_type.name().to_string(),
        }
    }
}

impl fmt::Display for ReadOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape: Vec<String> = self.dims.iter().map(u64::to_string).collect();
        write!(f, "read {} bytes [{}] of {}", self.bytes.len(), shape.join(" x "), self.element_type)
    }
}

fn le8(chunk: &[u8]) -> [u8; 8] {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(chunk);
    raw
}

/// `start < len` and `start + count <= len` for one dimension.
fn check_span(path: &str, what: &str, start: u64, count: u64, len: u64) -> Result<()> {
    if count == 0 {
        return Err(StoreError::range(path, format!("{} count is 0", what)));
    }
    if start >= len {
        return Err(StoreError::range(path, format!("{} start {} out of range (length {})", what, start, len)));
    }
    if start.checked_add(count).map_or(true, |end| end > len) {
        return Err(StoreError::range(
            path,
            format!("{} range {}+{} exceeds length {}", what, start, count, len),
        ));
    }
    Ok(())
}

/// Total byte size of a selection, bounded by what one buffer can hold.
fn buffer_len(path: &str, elements: u64, elem_size: usize) -> Result<usize> {
    elements
        .checked_mul(elem_size as u64)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| n <= isize::MAX as usize)
        .ok_or_else(|| StoreError::range(path, "requested size too large for this platform"))
}

impl Session {
    /// Resolve an array of the given rank with a numeric element type.
    fn numeric_array(&self, p: &str, rank: usize) -> Result<(ArrayId, ElementType, Vec<u64>)> {
        let (id, entry) = self.array_ref(p)?;
        if entry.rank() != rank {
            return Err(StoreError::shape(p, format!("rank is {}, expected {}", entry.rank(), rank)));
        }
        let ty = ElementType::from_persisted(&entry.ty)
            .filter(|t| t.is_numeric())
            .ok_or_else(|| StoreError::UnsupportedType(entry.ty.to_string()))?;
        Ok((id, ty, entry.dims.clone()))
    }

    /// Read `count` elements of a 1-D numeric array starting at `start`.
    pub fn read_linear(&mut self, path: &str, start: u64, count: u64) -> Result<ReadOutput> {
        let p = normalize_path(path);
        let result = self.read_linear_inner(&p, start, count);
        logged("read_linear", &p, result)
    }

    fn read_linear_inner(&mut self, p: &str, start: u64, count: u64) -> Result<ReadOutput> {
        self.container()?;
        let (id, ty, dims) = self.numeric_array(p, 1)?;
        check_span(p, "element", start, count, dims[0])?;
        buffer_len(p, count, ty.size())?;

        let bytes = self
            .container_mut()?
            .read_selection(id, &Hyperslab::new(vec![start], vec![count]))?;
        let out = ReadOutput { bytes, dims: vec![count], element_type: ty };
        debug!("{}: {}", p, out);
        Ok(out)
    }

    /// Read a `row_count x col_count` block of a 2-D numeric array.
    pub fn read_rect(
        &mut self,
        path: &str,
        row_start: u64,
        row_count: u64,
        col_start: u64,
        col_count: u64,
    ) -> Result<ReadOutput> {
        let p = normalize_path(path);
        let result = self.read_rect_inner(&p, row_start, row_count, col_start, col_count);
        logged("read_rect", &p, result)
    }

    fn read_rect_inner(
        &mut self,
        p: &str,
        row_start: u64,
        row_count: u64,
        col_start: u64,
        col_count: u64,
    ) -> Result<ReadOutput> {
        self.container()?;
        let (id, ty, dims) = self.numeric_array(p, 2)?;
        check_span(p, "row", row_start, row_count, dims[0])?;
        check_span(p, "column", col_start, col_count, dims[1])?;
        let elements = row_count
            .checked_mul(col_count)
            .ok_or_else(|| StoreError::range(p, "requested size too large for this platform"))?;
        buffer_len(p, elements, ty.size())?;

        let slab = Hyperslab::new(vec![row_start, col_start], vec![row_count, col_count]);
        let bytes = self.container_mut()?.read_selection(id, &slab)?;
        let out = ReadOutput { bytes, dims: vec![row_count, col_count], element_type: ty };
        debug!("{}: {}", p, out);
        Ok(out)
    }

    /// Read `count` strings of a 1-D string array starting at `start`.
    pub fn read_strings(&mut self, path: &str, start: u64, count: u64) -> Result<Vec<String>> {
        let p = normalize_path(path);
        let result = self.read_strings_inner(&p, start, count);
        logged("read_strings", &p, result)
    }

    fn read_strings_inner(&mut self, p: &str, start: u64, count: u64) -> Result<Vec<String>> {
        self.container()?;
        let (id, entry) = self.array_ref(p)?;
        if entry.rank() != 1 {
            return Err(StoreError::shape(p, format!("rank is {}, expected 1", entry.rank())));
        }
        if ElementType::from_persisted(&entry.ty) != Some(ElementType::Utf8) {
            return Err(StoreError::TypeMismatch {
                path: p.to_string(),
                expected: ElementType::Utf8.name().to_string(),
                found: entry.ty.to_string(),
            });
        }
        let len = entry.dims[0];
        check_span(p, "element", start, count, len)?;
        buffer_len(p, count, STRING_REF_SIZE)?;

        let c = self.container_mut()?;
        let refs = c.read_selection(id, &Hyperslab::new(vec![start], vec![count]))?;
        refs.chunks_exact(STRING_REF_SIZE).map(|r| c.read_string(r)).collect()
    }
}
