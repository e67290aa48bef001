//! Rectangular selections over chunked arrays

/// A `start`/`count` selection, one entry per dimension
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hyperslab {
    pub start: Vec<u64>,
    pub count: Vec<u64>,
}

/// Part of a selection that falls inside one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkOverlap {
    /// Chunk grid coordinates
    pub coords: Vec<u64>,
    /// Intersection in absolute element coordinates
    pub region: Hyperslab,
}

impl Hyperslab {
    pub fn new(start: Vec<u64>, count: Vec<u64>) -> Self {
        debug_assert_eq!(start.len(), count.len());
        Self { start, count }
    }

    /// Rows `[row, row + rows)` of a 2-D array with `cols` columns.
    pub fn rows(row: u64, rows: u64, cols: u64) -> Self {
        Self::new(vec![row, 0], vec![rows, cols])
    }

    pub fn rank(&self) -> usize {
        self.start.len()
    }

    pub fn element_count(&self) -> u64 {
        self.count.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.count.iter().any(|&c| c == 0)
    }

    /// Whether the selection lies inside an array of shape `dims`.
    pub fn fits_within(&self, dims: &[u64]) -> bool {
        self.rank() == dims.len()
            && self
                .start
                .iter()
                .zip(&self.count)
                .zip(dims)
                .all(|((&s, &c), &d)| s.checked_add(c).map_or(false, |end| end <= d))
    }

    /// Chunks touched by the selection, in row-major grid order.
    pub fn chunk_overlaps(&self, chunk_dims: &[u64]) -> Vec<ChunkOverlap> {
        if self.is_empty() || chunk_dims.len() != self.rank() {
            return Vec::new();
        }

        let first: Vec<u64> = self.start.iter().zip(chunk_dims).map(|(&s, &cd)| s / cd).collect();
        let last: Vec<u64> = self
            .start
            .iter()
            .zip(&self.count)
            .zip(chunk_dims)
            .map(|((&s, &c), &cd)| (s + c - 1) / cd)
            .collect();

        let mut out = Vec::new();
        let mut coords = first.clone();
        loop {
            let mut start = Vec::with_capacity(coords.len());
            let mut count = Vec::with_capacity(coords.len());
            for d in 0..coords.len() {
                let chunk_lo = coords[d] * chunk_dims[d];
                let chunk_hi = chunk_lo + chunk_dims[d];
                let lo = self.start[d].max(chunk_lo);
                let hi = (self.start[d] + self.count[d]).min(chunk_hi);
                start.push(lo);
                count.push(hi - lo);
            }
            out.push(ChunkOverlap { coords: coords.clone(), region: Hyperslab::new(start, count) });

            // Odometer over the grid, last dimension fastest.
            let mut d = coords.len();
            loop {
                if d == 0 {
                    return out;
                }
                d -= 1;
                if coords[d] < last[d] {
                    coords[d] += 1;
                    break;
                }
                coords[d] = first[d];
            }
        }
    }
}

/// Origin of chunk `coords` in element coordinates.
pub fn chunk_origin(coords: &[u64], chunk_dims: &[u64]) -> Vec<u64> {
    coords.iter().zip(chunk_dims).map(|(&c, &cd)| c * cd).collect()
}

/// Copy a `count`-shaped block between two row-major buffers.
///
/// `src_origin`/`dst_origin` are the block's position inside each
/// buffer's own shape. Both buffers hold elements of `elem` bytes.
#[allow(clippy::too_many_arguments)]
pub fn copy_block(
    src: &[u8],
    src_shape: &[u64],
    src_origin: &[u64],
    dst: &mut [u8],
    dst_shape: &[u64],
    dst_origin: &[u64],
    count: &[u64],
    elem: usize,
) {
    let rank = count.len();
    if rank == 0 || count.iter().any(|&c| c == 0) {
        return;
    }

    let run = count[rank - 1] as usize * elem;
    let mut idx = vec![0u64; rank - 1];
    loop {
        let s = linear_offset(src_shape, src_origin, &idx) * elem;
        let t = linear_offset(dst_shape, dst_origin, &idx) * elem;
        dst[t..t + run].copy_from_slice(&src[s..s + run]);

        let mut d = rank - 1;
        loop {
            if d == 0 {
                return;
            }
            d -= 1;
            idx[d] += 1;
            if idx[d] < count[d] {
                break;
            }
            idx[d] = 0;
        }
    }
}

/// Row-major element offset of `origin + idx` (idx covers all but the last dim).
fn linear_offset(shape: &[u64], origin: &[u64], idx: &[u64]) -> usize {
    let mut off = 0u64;
    for d in 0..shape.len() {
        let i = origin[d] + idx.get(d).copied().unwrap_or(0);
        off = off * shape[d] + i;
    }
    off as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fits_within() {
        let slab = Hyperslab::new(vec![1, 0], vec![2, 4]);
        assert!(slab.fits_within(&[3, 4]));
        assert!(!slab.fits_within(&[2, 4]));
        assert!(!slab.fits_within(&[3]));
        assert!(!Hyperslab::new(vec![u64::MAX], vec![1]).fits_within(&[u64::MAX]));
    }

    #[test]
    fn test_chunk_overlaps_2d() {
        // rows 3..7, cols 0..5 over 4x4 chunks
        let slab = Hyperslab::new(vec![3, 0], vec![4, 5]);
        let overlaps = slab.chunk_overlaps(&[4, 4]);
        let coords: Vec<_> = overlaps.iter().map(|o| o.coords.clone()).collect();
        assert_eq!(coords, vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
        assert_eq!(overlaps[0].region, Hyperslab::new(vec![3, 0], vec![1, 4]));
        assert_eq!(overlaps[3].region, Hyperslab::new(vec![4, 4], vec![3, 1]));

        let total: u64 = overlaps.iter().map(|o| o.region.element_count()).sum();
        assert_eq!(total, slab.element_count());
    }

    #[test]
    fn test_chunk_overlaps_empty() {
        assert!(Hyperslab::new(vec![0], vec![0]).chunk_overlaps(&[4]).is_empty());
    }

    #[test]
    fn test_copy_block_2d() {
        // 3x4 source of u8, copy the 2x2 block at (1,1) into a 2x2 dst
        let src: Vec<u8> = (0..12).collect();
        let mut dst = vec![0u8; 4];
        copy_block(&src, &[3, 4], &[1, 1], &mut dst, &[2, 2], &[0, 0], &[2, 2], 1);
        assert_eq!(dst, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_copy_block_1d_wide_elements() {
        let src: Vec<u8> = (0..8).collect();
        let mut dst = vec![0u8; 12];
        copy_block(&src, &[4], &[1], &mut dst, &[6], &[3], &[2], 2);
        assert_eq!(dst, vec![0, 0, 0, 0, 0, 0, 2, 3, 4, 5, 0, 0]);
    }
}
