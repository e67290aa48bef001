//! Container engine
//!
//! Owns the backend, the in-memory catalog and the dirty-chunk cache.
//! Layout: a 64-byte superblock followed by an append-only data region
//! of chunk blobs, string heap blobs and catalog blobs. A flush commits
//! dirty chunks, appends a fresh catalog, syncs, then repoints the
//! superblock and syncs again.

use std::collections::BTreeSet;
use std::io;

use rayon::prelude::*;
use tracing::{debug, warn};

use super::backend::Backend;
use super::catalog::{ArrayEntry, ArrayId, Catalog, ChunkSlot, Node};
use super::chunk_cache::{ChunkCache, ChunkKey};
use super::hyperslab::{chunk_origin, copy_block, Hyperslab};
use super::superblock::{Superblock, SUPERBLOCK_SIZE};
use crate::config::StoreOptions;
use crate::error::{Result, StoreError};
use crate::types::STRING_REF_SIZE;

pub struct Container {
    backend: Box<dyn Backend>,
    catalog: Catalog,
    cache: ChunkCache,
    /// Next append position in the data region
    end_of_data: u64,
    sync_on_flush: bool,
}

impl Container {
    /// Initialize an empty container on a fresh backend.
    pub fn create(backend: Box<dyn Backend>, opts: &StoreOptions) -> Result<Self> {
        let mut container = Self {
            backend,
            catalog: Catalog::new(),
            cache: ChunkCache::new(opts.chunk_cache_bytes),
            end_of_data: SUPERBLOCK_SIZE as u64,
            sync_on_flush: opts.sync_on_flush,
        };
        container.flush()?;
        Ok(container)
    }

    /// Load an existing container. Any structural problem is `Corrupt`.
    pub fn open(mut backend: Box<dyn Backend>, opts: &StoreOptions) -> Result<Self> {
        let len = backend.len()?;
        if len < SUPERBLOCK_SIZE as u64 {
            return Err(StoreError::Corrupt(format!(
                "file is {} bytes, shorter than the superblock",
                len
            )));
        }

        let mut head = [0u8; SUPERBLOCK_SIZE];
        backend.read_at(0, &mut head)?;
        let sb = Superblock::parse(&head)?;

        let in_bounds = sb
            .catalog_offset
            .checked_add(sb.catalog_len)
            .map_or(false, |end| end <= len);
        if !in_bounds {
            return Err(StoreError::Corrupt(format!(
                "catalog at {}+{} lies past end of file ({})",
                sb.catalog_offset, sb.catalog_len, len
            )));
        }

        let mut bytes = vec![0u8; sb.catalog_len as usize];
        backend.read_at(sb.catalog_offset, &mut bytes)?;
        if blake3::hash(&bytes).as_bytes() != &sb.catalog_hash {
            return Err(StoreError::Corrupt("catalog checksum mismatch".into()));
        }
        let catalog = Catalog::decode(&bytes)?;

        debug!(
            "Opened container: catalog {} bytes at {}, {} arrays",
            sb.catalog_len,
            sb.catalog_offset,
            catalog.array_count()
        );

        Ok(Self {
            backend,
            catalog,
            cache: ChunkCache::new(opts.chunk_cache_bytes),
            end_of_data: len,
            sync_on_flush: opts.sync_on_flush,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn catalog_mut(&mut self) -> &mut Catalog {
        &mut self.catalog
    }

    pub fn array(&self, id: ArrayId) -> Result<&ArrayEntry> {
        self.catalog
            .array(id)
            .ok_or_else(|| StoreError::Corrupt(format!("array #{} missing from catalog", id)))
    }

    /// Unlink a node and drop any buffered chunks it owned.
    pub fn unlink(&mut self, parent: &str, name: &str) -> Option<Node> {
        let removed = self.catalog.remove_child(parent, name)?;
        if let Node::Array(id) = removed {
            self.cache.discard_array(id);
        }
        Some(removed)
    }

    /// Persist everything: dirty chunks, catalog, superblock.
    pub fn flush(&mut self) -> Result<()> {
        let chunks = self.commit_all()?;

        let bytes = self.catalog.encode()?;
        let offset = self.append_blob(&bytes)?;
        if self.sync_on_flush {
            self.backend.sync()?;
        }

        let sb = Superblock::new(offset, bytes.len() as u64, *blake3::hash(&bytes).as_bytes());
        self.backend.write_at(0, &sb.to_bytes())?;
        if self.sync_on_flush {
            self.backend.sync()?;
        }

        debug!(
            "Flushed container: {} chunks committed, catalog {} bytes at {}",
            chunks,
            bytes.len(),
            offset
        );
        Ok(())
    }

    /// Write back the dirty chunks of one array.
    pub fn commit_array(&mut self, id: ArrayId) -> Result<usize> {
        let dirty = self.cache.take_array(id);
        self.write_chunks(dirty)
    }

    /// Write back every dirty chunk.
    pub fn commit_all(&mut self) -> Result<usize> {
        let dirty = self.cache.take_all();
        self.write_chunks(dirty)
    }

    /// Forget buffered writes of one array.
    pub fn discard_array(&mut self, id: ArrayId) -> usize {
        self.cache.discard_array(id)
    }

    pub fn dirty_bytes(&self) -> usize {
        self.cache.bytes()
    }

    /// Write chunks back to the file. A chunk leaves the cache only once its
    /// blob is stored; on failure the unwritten chunks are buffered again.
    fn write_chunks(&mut self, dirty: Vec<(ChunkKey, Vec<u8>)>) -> Result<usize> {
        let prepared: Vec<(ChunkKey, Vec<u8>, Option<u8>)> = dirty
            .into_iter()
            .filter_map(|(key, data)| {
                let level = self.catalog.array(key.0)?.compression;
                Some((key, data, level))
            })
            .collect();
        if prepared.is_empty() {
            return Ok(0);
        }

        let encoded: Vec<(ChunkKey, Vec<u8>, io::Result<Option<Vec<u8>>>)> = prepared
            .into_par_iter()
            .map(|(key, data, level)| {
                let blob = match level {
                    Some(level) => zstd::stream::encode_all(&data[..], i32::from(level)).map(Some),
                    None => Ok(None),
                };
                (key, data, blob)
            })
            .collect();

        let mut count = 0;
        let mut pending = encoded.into_iter();
        while let Some((key, data, blob)) = pending.next() {
            let stored = blob.map_err(StoreError::from).and_then(|compressed| {
                let bytes = compressed.as_deref().unwrap_or(&data[..]);
                self.store_chunk(&key, bytes, compressed.is_some())
            });
            if let Err(e) = stored {
                let mut requeued = 1;
                self.cache.insert(key, data);
                for (key, data, _) in pending {
                    self.cache.insert(key, data);
                    requeued += 1;
                }
                warn!("Chunk write-back failed after {} chunks, {} kept buffered: {}", count, requeued, e);
                return Err(e);
            }
            count += 1;
        }
        Ok(count)
    }

    fn store_chunk(&mut self, key: &ChunkKey, blob: &[u8], compressed: bool) -> Result<()> {
        let (id, coords) = key;
        let existing = self.catalog.array(*id).and_then(|e| e.chunks.get(coords).copied());
        let slot = match existing {
            Some(slot) if !compressed && slot.stored_len == blob.len() as u64 => {
                self.backend.write_at(slot.offset, blob)?;
                slot
            }
            _ => {
                let offset = self.append_blob(blob)?;
                ChunkSlot { offset, stored_len: blob.len() as u64 }
            }
        };
        if let Some(entry) = self.catalog.array_mut(*id) {
            entry.chunks.insert(coords.clone(), slot);
        }
        Ok(())
    }

    fn append_blob(&mut self, data: &[u8]) -> Result<u64> {
        let offset = self.end_of_data;
        self.backend.write_at(offset, data)?;
        self.end_of_data += data.len() as u64;
        Ok(offset)
    }

    fn read_blob(&mut self, offset: u64, len: u64) -> Result<Vec<u8>> {
        let in_bounds = offset >= SUPERBLOCK_SIZE as u64
            && offset.checked_add(len).map_or(false, |end| end <= self.end_of_data);
        if !in_bounds {
            return Err(StoreError::Corrupt(format!("blob {}+{} out of bounds", offset, len)));
        }
        let mut buf = vec![0u8; len as usize];
        self.backend.read_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Committed chunk contents; absent chunks read as zeros.
    fn load_stored_chunk(&mut self, id: ArrayId, coords: &[u64]) -> Result<Vec<u8>> {
        let entry = self.array(id)?;
        let chunk_bytes = entry.chunk_bytes();
        let compressed = entry.compression.is_some();
        let slot = match entry.chunks.get(coords) {
            Some(slot) => *slot,
            None => return Ok(vec![0u8; chunk_bytes]),
        };

        let raw = self.read_blob(slot.offset, slot.stored_len)?;
        let data = if compressed {
            zstd::stream::decode_all(&raw[..])
                .map_err(|e| StoreError::Corrupt(format!("chunk {:?} of array #{}: {}", coords, id, e)))?
        } else {
            raw
        };
        if data.len() != chunk_bytes {
            return Err(StoreError::Corrupt(format!(
                "chunk {:?} of array #{} is {} bytes, expected {}",
                coords,
                id,
                data.len(),
                chunk_bytes
            )));
        }
        Ok(data)
    }

    fn load_chunk(&mut self, id: ArrayId, coords: &[u64]) -> Result<Vec<u8>> {
        if let Some(data) = self.cache.get(&(id, coords.to_vec())) {
            return Ok(data.clone());
        }
        self.load_stored_chunk(id, coords)
    }

    /// Read a selection as packed row-major bytes.
    pub fn read_selection(&mut self, id: ArrayId, slab: &Hyperslab) -> Result<Vec<u8>> {
        let (elem, chunk_dims) = {
            let entry = self.array(id)?;
            check_extent(id, slab, &entry.dims)?;
            (entry.element_size(), entry.chunk_dims.clone())
        };
        let total = usize::try_from(slab.element_count())
            .ok()
            .and_then(|n| n.checked_mul(elem))
            .ok_or_else(|| StoreError::Corrupt(format!("selection of array #{} too large", id)))?;

        let mut out = vec![0u8; total];
        for overlap in slab.chunk_overlaps(&chunk_dims) {
            let origin = chunk_origin(&overlap.coords, &chunk_dims);
            let in_chunk: Vec<u64> = overlap.region.start.iter().zip(&origin).map(|(s, o)| s - o).collect();
            let in_sel: Vec<u64> = overlap.region.start.iter().zip(&slab.start).map(|(s, o)| s - o).collect();

            let key = (id, overlap.coords);
            let stored = if self.cache.contains(&key) {
                None
            } else {
                Some(self.load_stored_chunk(id, &key.1)?)
            };
            let chunk: &[u8] = match &stored {
                Some(data) => data,
                None => self.cache.get(&key).map(Vec::as_slice).unwrap_or(&[]),
            };
            if chunk.is_empty() {
                continue;
            }
            copy_block(chunk, &chunk_dims, &in_chunk, &mut out, &slab.count, &in_sel, &overlap.region.count, elem);
        }
        Ok(out)
    }

    /// Buffer a selection write; `data` is packed row-major.
    pub fn write_selection(&mut self, id: ArrayId, slab: &Hyperslab, data: &[u8]) -> Result<()> {
        let (elem, chunk_dims, chunk_bytes) = {
            let entry = self.array(id)?;
            check_extent(id, slab, &entry.dims)?;
            (entry.element_size(), entry.chunk_dims.clone(), entry.chunk_bytes())
        };
        let expected = slab.element_count() as usize * elem;
        if data.len() != expected {
            return Err(StoreError::params(
                &format!("array #{}", id),
                format!("selection needs {} bytes, got {}", expected, data.len()),
            ));
        }

        for overlap in slab.chunk_overlaps(&chunk_dims) {
            let origin = chunk_origin(&overlap.coords, &chunk_dims);
            let in_chunk: Vec<u64> = overlap.region.start.iter().zip(&origin).map(|(s, o)| s - o).collect();
            let in_sel: Vec<u64> = overlap.region.start.iter().zip(&slab.start).map(|(s, o)| s - o).collect();

            let key = (id, overlap.coords);
            if !self.cache.contains(&key) {
                let base = if overlap.region.count == chunk_dims {
                    vec![0u8; chunk_bytes]
                } else {
                    self.load_stored_chunk(id, &key.1)?
                };
                self.cache.insert(key.clone(), base);
            }
            if let Some(chunk) = self.cache.get_mut(&key) {
                copy_block(data, &slab.count, &in_sel, chunk, &chunk_dims, &in_chunk, &overlap.region.count, elem);
            }
        }

        if self.cache.over_budget() {
            match self.commit_all() {
                Ok(written) => debug!("Chunk cache over budget, wrote back {} chunks", written),
                Err(e) => warn!("Chunk cache over budget, write-back deferred: {}", e),
            }
        }
        Ok(())
    }

    /// Change the current shape of an array.
    ///
    /// Shrinking drops chunks that fall entirely outside the new shape and
    /// marks the array so the next growth zeroes stale tail bytes first.
    pub fn set_extent(&mut self, id: ArrayId, new_dims: &[u64]) -> Result<()> {
        let (old_dims, needs_scrub) = {
            let entry = self.array(id)?;
            if new_dims.len() != entry.rank() {
                return Err(StoreError::params(
                    &format!("array #{}", id),
                    format!("extent rank {} != array rank {}", new_dims.len(), entry.rank()),
                ));
            }
            if let Some(d) = (0..new_dims.len()).find(|&d| !entry.max_dims[d].admits(new_dims[d])) {
                return Err(StoreError::params(
                    &format!("array #{}", id),
                    format!("dim {} length {} exceeds max {}", d, new_dims[d], entry.max_dims[d]),
                ));
            }
            (entry.dims.clone(), entry.needs_tail_scrub)
        };

        let growing = new_dims.iter().zip(&old_dims).any(|(n, o)| n > o);
        let shrinking = new_dims.iter().zip(&old_dims).any(|(n, o)| n < o);

        if growing && needs_scrub {
            self.scrub_tail(id, &old_dims)?;
        }
        if shrinking {
            self.drop_chunks_outside(id, new_dims);
        }

        if let Some(entry) = self.catalog.array_mut(id) {
            entry.dims = new_dims.to_vec();
            if shrinking {
                entry.needs_tail_scrub = true;
            } else if growing {
                entry.needs_tail_scrub = false;
            }
        }
        Ok(())
    }

    fn drop_chunks_outside(&mut self, id: ArrayId, dims: &[u64]) {
        let chunk_dims = match self.catalog.array(id) {
            Some(entry) => entry.chunk_dims.clone(),
            None => return,
        };
        let outside = |coords: &Vec<u64>| {
            chunk_origin(coords, &chunk_dims).iter().zip(dims).any(|(o, d)| o >= d)
        };

        for coords in self.cache.coords_of(id).into_iter().filter(|c| outside(c)) {
            self.cache.remove(&(id, coords));
        }
        if let Some(entry) = self.catalog.array_mut(id) {
            entry.chunks.retain(|coords, _| !outside(coords));
        }
    }

    /// Zero every byte of every chunk that lies outside `dims`.
    fn scrub_tail(&mut self, id: ArrayId, dims: &[u64]) -> Result<()> {
        let (chunk_dims, chunk_bytes, elem, mut coords) = {
            let entry = self.array(id)?;
            let coords: BTreeSet<Vec<u64>> = entry.chunks.keys().cloned().collect();
            (entry.chunk_dims.clone(), entry.chunk_bytes(), entry.element_size(), coords)
        };
        coords.extend(self.cache.coords_of(id));

        let zero_origin = vec![0u64; chunk_dims.len()];
        let mut scrubbed = 0usize;
        for c in coords {
            let origin = chunk_origin(&c, &chunk_dims);
            let inside: Vec<u64> = origin
                .iter()
                .zip(dims)
                .zip(&chunk_dims)
                .map(|((&o, &d), &cd)| d.saturating_sub(o).min(cd))
                .collect();
            if inside == chunk_dims {
                continue;
            }

            let current = self.load_chunk(id, &c)?;
            let mut clean = vec![0u8; chunk_bytes];
            copy_block(&current, &chunk_dims, &zero_origin, &mut clean, &chunk_dims, &zero_origin, &inside, elem);
            if clean != current {
                self.cache.insert((id, c), clean);
                scrubbed += 1;
            }
        }
        if scrubbed > 0 {
            debug!("Zeroed stale tail in {} chunks of array #{}", scrubbed, id);
        }
        Ok(())
    }

    /// Store a string in the heap and return its 16-byte reference.
    pub fn write_string(&mut self, text: &str) -> Result<[u8; STRING_REF_SIZE]> {
        let mut reference = [0u8; STRING_REF_SIZE];
        if text.is_empty() {
            return Ok(reference);
        }
        let offset = self.append_blob(text.as_bytes())?;
        reference[..8].copy_from_slice(&offset.to_le_bytes());
        reference[8..].copy_from_slice(&(text.len() as u64).to_le_bytes());
        Ok(reference)
    }

    /// Resolve a 16-byte string reference.
    pub fn read_string(&mut self, reference: &[u8]) -> Result<String> {
        if reference.len() != STRING_REF_SIZE {
            return Err(StoreError::Corrupt(format!("string reference of {} bytes", reference.len())));
        }
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&reference[..8]);
        let offset = u64::from_le_bytes(raw);
        raw.copy_from_slice(&reference[8..]);
        let len = u64::from_le_bytes(raw);
        if len == 0 {
            return Ok(String::new());
        }

        let bytes = self.read_blob(offset, len)?;
        String::from_utf8(bytes).map_err(|e| StoreError::Corrupt(format!("string at {}: {}", offset, e)))
    }
}

fn check_extent(id: ArrayId, slab: &Hyperslab, dims: &[u64]) -> Result<()> {
    if slab.fits_within(dims) {
        return Ok(());
    }
    Err(StoreError::range(
        &format!("array #{}", id),
        format!("selection {:?}+{:?} outside extent {:?}", slab.start, slab.count, dims),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::backend::{FileBackend, MemoryBackend};
    use crate::storage::catalog::Extent;
    use crate::types::ElementType;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn opts() -> StoreOptions {
        StoreOptions::default().sync_on_flush(false)
    }

    fn add_rows_array(c: &mut Container, cols: u64, rows_per_chunk: u64, compression: Option<u8>) -> ArrayId {
        let id = c.catalog_mut().add_array(ArrayEntry {
            ty: ElementType::UInt8.persisted(),
            dims: vec![0, cols],
            max_dims: vec![Extent::Unlimited, Extent::Fixed(cols)],
            chunk_dims: vec![rows_per_chunk, cols],
            chunked: true,
            compression,
            chunks: BTreeMap::new(),
            needs_tail_scrub: false,
        });
        c.catalog_mut().insert_child("/", "a", Node::Array(id)).unwrap();
        id
    }

    #[test]
    fn test_write_read_across_chunks() {
        let mut c = Container::create(Box::new(MemoryBackend::new()), &opts()).unwrap();
        let id = add_rows_array(&mut c, 3, 2, None);
        c.set_extent(id, &[5, 3]).unwrap();

        let data: Vec<u8> = (1..=15).collect();
        c.write_selection(id, &Hyperslab::rows(0, 5, 3), &data).unwrap();
        assert_eq!(c.read_selection(id, &Hyperslab::rows(0, 5, 3)).unwrap(), data);

        c.commit_all().unwrap();
        assert_eq!(c.dirty_bytes(), 0);
        let mid = c.read_selection(id, &Hyperslab::new(vec![1, 1], vec![3, 2])).unwrap();
        assert_eq!(mid, vec![5, 6, 8, 9, 11, 12]);
    }

    #[test]
    fn test_unwritten_rows_read_zero() {
        let mut c = Container::create(Box::new(MemoryBackend::new()), &opts()).unwrap();
        let id = add_rows_array(&mut c, 2, 4, None);
        c.set_extent(id, &[6, 2]).unwrap();
        c.write_selection(id, &Hyperslab::rows(0, 1, 2), &[9, 9]).unwrap();
        let all = c.read_selection(id, &Hyperslab::rows(0, 6, 2)).unwrap();
        assert_eq!(all, vec![9, 9, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_shrink_then_grow_zeroes_tail() {
        let mut c = Container::create(Box::new(MemoryBackend::new()), &opts()).unwrap();
        let id = add_rows_array(&mut c, 1, 4, None);
        c.set_extent(id, &[4, 1]).unwrap();
        c.write_selection(id, &Hyperslab::rows(0, 4, 1), &[1, 2, 3, 4]).unwrap();
        c.commit_all().unwrap();

        c.set_extent(id, &[2, 1]).unwrap();
        assert!(c.array(id).unwrap().needs_tail_scrub);
        c.set_extent(id, &[4, 1]).unwrap();
        assert!(!c.array(id).unwrap().needs_tail_scrub);
        assert_eq!(c.read_selection(id, &Hyperslab::rows(0, 4, 1)).unwrap(), vec![1, 2, 0, 0]);
    }

    #[test]
    fn test_shrink_drops_outside_chunks() {
        let mut c = Container::create(Box::new(MemoryBackend::new()), &opts()).unwrap();
        let id = add_rows_array(&mut c, 1, 2, None);
        c.set_extent(id, &[6, 1]).unwrap();
        c.write_selection(id, &Hyperslab::rows(0, 6, 1), &[1; 6]).unwrap();
        c.commit_all().unwrap();
        assert_eq!(c.array(id).unwrap().chunks.len(), 3);

        c.set_extent(id, &[3, 1]).unwrap();
        assert_eq!(c.array(id).unwrap().chunks.len(), 2);
    }

    #[test]
    fn test_extent_limits() {
        let mut c = Container::create(Box::new(MemoryBackend::new()), &opts()).unwrap();
        let id = add_rows_array(&mut c, 2, 2, None);
        assert!(c.set_extent(id, &[1, 3]).is_err());
        assert!(c.set_extent(id, &[1]).is_err());
        assert!(c.set_extent(id, &[1_000_000, 2]).is_ok());
    }

    #[test]
    fn test_compressed_chunks_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("z.trc");
        let data: Vec<u8> = (0..=255u8).map(|i| i % 4).collect();

        {
            let mut c = Container::create(Box::new(FileBackend::create(&path).unwrap()), &opts()).unwrap();
            let id = add_rows_array(&mut c, 16, 16, Some(3));
            c.set_extent(id, &[16, 16]).unwrap();
            c.write_selection(id, &Hyperslab::rows(0, 16, 16), &data).unwrap();
            c.flush().unwrap();
            assert!(c.array(id).unwrap().stored_bytes() < 256);
        }

        let mut c = Container::open(Box::new(FileBackend::open(&path).unwrap()), &opts()).unwrap();
        let (id, _) = c.catalog().array_at("/a").unwrap();
        assert_eq!(c.read_selection(id, &Hyperslab::rows(0, 16, 16)).unwrap(), data);
    }

    #[test]
    fn test_reopen_sees_last_flush_only() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("r.trc");
        {
            let mut c = Container::create(Box::new(FileBackend::create(&path).unwrap()), &opts()).unwrap();
            let id = add_rows_array(&mut c, 1, 4, None);
            c.set_extent(id, &[2, 1]).unwrap();
            c.flush().unwrap();
            c.set_extent(id, &[3, 1]).unwrap();
        }
        let c = Container::open(Box::new(FileBackend::open(&path).unwrap()), &opts()).unwrap();
        let (_, entry) = c.catalog().array_at("/a").unwrap();
        assert_eq!(entry.dims, vec![2, 1]);
    }

    #[test]
    fn test_corrupt_catalog_detected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.trc");
        {
            Container::create(Box::new(FileBackend::create(&path).unwrap()), &opts()).unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        std::fs::write(&path, &bytes).unwrap();

        let err = Container::open(Box::new(FileBackend::open(&path).unwrap()), &opts()).err();
        assert!(matches!(err, Some(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_strings() {
        let mut c = Container::create(Box::new(MemoryBackend::new()), &opts()).unwrap();
        let r = c.write_string("2026-10-16T12:00:00").unwrap();
        assert_eq!(c.read_string(&r).unwrap(), "2026-10-16T12:00:00");
        let empty = c.write_string("").unwrap();
        assert_eq!(empty, [0u8; 16]);
        assert_eq!(c.read_string(&empty).unwrap(), "");
    }

    #[test]
    fn test_unlink_discards_buffered_chunks() {
        let mut c = Container::create(Box::new(MemoryBackend::new()), &opts()).unwrap();
        let id = add_rows_array(&mut c, 1, 4, None);
        c.set_extent(id, &[1, 1]).unwrap();
        c.write_selection(id, &Hyperslab::rows(0, 1, 1), &[7]).unwrap();
        assert!(c.dirty_bytes() > 0);
        assert!(matches!(c.unlink("/", "a"), Some(Node::Array(_))));
        assert_eq!(c.dirty_bytes(), 0);
        c.flush().unwrap();
    }

    /// Memory backend whose writes can be switched off.
    struct FlakyBackend {
        inner: MemoryBackend,
        fail_writes: Arc<AtomicBool>,
    }

    impl Backend for FlakyBackend {
        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
            self.inner.read_at(offset, buf)
        }

        fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "write refused"));
            }
            self.inner.write_at(offset, data)
        }

        fn len(&mut self) -> io::Result<u64> {
            self.inner.len()
        }

        fn sync(&mut self) -> io::Result<()> {
            self.inner.sync()
        }
    }

    #[test]
    fn test_failed_write_back_keeps_chunks_buffered() {
        let fail = Arc::new(AtomicBool::new(false));
        let backend = FlakyBackend { inner: MemoryBackend::new(), fail_writes: fail.clone() };
        let mut c = Container::create(Box::new(backend), &opts()).unwrap();
        let id = add_rows_array(&mut c, 2, 1, Some(1));
        c.set_extent(id, &[3, 2]).unwrap();
        c.write_selection(id, &Hyperslab::rows(0, 3, 2), &[1, 2, 3, 4, 5, 6]).unwrap();
        let dirty = c.dirty_bytes();

        fail.store(true, Ordering::SeqCst);
        assert!(matches!(c.commit_array(id), Err(StoreError::Io(_))));
        assert!(c.flush().is_err());
        assert_eq!(c.dirty_bytes(), dirty);
        assert_eq!(c.read_selection(id, &Hyperslab::rows(0, 3, 2)).unwrap(), vec![1, 2, 3, 4, 5, 6]);

        fail.store(false, Ordering::SeqCst);
        c.flush().unwrap();
        assert_eq!(c.dirty_bytes(), 0);
        assert_eq!(c.array(id).unwrap().chunks.len(), 3);
        assert_eq!(c.read_selection(id, &Hyperslab::rows(0, 3, 2)).unwrap(), vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_cache_pressure_failure_is_deferred() {
        let fail = Arc::new(AtomicBool::new(false));
        let backend = FlakyBackend { inner: MemoryBackend::new(), fail_writes: fail.clone() };
        let opts = StoreOptions::default().sync_on_flush(false).chunk_cache_bytes(1);
        let mut c = Container::create(Box::new(backend), &opts).unwrap();
        let id = add_rows_array(&mut c, 2, 1, None);
        c.set_extent(id, &[2, 2]).unwrap();

        fail.store(true, Ordering::SeqCst);
        c.write_selection(id, &Hyperslab::rows(0, 1, 2), &[7, 8]).unwrap();
        c.write_selection(id, &Hyperslab::rows(1, 1, 2), &[9, 10]).unwrap();
        assert_eq!(c.dirty_bytes(), 4);

        fail.store(false, Ordering::SeqCst);
        c.flush().unwrap();
        assert_eq!(c.read_selection(id, &Hyperslab::rows(0, 2, 2)).unwrap(), vec![7, 8, 9, 10]);
    }

    #[test]
    fn test_selection_outside_extent_rejected() {
        let mut c = Container::create(Box::new(MemoryBackend::new()), &opts()).unwrap();
        let id = add_rows_array(&mut c, 2, 2, None);
        c.set_extent(id, &[2, 2]).unwrap();

        let past_end = Hyperslab::rows(1, 2, 2);
        assert!(matches!(c.write_selection(id, &past_end, &[0; 4]), Err(StoreError::OutOfRange { .. })));
        assert!(matches!(c.read_selection(id, &past_end), Err(StoreError::OutOfRange { .. })));
        assert!(matches!(
            c.read_selection(id, &Hyperslab::new(vec![0], vec![1])),
            Err(StoreError::OutOfRange { .. })
        ));
        assert_eq!(c.dirty_bytes(), 0);
    }
}
