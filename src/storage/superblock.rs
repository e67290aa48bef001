//! Fixed-size container header
//!
//! The superblock is the only part of the file rewritten in place. It
//! points at the current catalog blob and carries its checksum, so a
//! reader either sees the previous catalog or the new one.

use crate::error::{Result, StoreError};

/// File signature
pub const MAGIC: [u8; 8] = *b"\x89TRCSTR\n";

/// Format version
pub const FORMAT_VERSION: u16 = 1;

/// Superblock size on disk
pub const SUPERBLOCK_SIZE: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub magic: [u8; 8],
    pub version: u16,
    pub flags: u16,
    pub catalog_offset: u64,
    pub catalog_len: u64,
    pub catalog_hash: [u8; 32],
}

impl Superblock {
    pub fn new(catalog_offset: u64, catalog_len: u64, catalog_hash: [u8; 32]) -> Self {
        Self {
            magic: MAGIC,
            version: FORMAT_VERSION,
            flags: 0,
            catalog_offset,
            catalog_len,
            catalog_hash,
        }
    }

    pub fn to_bytes(&self) -> [u8; SUPERBLOCK_SIZE] {
        let mut buf = [0u8; SUPERBLOCK_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10..12].copy_from_slice(&self.flags.to_le_bytes());
        buf[12..20].copy_from_slice(&self.catalog_offset.to_le_bytes());
        buf[20..28].copy_from_slice(&self.catalog_len.to_le_bytes());
        buf[28..60].copy_from_slice(&self.catalog_hash);
        buf
    }

    /// Parse and validate a superblock image.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SUPERBLOCK_SIZE {
            return Err(StoreError::Corrupt(format!(
                "superblock truncated: {} of {} bytes",
                bytes.len(),
                SUPERBLOCK_SIZE
            )));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[0..8]);
        let mut catalog_hash = [0u8; 32];
        catalog_hash.copy_from_slice(&bytes[28..60]);

        let sb = Superblock {
            magic,
            version: u16::from_le_bytes([bytes[8], bytes[9]]),
            flags: u16::from_le_bytes([bytes[10], bytes[11]]),
            catalog_offset: read_u64(&bytes[12..20]),
            catalog_len: read_u64(&bytes[20..28]),
            catalog_hash,
        };
        sb.validate()?;
        Ok(sb)
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(StoreError::Corrupt(format!("bad signature: {:?}", self.magic)));
        }
        if self.version != FORMAT_VERSION {
            return Err(StoreError::Corrupt(format!(
                "unsupported format version: {}",
                self.version
            )));
        }
        if self.catalog_offset < SUPERBLOCK_SIZE as u64 || self.catalog_len == 0 {
            return Err(StoreError::Corrupt(format!(
                "catalog pointer out of bounds: offset={} len={}",
                self.catalog_offset, self.catalog_len
            )));
        }
        Ok(())
    }
}

/// True when `prefix` starts with the container signature.
pub fn has_signature(prefix: &[u8]) -> bool {
    prefix.len() >= MAGIC.len() && prefix[..MAGIC.len()] == MAGIC
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(bytes);
    u64::from_le_bytes(raw)
}
