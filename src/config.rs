//! Session options

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// Default dirty-chunk cache budget (16 MiB)
pub const DEFAULT_CHUNK_CACHE_BYTES: usize = 16 * 1024 * 1024;

/// Chunk length of the four metadata arrays
pub const DEFAULT_METADATA_CHUNK_LEN: u64 = 64;

const ENV_SYNC: &str = "TRACESTORE_SYNC";
const ENV_CACHE_BYTES: &str = "TRACESTORE_CACHE_BYTES";
const ENV_METADATA_CHUNK: &str = "TRACESTORE_METADATA_CHUNK";

/// Tunables for a [`Session`](crate::Session)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreOptions {
    /// fsync the file on every flush
    pub sync_on_flush: bool,

    /// Buffered element bytes before dirty chunks are written back
    pub chunk_cache_bytes: usize,

    /// Chunk length used when creating metadata members
    pub metadata_chunk_len: u64,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            sync_on_flush: true,
            chunk_cache_bytes: DEFAULT_CHUNK_CACHE_BYTES,
            metadata_chunk_len: DEFAULT_METADATA_CHUNK_LEN,
        }
    }
}

impl StoreOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sync_on_flush(mut self, sync: bool) -> Self {
        self.sync_on_flush = sync;
        self
    }

    pub fn chunk_cache_bytes(mut self, bytes: usize) -> Self {
        self.chunk_cache_bytes = bytes;
        self
    }

    pub fn metadata_chunk_len(mut self, len: u64) -> Self {
        self.metadata_chunk_len = len.max(1);
        self
    }

    /// Defaults overridden by `TRACESTORE_*` environment variables.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut opts = Self::default();

        if let Some(raw) = lookup(ENV_SYNC) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => opts.sync_on_flush = true,
                "0" | "false" | "no" | "off" => opts.sync_on_flush = false,
                other => warn!("Ignoring {}={:?}: expected a boolean", ENV_SYNC, other),
            }
        }

        if let Some(raw) = lookup(ENV_CACHE_BYTES) {
            match raw.trim().parse::<usize>() {
                Ok(bytes) => opts.chunk_cache_bytes = bytes,
                Err(e) => warn!("Ignoring {}={:?}: {}", ENV_CACHE_BYTES, raw, e),
            }
        }

        if let Some(raw) = lookup(ENV_METADATA_CHUNK) {
            match raw.trim().parse::<u64>() {
                Ok(len) if len > 0 => opts.metadata_chunk_len = len,
                Ok(_) => warn!("Ignoring {}=0: chunk length must be positive", ENV_METADATA_CHUNK),
                Err(e) => warn!("Ignoring {}={:?}: {}", ENV_METADATA_CHUNK, raw, e),
            }
        }

        opts
    }

    /// Parse options from JSON; missing fields take their defaults.
    pub fn from_json(text: &str) -> Result<Self> {
        let mut opts: StoreOptions = serde_json::from_str(text)?;
        opts.metadata_chunk_len = opts.metadata_chunk_len.max(1);
        Ok(opts)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
