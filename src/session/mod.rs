//! Container session
//!
//! A [`Session`] owns at most one open container and is the entry point
//! for every directory, array, append, metadata and read operation. All
//! calls are synchronous; confine a session to one thread (see
//! [`SessionWorker`](crate::worker::SessionWorker)) to keep I/O off a
//! latency-sensitive caller.

mod append;
mod arrays;
mod directory;
mod layout;
mod metadata;
mod reader;


use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use tracing::{error, info, warn};

use crate::config::StoreOptions;
use crate::error::{Result, StoreError};
use crate::path::normalize_path;
use crate::storage::{has_signature, ArrayEntry, ArrayId, Backend, Container, FileBackend, MemoryBackend, Node, MAGIC};

pub use append::{AppendHandle, Appender, RawAppendSummary};
pub use arrays::{ArrayCreateParams, ArrayDescriptor, MAX_CHUNK_BYTES, MAX_RANK};
pub use directory::NodeType;
pub use layout::{
    propose_trace_chunks, trace_array_params, BatchSummary, ExportTarget, StructureReport,
    TRACE_CHUNK_TARGET_BYTES,
};
pub use metadata::{MetadataRecord, MetadataStatus, METADATA_MEMBERS};
pub use reader::ReadOutput;

pub struct Session {
    container: Option<Container>,
    file_path: Option<PathBuf>,
    options: StoreOptions,
    /// Bumped on every open/create/close; handles carry the value they saw
    generation: u64,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    pub fn with_options(options: StoreOptions) -> Self {
        Self { container: None, file_path: None, options, generation: 0 }
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Cheap signature check: does the file start with the container magic?
    pub fn looks_like_container(path: &Path) -> bool {
        let mut prefix = [0u8; MAGIC.len()];
        match File::open(path).and_then(|mut f| f.read_exact(&mut prefix)) {
            Ok(()) => has_signature(&prefix),
            Err(_) => false,
        }
    }

    /// Open an existing container file read-write.
    ///
    /// Any container already open is closed first.
    pub fn open_existing(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.close_quietly();
        let path = path.as_ref();

        if !path.exists() {
            error!("File does not exist: {}", path.display());
            return Err(StoreError::FileNotFound(path.to_path_buf()));
        }
        if !Self::looks_like_container(path) {
            error!("File is not recognized as a container by signature: {}", path.display());
            return Err(StoreError::NotAContainer(path.to_path_buf()));
        }

        let backend = FileBackend::open(path)?;
        let container = Container::open(Box::new(backend), &self.options).map_err(|e| {
            error!("Failed to open container (corrupt/truncated?): {}: {}", path.display(), e);
            e
        })?;

        let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        info!("Opened container {}", abs.display());
        self.install(container, Some(abs));
        Ok(())
    }

    /// Create a new container file; the path must not exist yet.
    pub fn create_new(&mut self, path: impl AsRef<Path>) -> Result<()> {
        self.close_quietly();
        let path = path.as_ref();

        if path.exists() {
            error!("Cannot create, file already exists: {}", path.display());
            return Err(StoreError::FileExists(path.to_path_buf()));
        }

        let backend = FileBackend::create(path).map_err(|e| {
            error!("Failed to create container file {}: {}", path.display(), e);
            StoreError::Io(e)
        })?;
        let container = Container::create(Box::new(backend), &self.options)?;

        let abs = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        info!("Created container {}", abs.display());
        self.install(container, Some(abs));
        Ok(())
    }

    /// Create an empty container held in memory.
    pub fn create_in_memory(&mut self) -> Result<()> {
        self.create_on_backend(Box::new(MemoryBackend::new()), None)
    }

    /// Create an empty container on a caller-supplied backend.
    pub fn create_on_backend(&mut self, backend: Box<dyn Backend>, label: Option<PathBuf>) -> Result<()> {
        self.close_quietly();
        let container = Container::create(backend, &self.options)?;
        info!("Created container on custom backend");
        self.install(container, label);
        Ok(())
    }

    /// Open a container image on a caller-supplied backend.
    pub fn open_on_backend(&mut self, backend: Box<dyn Backend>, label: Option<PathBuf>) -> Result<()> {
        self.close_quietly();
        let container = Container::open(backend, &self.options)?;
        self.install(container, label);
        Ok(())
    }

    fn install(&mut self, container: Container, path: Option<PathBuf>) {
        self.container = Some(container);
        self.file_path = path;
        self.generation += 1;
    }

    /// Flush and close the container. Outstanding append handles become stale.
    pub fn close(&mut self) -> Result<()> {
        let container = self.container.take();
        let path = self.file_path.take();
        self.generation += 1;

        match container {
            Some(mut c) => {
                let result = c.flush();
                info!(
                    "Closed container {}",
                    path.as_deref().map(|p| p.display().to_string()).unwrap_or_else(|| "<memory>".into())
                );
                result
            }
            None => Ok(()),
        }
    }

    fn close_quietly(&mut self) {
        if let Err(e) = self.close() {
            warn!("Flush on close failed: {}", e);
        }
    }

    pub fn is_open(&self) -> bool {
        self.container.is_some()
    }

    /// Absolute path of the open container file (`None` when closed or in memory)
    pub fn file_path(&self) -> Option<&Path> {
        self.file_path.as_deref()
    }

    /// Persist all buffered writes and the catalog.
    pub fn flush(&mut self) -> Result<()> {
        self.container_mut()?.flush()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn container(&self) -> Result<&Container> {
        self.container.as_ref().ok_or(StoreError::NotOpen)
    }

    pub(crate) fn container_mut(&mut self) -> Result<&mut Container> {
        self.container.as_mut().ok_or(StoreError::NotOpen)
    }

    /// Flush after a structural change that is already visible in the
    /// session; a failure is reported but does not undo the change.
    pub(crate) fn flush_after_mutation(&mut self, op: &str, path: &str) {
        if let Some(c) = self.container.as_mut() {
            if let Err(e) = c.flush() {
                warn!("{}: flush failed after mutating {}: {}", op, path, e);
            }
        }
    }

    /// Resolve a normalized path to an array.
    pub(crate) fn array_ref(&self, path: &str) -> Result<(ArrayId, &ArrayEntry)> {
        let c = self.container()?;
        match c.catalog().node(path) {
            Some(Node::Array(id)) => {
                let entry = c.array(*id)?;
                Ok((*id, entry))
            }
            Some(_) => Err(StoreError::WrongKind {
                path: path.to_string(),
                expected: "array",
                found: self.node_type(path),
            }),
            None => Err(StoreError::PathNotFound(path.to_string())),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close_quietly();
    }
}

/// Log a rejected operation and pass the result through.
pub(crate) fn logged<T>(op: &str, path: &str, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        error!("{}: {} ({})", op, e, if path.is_empty() { "<empty path>" } else { path });
    }
    result
}

/// Normalize and reject an empty path.
pub(crate) fn require_path(path: &str) -> Result<String> {
    let p = normalize_path(path);
    if p.is_empty() {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(p)
}
