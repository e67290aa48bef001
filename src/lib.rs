//! tracestore - append-only hierarchical container for waveform captures
//!
//! # Architecture
//!
//! - **Single file**: 64-byte superblock + append-only data region
//! - **Catalog**: node tree (groups, arrays, named types) serialized with bincode,
//!   checksummed with BLAKE3 and repointed by the superblock on every flush
//! - **Chunked arrays**: N-D arrays with fixed or unlimited dimensions,
//!   optional zstd compression
//! - **Dirty-chunk cache**: element writes are buffered and written back on
//!   flush, end of append or cache pressure
//! - **Metadata groups**: four parallel arrays recording each capture run
//!
//! # Usage example
//!
//! ```no_run
//! use tracestore::{ExportTarget, SampleType, Session};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = Session::new();
//! session.create_new("capture.trc")?;
//!
//! let ch1 = ExportTarget::for_channel(1);
//! session.ensure_export_structure(std::slice::from_ref(&ch1), 4, SampleType::Int16)?;
//!
//! let traces = vec![vec![0i16, 120, 240, 120], vec![0, -120, -240, -120]];
//! session.append_trace_batch::<i16, _>(&ch1, &traces, "2025-01-01T00:00:00Z", "{}")?;
//!
//! let out = session.read_rect("/ch1/traces", 0, 2, 0, 4)?;
//! println!("{:?}", out.to_vec::<i16>()?);
//! session.close()?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod path;
pub mod session;
pub mod storage;
pub mod types;
pub mod worker;

pub use config::StoreOptions;
pub use error::{Result, SchemaIssue, StoreError};
pub use path::{join_path, normalize_path, parent_path};
pub use session::{
    AppendHandle, Appender, ArrayCreateParams, ArrayDescriptor, BatchSummary, ExportTarget,
    MetadataRecord, MetadataStatus, NodeType, RawAppendSummary, ReadOutput, Session,
    StructureReport,
};
pub use storage::{Backend, Extent, FileBackend, MemoryBackend};
pub use types::{ElementType, Sample, SampleType, TypeClass};
pub use worker::SessionWorker;
