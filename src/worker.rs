//! Session worker - runs a `Session` on its own thread
//!
//! Every call is sent as a command over a channel and answered on a
//! per-command reply channel, so container I/O never runs on the caller's
//! thread.
//!
//! ```text
//! Caller thread(s)         Channel                    Worker thread
//!     │                       │                             │
//!     ├─ ensure_group() ─────►│ Command::EnsureGroup ──────►│ session.ensure_group()
//!     ├─ append_traces() ────►│ Command::AppendTraceRows ──►│ session.append_trace_rows()
//!     │◄──────────────────────│ reply ◄─────────────────────│
//! ```

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use tracing::{debug, info, warn};

use crate::config::StoreOptions;
use crate::error::{Result, StoreError};
use crate::session::{
    ArrayCreateParams, ArrayDescriptor, BatchSummary, ExportTarget, MetadataRecord, NodeType,
    RawAppendSummary, ReadOutput, Session, StructureReport,
};
use crate::types::{Sample, SampleType};

/// Commands understood by the worker thread
pub enum Command {
    CreateNew {
        path: PathBuf,
        response_tx: Sender<Result<()>>,
    },
    OpenExisting {
        path: PathBuf,
        response_tx: Sender<Result<()>>,
    },
    Close {
        response_tx: Sender<Result<()>>,
    },
    IsOpen {
        response_tx: Sender<bool>,
    },

    NodeType {
        path: String,
        response_tx: Sender<NodeType>,
    },
    ListChildren {
        path: String,
        response_tx: Sender<Result<Vec<String>>>,
    },
    EnsureGroup {
        path: String,
        response_tx: Sender<Result<()>>,
    },
    RemoveLink {
        path: String,
        response_tx: Sender<Result<()>>,
    },

    CreateArray {
        params: ArrayCreateParams,
        response_tx: Sender<Result<()>>,
    },
    Describe {
        path: String,
        response_tx: Sender<Result<ArrayDescriptor>>,
    },

    EnsureExportStructure {
        targets: Vec<ExportTarget>,
        samples: u64,
        sample_type: SampleType,
        response_tx: Sender<Result<StructureReport>>,
    },
    AppendTraceRows {
        target: ExportTarget,
        sample_type: SampleType,
        cols: u64,
        data: Vec<u8>,
        timestamp: String,
        settings: String,
        response_tx: Sender<Result<BatchSummary>>,
    },
    AppendRawSlice {
        path: String,
        payload: Vec<u8>,
        start_byte: u64,
        byte_count: u64,
        cols: u64,
        type_text: String,
        response_tx: Sender<Result<RawAppendSummary>>,
    },

    EnsureMetadataGroup {
        path: String,
        response_tx: Sender<Result<()>>,
    },
    AppendMetadataRecord {
        group: String,
        first_trace: u64,
        trace_count: u64,
        timestamp: String,
        settings: String,
        response_tx: Sender<Result<u64>>,
    },
    ReadMetadataRecords {
        group: String,
        response_tx: Sender<Result<Vec<MetadataRecord>>>,
    },

    ReadLinear {
        path: String,
        start: u64,
        count: u64,
        response_tx: Sender<Result<ReadOutput>>,
    },
    ReadRect {
        path: String,
        row_start: u64,
        row_count: u64,
        col_start: u64,
        col_count: u64,
        response_tx: Sender<Result<ReadOutput>>,
    },

    Flush {
        response_tx: Sender<Result<()>>,
    },
    Shutdown,
}

/// Handle to a session running on a dedicated thread
pub struct SessionWorker {
    command_tx: Sender<Command>,
    worker_handle: Option<JoinHandle<()>>,
}

impl SessionWorker {
    /// Spawn a worker around a fresh, closed session.
    pub fn spawn(options: StoreOptions) -> Result<Self> {
        let session = Session::with_options(options);
        let (command_tx, command_rx) = unbounded::<Command>();

        let worker_handle = thread::Builder::new()
            .name("tracestore-session".into())
            .spawn(move || worker_loop(session, command_rx))?;

        Ok(Self { command_tx, worker_handle: Some(worker_handle) })
    }

    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (response_tx, response_rx) = bounded(1);
        self.command_tx
            .send(make(response_tx))
            .map_err(|_| StoreError::WorkerStopped)?;
        response_rx.recv().map_err(|_| StoreError::WorkerStopped)
    }

    // =========================================================================
    // Container lifecycle
    // =========================================================================

    pub fn create_new(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.request(|response_tx| Command::CreateNew { path, response_tx })?
    }

    pub fn open_existing(&self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        self.request(|response_tx| Command::OpenExisting { path, response_tx })?
    }

    pub fn close(&self) -> Result<()> {
        self.request(|response_tx| Command::Close { response_tx })?
    }

    pub fn is_open(&self) -> bool {
        self.request(|response_tx| Command::IsOpen { response_tx }).unwrap_or(false)
    }

    pub fn flush(&self) -> Result<()> {
        self.request(|response_tx| Command::Flush { response_tx })?
    }

    // =========================================================================
    // Directory and arrays
    // =========================================================================

    pub fn node_type(&self, path: &str) -> NodeType {
        let path = path.to_string();
        self.request(|response_tx| Command::NodeType { path, response_tx })
            .unwrap_or(NodeType::Error)
    }

    pub fn list_children(&self, path: &str) -> Result<Vec<String>> {
        let path = path.to_string();
        self.request(|response_tx| Command::ListChildren { path, response_tx })?
    }

    pub fn ensure_group(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.request(|response_tx| Command::EnsureGroup { path, response_tx })?
    }

    pub fn remove_link(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.request(|response_tx| Command::RemoveLink { path, response_tx })?
    }

    pub fn create_array(&self, params: ArrayCreateParams) -> Result<()> {
        self.request(|response_tx| Command::CreateArray { params, response_tx })?
    }

    pub fn describe(&self, path: &str) -> Result<ArrayDescriptor> {
        let path = path.to_string();
        self.request(|response_tx| Command::Describe { path, response_tx })?
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn ensure_export_structure(
        &self,
        targets: Vec<ExportTarget>,
        samples: u64,
        sample_type: SampleType,
    ) -> Result<StructureReport> {
        self.request(|response_tx| Command::EnsureExportStructure { targets, samples, sample_type, response_tx })?
    }

    /// Serialize `rows` on the caller's thread and append them as one batch.
    pub fn append_traces<T: Sample, R: AsRef<[T]>>(
        &self,
        target: &ExportTarget,
        rows: &[R],
        timestamp: &str,
        settings: &str,
    ) -> Result<BatchSummary> {
        let cols = rows.first().map_or(0, |r| r.as_ref().len());
        if let Some(bad) = rows.iter().position(|r| r.as_ref().len() != cols) {
            return Err(StoreError::shape(
                &target.traces,
                format!("trace {} has {} samples, expected {}", bad, rows[bad].as_ref().len(), cols),
            ));
        }
        let mut data = Vec::with_capacity(rows.len() * cols * T::SAMPLE_TYPE.size());
        for row in rows {
            T::extend_le_bytes(row.as_ref(), &mut data);
        }

        let target = target.clone();
        let timestamp = timestamp.to_string();
        let settings = settings.to_string();
        self.request(|response_tx| Command::AppendTraceRows {
            target,
            sample_type: T::SAMPLE_TYPE,
            cols: cols as u64,
            data,
            timestamp,
            settings,
            response_tx,
        })?
    }

    pub fn append_raw_slice(
        &self,
        path: &str,
        payload: Vec<u8>,
        start_byte: u64,
        byte_count: u64,
        cols: u64,
        type_text: &str,
    ) -> Result<RawAppendSummary> {
        let path = path.to_string();
        let type_text = type_text.to_string();
        self.request(|response_tx| Command::AppendRawSlice {
            path,
            payload,
            start_byte,
            byte_count,
            cols,
            type_text,
            response_tx,
        })?
    }

    pub fn ensure_metadata_group(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.request(|response_tx| Command::EnsureMetadataGroup { path, response_tx })?
    }

    pub fn append_metadata_record(
        &self,
        group: &str,
        first_trace: u64,
        trace_count: u64,
        timestamp: &str,
        settings: &str,
    ) -> Result<u64> {
        let group = group.to_string();
        let timestamp = timestamp.to_string();
        let settings = settings.to_string();
        self.request(|response_tx| Command::AppendMetadataRecord {
            group,
            first_trace,
            trace_count,
            timestamp,
            settings,
            response_tx,
        })?
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn read_metadata_records(&self, group: &str) -> Result<Vec<MetadataRecord>> {
        let group = group.to_string();
        self.request(|response_tx| Command::ReadMetadataRecords { group, response_tx })?
    }

    pub fn read_linear(&self, path: &str, start: u64, count: u64) -> Result<ReadOutput> {
        let path = path.to_string();
        self.request(|response_tx| Command::ReadLinear { path, start, count, response_tx })?
    }

    pub fn read_rect(
        &self,
        path: &str,
        row_start: u64,
        row_count: u64,
        col_start: u64,
        col_count: u64,
    ) -> Result<ReadOutput> {
        let path = path.to_string();
        self.request(|response_tx| Command::ReadRect {
            path,
            row_start,
            row_count,
            col_start,
            col_count,
            response_tx,
        })?
    }

    /// Ask the worker to close its container and exit. Later calls fail
    /// with `WorkerStopped`.
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(Command::Shutdown);
    }
}

impl Drop for SessionWorker {
    fn drop(&mut self) {
        let _ = self.command_tx.send(Command::Shutdown);
        if let Some(handle) = self.worker_handle.take() {
            if handle.join().is_err() {
                warn!("Session worker panicked");
            }
        }
    }
}

/// Process commands until shutdown or until every sender is gone.
fn worker_loop(mut session: Session, command_rx: Receiver<Command>) {
    debug!("Session worker started");

    while let Ok(command) = command_rx.recv() {
        match command {
            Command::CreateNew { path, response_tx } => {
                let _ = response_tx.send(session.create_new(&path));
            }
            Command::OpenExisting { path, response_tx } => {
                let _ = response_tx.send(session.open_existing(&path));
            }
            Command::Close { response_tx } => {
                let _ = response_tx.send(session.close());
            }
            Command::IsOpen { response_tx } => {
                let _ = response_tx.send(session.is_open());
            }

            Command::NodeType { path, response_tx } => {
                let _ = response_tx.send(session.node_type(&path));
            }
            Command::ListChildren { path, response_tx } => {
                let _ = response_tx.send(session.list_children(&path));
            }
            Command::EnsureGroup { path, response_tx } => {
                let _ = response_tx.send(session.ensure_group(&path));
            }
            Command::RemoveLink { path, response_tx } => {
                let _ = response_tx.send(session.remove_link(&path));
            }

            Command::CreateArray { params, response_tx } => {
                let _ = response_tx.send(session.create_array(&params));
            }
            Command::Describe { path, response_tx } => {
                let _ = response_tx.send(session.describe(&path));
            }

            Command::EnsureExportStructure { targets, samples, sample_type, response_tx } => {
                let _ = response_tx.send(session.ensure_export_structure(&targets, samples, sample_type));
            }
            Command::AppendTraceRows { target, sample_type, cols, data, timestamp, settings, response_tx } => {
                let result = session.append_trace_rows(&target, sample_type, cols, &data, &timestamp, &settings);
                let _ = response_tx.send(result);
            }
            Command::AppendRawSlice { path, payload, start_byte, byte_count, cols, type_text, response_tx } => {
                let result = session.append_raw_slice(&path, &payload, start_byte, byte_count, cols, &type_text);
                let _ = response_tx.send(result);
            }

            Command::EnsureMetadataGroup { path, response_tx } => {
                let _ = response_tx.send(session.ensure_metadata_group(&path));
            }
            Command::AppendMetadataRecord { group, first_trace, trace_count, timestamp, settings, response_tx } => {
                let result = session.append_metadata_record(&group, first_trace, trace_count, &timestamp, &settings);
                let _ = response_tx.send(result);
            }
            Command::ReadMetadataRecords { group, response_tx } => {
                let _ = response_tx.send(session.read_metadata_records(&group));
            }

            Command::ReadLinear { path, start, count, response_tx } => {
                let _ = response_tx.send(session.read_linear(&path, start, count));
            }
            Command::ReadRect { path, row_start, row_count, col_start, col_count, response_tx } => {
                let _ = response_tx.send(session.read_rect(&path, row_start, row_count, col_start, col_count));
            }

            Command::Flush { response_tx } => {
                let _ = response_tx.send(session.flush());
            }
            Command::Shutdown => {
                info!("Session worker shutting down");
                if let Err(e) = session.close() {
                    warn!("Close on shutdown failed: {}", e);
                }
                break;
            }
        }
    }

    debug!("Session worker stopped");
}
