//! Single-file chunked container storage

pub mod backend;
pub mod catalog;
pub mod chunk_cache;
pub mod container;
pub mod hyperslab;
pub mod superblock;

pub use backend::{Backend, FileBackend, MemoryBackend};
pub use catalog::{ArrayEntry, ArrayId, Catalog, Extent, Node};
pub use container::Container;
pub use hyperslab::Hyperslab;
pub use superblock::{has_signature, MAGIC, SUPERBLOCK_SIZE};
