//! Debounced photo ingestion

pub mod buffer;

pub use buffer::{BufferSettings, FlushHandler, FlushedBatch, IngestError, PhotoIngestBuffer};
