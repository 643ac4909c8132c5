//! csvload core - streaming ingestion of delimited files into a document store
//!
//! Parser → Batcher → Sink, driven by a backpressure coordinator that keeps
//! at most one batch of records in memory regardless of input size.

pub mod api;
pub mod batch;
pub mod cancel;
pub mod logging;
pub mod parser;
pub mod pipeline;
pub mod progress;
pub mod record;
pub mod report;
pub mod sink;
pub mod store;
pub mod upload;

// Re-exports for convenience
pub use api::{RECENT_LIMIT, UploadResponse, UploadResult, handle_upload, list_recent};
pub use batch::{Batch, Batcher, DEFAULT_BATCH_SIZE};
pub use cancel::CancelToken;
pub use logging::{IndicatifLogger, init_logging};
pub use parser::{ByteCounter, ParseError, ParserOptions, RecordParser};
pub use pipeline::{Pipeline, PipelineConfig, PipelineState, StrictPolicy};
pub use progress::{ProgressContext, fmt_num};
pub use record::{Header, RawRecord};
pub use report::{ErrorDescriptor, ErrorKind, IngestionReport};
pub use sink::{BatchWriteError, BatchWriteOutcome, RecordFailure, SinkWriter};
pub use store::{
    DEFAULT_MAX_DOCUMENT_BYTES, Document, DocumentLimits, DocumentStore, InsertOutcome,
    MemoryStore, Rejection, StoreError, WriteMode,
};
pub use upload::{
    DEFAULT_MAX_UPLOAD_BYTES, DEFAULT_TEMP_DIR, StagedUpload, UploadConfig, UploadError,
    stage_file, stage_upload,
};
