//! csvload-store: durable document store for ingested records
//!
//! Each `insert_many` call becomes one append-only JSON-lines segment,
//! committed with a tmp-then-rename so readers never see a partial batch.

pub mod manifest;
pub mod store;

pub use manifest::{CURRENT_FORMAT_VERSION, StoreManifest};
pub use store::{SegmentCheck, SegmentStore};
