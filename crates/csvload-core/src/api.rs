//! Upload and list operations, mapped to status/message responses

use std::path::Path;

use serde::Serialize;

use crate::parser::ParserOptions;
use crate::pipeline::Pipeline;
use crate::report::{ErrorKind, IngestionReport};
use crate::store::{Document, DocumentStore, StoreError};
use crate::upload::{UploadConfig, UploadError, stage_file};

/// Documents returned by [`list_recent`] by default
pub const RECENT_LIMIT: usize = 10;

/// Status/message pair for one terminal outcome.
///
/// `error` carries internal detail for diagnosis; its wording is not stable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UploadResponse {
    pub status: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UploadResponse {
    pub fn ok() -> Self {
        Self {
            status: 200,
            message: "File uploaded successfully".to_string(),
            error: None,
        }
    }

    pub fn rejected(err: &UploadError) -> Self {
        if err.is_rejection() {
            Self {
                status: 400,
                message: err.to_string(),
                error: None,
            }
        } else {
            Self {
                status: 500,
                message: "Error processing the file".to_string(),
                error: Some(err.to_string()),
            }
        }
    }

    pub fn from_report(report: &IngestionReport) -> Self {
        if report.is_success() {
            return Self::ok();
        }
        let Some(fatal) = report.fatal_error() else {
            return Self {
                status: 500,
                message: "Error processing the file".to_string(),
                error: Some(format!("pipeline ended in {}", report.state)),
            };
        };
        let message = match fatal.kind {
            ErrorKind::Source | ErrorKind::Parse => "Error reading CSV file",
            ErrorKind::BatchWrite => "Error inserting batch into the store",
            ErrorKind::Cancelled | ErrorKind::PartialRecord => "Error processing the file",
        };
        Self {
            status: 500,
            message: message.to_string(),
            error: Some(fatal.message.clone()),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Response plus the report, when the pipeline ran
#[derive(Debug, Clone, Serialize)]
pub struct UploadResult {
    #[serde(flatten)]
    pub response: UploadResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<IngestionReport>,
}

/// Stage `file`, ingest the staged copy, and map the outcome to a response.
///
/// `None` stands for a request without a file. The staged copy is removed
/// (unless configured to be kept) before this returns.
pub fn handle_upload<S: DocumentStore + ?Sized>(
    file: Option<&Path>,
    upload: &UploadConfig,
    pipeline: Pipeline<'_, S>,
    options: ParserOptions,
) -> UploadResult {
    let staged = match file.ok_or(UploadError::Missing).and_then(|p| stage_file(p, upload)) {
        Ok(staged) => staged,
        Err(e) => {
            log::warn!("upload rejected: {e}");
            return UploadResult {
                response: UploadResponse::rejected(&e),
                report: None,
            };
        }
    };

    log::info!(
        "{}: {} bytes staged, ingesting",
        staged.original_name(),
        staged.size()
    );
    let report = pipeline
        .with_label(staged.original_name())
        .ingest_file(staged.path(), options);
    UploadResult {
        response: UploadResponse::from_report(&report),
        report: Some(report),
    }
}

/// Most recently inserted documents, newest first. Read-only.
pub fn list_recent<S: DocumentStore + ?Sized>(
    store: &S,
    limit: usize,
) -> Result<Vec<Document>, StoreError> {
    store.recent(limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineState;
    use crate::report::ErrorDescriptor;
    use std::time::Duration;

    fn failed_with(kind: ErrorKind) -> IngestionReport {
        let mut report = IngestionReport::default();
        report.record_error(ErrorDescriptor {
            kind,
            message: "detail".into(),
            row: None,
            batch: None,
        });
        report.finalize(PipelineState::Failed, Duration::ZERO);
        report
    }

    #[test]
    fn done_maps_to_200() {
        let mut report = IngestionReport::default();
        report.finalize(PipelineState::Done, Duration::ZERO);
        let resp = UploadResponse::from_report(&report);
        assert_eq!(resp.status, 200);
        assert!(resp.error.is_none());
    }

    #[test]
    fn fatal_errors_map_to_500() {
        let parse = UploadResponse::from_report(&failed_with(ErrorKind::Parse));
        assert_eq!(parse.status, 500);
        assert_eq!(parse.message, "Error reading CSV file");
        assert_eq!(parse.error.as_deref(), Some("detail"));

        let write = UploadResponse::from_report(&failed_with(ErrorKind::BatchWrite));
        assert_eq!(write.message, "Error inserting batch into the store");

        let cancelled = UploadResponse::from_report(&failed_with(ErrorKind::Cancelled));
        assert_eq!(cancelled.status, 500);
    }

    #[test]
    fn rejections_map_to_400() {
        let resp = UploadResponse::rejected(&UploadError::Missing);
        assert_eq!(resp.status, 400);
        assert_eq!(resp.message, "No file was uploaded");
        assert!(!resp.is_success());

        let io = UploadResponse::rejected(&UploadError::Io(std::io::Error::other("disk")));
        assert_eq!(io.status, 500);
    }

    #[test]
    fn result_json_is_flat() {
        let result = UploadResult {
            response: UploadResponse::ok(),
            report: None,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], 200);
        assert!(json.get("report").is_none());
    }
}
