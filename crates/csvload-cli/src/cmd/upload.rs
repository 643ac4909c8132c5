//! `csvload upload` - stage a file and ingest it

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Args;

use csvload_core::{
    CancelToken, DocumentStore, MemoryStore, Pipeline, ProgressContext, UploadResult,
    handle_upload,
};
use csvload_store::SegmentStore;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// CSV file to ingest (plain or gzip)
    pub file: Option<PathBuf>,

    /// Leave the staged copy in the temp directory
    #[arg(long)]
    pub keep_temp: bool,

    /// Parse and validate into an in-memory store; nothing is persisted
    #[arg(long)]
    pub dry_run: bool,
}

pub fn run(args: UploadArgs, config: &Config, progress: &ProgressContext) -> Result<ExitCode> {
    let cancel = CancelToken::new();
    setup_signal_handler(&cancel)?;

    let result = if args.dry_run {
        let store = MemoryStore::new(config.document_limits());
        ingest(&store, &args, config, progress, &cancel)?
    } else {
        let store = SegmentStore::open(&config.store.data_dir, config.document_limits())?;
        ingest(&store, &args, config, progress, &cancel)?
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    if result.response.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn ingest<S: DocumentStore>(
    store: &S,
    args: &UploadArgs,
    config: &Config,
    progress: &ProgressContext,
    cancel: &CancelToken,
) -> Result<UploadResult> {
    let mut upload = config.upload_config();
    upload.keep_temp |= args.keep_temp;

    let label = args
        .file
        .as_deref()
        .and_then(Path::file_name)
        .map_or_else(|| "upload".to_string(), |n| n.to_string_lossy().into_owned());
    let pipeline = Pipeline::new(store, config.pipeline_config()?)
        .with_cancel(cancel.clone())
        .with_progress(progress.file_bar(&label));

    Ok(handle_upload(
        args.file.as_deref(),
        &upload,
        pipeline,
        config.parser_options()?,
    ))
}

fn setup_signal_handler(cancel: &CancelToken) -> Result<()> {
    // First signal: stop after the batch being written
    // Second signal: force exit
    for signal in [signal_hook::consts::SIGINT, signal_hook::consts::SIGTERM] {
        let cancel = cancel.clone();
        // SAFETY: AtomicBool::swap and process::exit are async-signal-safe
        let registered = unsafe {
            signal_hook::low_level::register(signal, move || {
                if cancel.cancel() {
                    std::process::exit(130);
                }
            })
        };
        registered.with_context(|| format!("failed to register handler for signal {signal}"))?;
    }
    Ok(())
}
