//! `csvload records` - print the most recent documents

use anyhow::Result;
use clap::Args;

use csvload_core::{RECENT_LIMIT, list_recent};
use csvload_store::SegmentStore;

use crate::config::Config;

#[derive(Args, Debug)]
pub struct RecordsArgs {
    /// Number of documents to show, newest first
    #[arg(short, long, default_value_t = RECENT_LIMIT)]
    pub limit: usize,
}

pub fn run(args: RecordsArgs, config: &Config) -> Result<()> {
    let store = SegmentStore::open_existing(&config.store.data_dir, config.document_limits())?;
    let docs = list_recent(&store, args.limit)?;
    println!("{}", serde_json::to_string_pretty(&docs)?);
    Ok(())
}
