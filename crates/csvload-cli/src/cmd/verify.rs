//! `csvload verify` - re-read every segment in the store

use std::process::ExitCode;

use anyhow::Result;
use comfy_table::{Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL};

use csvload_core::fmt_num;
use csvload_store::SegmentStore;

use crate::config::Config;

pub fn run(config: &Config) -> Result<ExitCode> {
    let store = SegmentStore::open_existing(&config.store.data_dir, config.document_limits())?;
    let checks = store.verify()?;

    if checks.is_empty() {
        eprintln!("No segments in {}.", store.base().display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Segment").fg(Color::Cyan),
            Cell::new("Documents").fg(Color::Cyan),
            Cell::new("Status").fg(Color::Cyan),
        ]);

    let mut bad = 0;
    let mut documents = 0;
    for check in &checks {
        documents += check.documents;
        let status = match &check.error {
            None => Cell::new("OK").fg(Color::Green),
            Some(e) => {
                bad += 1;
                Cell::new(e).fg(Color::Red)
            }
        };
        table.add_row(vec![
            Cell::new(&check.name),
            Cell::new(fmt_num(check.documents as u64)),
            status,
        ]);
    }

    eprintln!("\n{table}");
    eprintln!(
        "{} segments, {} documents, {bad} corrupt",
        checks.len(),
        fmt_num(documents as u64)
    );

    if bad > 0 {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
