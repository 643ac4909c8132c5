//! csvload - streaming CSV ingestion into a document store
//!
//! Parses delimited files in bounded batches and persists each row as a
//! document, keeping at most one batch in memory regardless of file size.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use csvload_core::StrictPolicy;

mod cmd;
mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "csvload")]
#[command(about = "Streaming CSV ingestion into a document store")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    /// Config file path (default: ./csvload.toml or ~/.config/csvload/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Records per batch
    #[arg(long, global = true)]
    batch_size: Option<usize>,

    /// Write mode policy: all-but-final, always, never
    #[arg(long, global = true)]
    strict: Option<StrictPolicy>,

    /// Store data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Staging directory for uploads
    #[arg(long, global = true)]
    temp_dir: Option<PathBuf>,

    /// Upload size limit in bytes
    #[arg(long, global = true)]
    max_upload_bytes: Option<u64>,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a CSV file (plain or gzip) into the store
    Upload(cmd::upload::UploadArgs),
    /// Print the most recently inserted documents as JSON
    Records(cmd::records::RecordsArgs),
    /// Check every store segment for corruption
    Verify,
    /// Show current configuration
    Config,
}

impl Cli {
    /// Command-line flags win over the config file
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(n) = self.batch_size {
            config.ingest.batch_size = n;
        }
        if let Some(strict) = self.strict {
            config.ingest.strict = strict;
        }
        if let Some(dir) = &self.data_dir {
            config.store.data_dir = dir.clone();
        }
        if let Some(dir) = &self.temp_dir {
            config.upload.temp_dir = dir.clone();
        }
        if let Some(n) = self.max_upload_bytes {
            config.upload.max_bytes = n;
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = csvload_core::ProgressContext::new();

    // Logging:
    //   TTY:     quiet (warn) unless --debug; the progress bar shows activity
    //   non-TTY: info unless --debug; logs are the only progress indicator
    let is_tty = progress.is_tty();
    let multi = if is_tty { Some(progress.multi()) } else { None };
    let quiet = if is_tty { !cli.debug } else { false };
    csvload_core::init_logging(quiet, cli.debug, multi);

    let mut config = if let Some(path) = &cli.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };
    cli.apply_overrides(&mut config);
    config.validate()?;

    match cli.command {
        Command::Upload(args) => cmd::upload::run(args, &config, &progress),
        Command::Records(args) => cmd::records::run(args, &config).map(|()| ExitCode::SUCCESS),
        Command::Verify => cmd::verify::run(&config),
        Command::Config => {
            use comfy_table::{
                Cell, Color, Table, modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL,
            };

            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .apply_modifier(UTF8_ROUND_CORNERS)
                .set_header(vec![
                    Cell::new("Setting").fg(Color::Cyan),
                    Cell::new("Value").fg(Color::Cyan),
                ]);

            table.add_row(vec!["Batch size", &config.ingest.batch_size.to_string()]);
            table.add_row(vec!["Strict policy", &config.ingest.strict.to_string()]);
            table.add_row(vec!["Delimiter", &format!("{:?}", config.ingest.delimiter)]);
            table.add_row(vec!["Trim fields", &config.ingest.trim.to_string()]);
            table.add_row(vec![
                "Max upload",
                &format!(
                    "{} bytes ({}MB)",
                    config.upload.max_bytes,
                    config.upload.max_bytes / (1024 * 1024)
                ),
            ]);
            table.add_row(vec![
                "Temp directory",
                &config.upload.temp_dir.display().to_string(),
            ]);
            table.add_row(vec!["Keep temp files", &config.upload.keep_temp.to_string()]);
            table.add_row(vec![
                "Data directory",
                &config.store.data_dir.display().to_string(),
            ]);
            table.add_row(vec![
                "Max document",
                &format!("{} bytes", config.store.max_document_bytes),
            ]);

            eprintln!("\n{table}");
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "csvload",
            "--batch-size",
            "50",
            "--strict",
            "always",
            "--data-dir",
            "/srv/data",
            "upload",
            "rows.csv",
        ])
        .unwrap();
        let mut config = Config::default();
        cli.apply_overrides(&mut config);
        assert_eq!(config.ingest.batch_size, 50);
        assert_eq!(config.ingest.strict, StrictPolicy::Always);
        assert_eq!(config.store.data_dir, PathBuf::from("/srv/data"));
        assert_eq!(config.upload.temp_dir, PathBuf::from("./_temp"));
    }

    #[test]
    fn bad_strict_flag_rejected() {
        assert!(Cli::try_parse_from(["csvload", "--strict", "maybe", "verify"]).is_err());
    }
}
