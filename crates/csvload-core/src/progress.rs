//! Terminal progress for ingestion runs.
//!
//! A file bar starts as a spinner status line and becomes a bytes bar once
//! the input size is known. Outside a TTY every bar is hidden and the
//! pipeline's log lines carry progress instead.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Width of the file-name column
const PREFIX_WIDTH: usize = 20;

const SPINNER_TICK: Duration = Duration::from_millis(120);

const STATUS_TEMPLATE: &str = "{spinner:.green} {prefix:<20.dim} {wide_msg:.dim}";
const BYTES_TEMPLATE: &str = "  {prefix:<20.dim} {bar:30.green/dim} \
    {binary_bytes:>7}/{binary_total_bytes:7} {binary_bytes_per_sec:>11} {wide_msg:.dim}";

fn style(template: &str) -> ProgressStyle {
    // Templates are constants; fall back to indicatif's default on a typo
    ProgressStyle::with_template(template).unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Switch a status line to a bytes bar of `total` length.
///
/// An empty input keeps the status line; a zero-length bar renders as full.
pub fn upgrade_to_bar(pb: &ProgressBar, total: u64) {
    if total == 0 {
        return;
    }
    pb.disable_steady_tick();
    pb.set_length(total);
    pb.set_style(style(BYTES_TEMPLATE).progress_chars("--"));
}

/// Owns the `MultiProgress` that bars and log lines are drawn through.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty: std::io::stderr().is_terminal(),
        }
    }

    /// Status line for one input file; hidden outside a TTY.
    pub fn file_bar(&self, name: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(0));
        pb.set_style(style(STATUS_TEMPLATE));
        pb.set_prefix(column(name));
        pb.set_message("staging");
        pb.enable_steady_tick(SPINNER_TICK);
        pb
    }

    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Log lines go through this so they don't tear live bars
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Fit `name` into the prefix column, marking truncation with `~`
fn column(name: &str) -> String {
    if name.chars().count() <= PREFIX_WIDTH {
        return name.to_string();
    }
    let mut short: String = name.chars().take(PREFIX_WIDTH - 1).collect();
    short.push('~');
    short
}

/// Decimal count with `,` thousands separators
pub fn fmt_num(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
