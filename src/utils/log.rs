// src/utils/log.rs

//! Formatting helpers for run reports.
//!
//! Everything goes through the `log` facade, so the CLI's logger decides
//! where and whether it is printed.

use ::log::{Level, log_enabled};

const WIDTH: usize = 60;

/// Log a step in a process
pub fn step(step_num: usize, total: usize, message: &str) {
    ::log::info!("[STEP {}/{}] {}", step_num, total, message);
}

/// Log a header
pub fn header(title: &str) {
    if log_enabled!(Level::Info) {
        let border = "═".repeat(WIDTH);
        ::log::info!("{}", border);
        ::log::info!("  {}", title);
        ::log::info!("{}", border);
    }
}

/// Log a sub-item (indented)
pub fn sub_item(message: &str) {
    ::log::info!("    {}", message);
}

/// Log a summary section
pub fn summary(title: &str, items: &[(&str, String)]) {
    if !log_enabled!(Level::Info) {
        return;
    }

    ::log::info!("[SUMMARY] {}", title);
    let width = items.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
    for line in summary_lines(items, width) {
        ::log::info!("{}", line);
    }
}

fn summary_lines(items: &[(&str, String)], width: usize) -> Vec<String> {
    items
        .iter()
        .map(|(key, value)| format!("    {:<width$}  {}", format!("{key}:"), value, width = width + 1))
        .collect()
}
