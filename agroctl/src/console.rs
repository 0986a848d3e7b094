//! Human-readable status lines
//!
//! Operators follow progress through these lines; structured diagnostics go
//! through `tracing` instead.

use colored::Colorize;

pub fn info(message: impl AsRef<str>) {
    println!("{} {}", "[INFO]".blue().bold(), message.as_ref());
}

pub fn success(message: impl AsRef<str>) {
    println!("{} {}", "[SUCCESS]".green().bold(), message.as_ref());
}

pub fn warning(message: impl AsRef<str>) {
    println!("{} {}", "[WARNING]".yellow().bold(), message.as_ref());
}

pub fn error(message: impl AsRef<str>) {
    eprintln!("{} {}", "[ERROR]".red().bold(), message.as_ref());
}

/// Print a captured block (workload logs, command output) indented under the
/// previous status line
pub fn block(title: &str, body: &str) {
    println!("{}", format!("--- {} ---", title).dimmed());
    for line in body.lines() {
        println!("    {}", line);
    }
    println!("{}", "---".dimmed());
}
