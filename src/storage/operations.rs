//! Storage operations
//!
//! Listing formatting and unique-name generation shared by the local adapter.

use chrono::{DateTime, Utc};
use std::fs::Metadata;

use crate::storage::permissions::mode_string;

/// One `ls -l` style line for LIST
pub fn format_list_line(name: &str, metadata: &Metadata) -> String {
    let kind = if metadata.is_dir() { 'd' } else { '-' };
    let size = if metadata.is_dir() { 0 } else { metadata.len() };
    let modified: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or_default();
    format!(
        "{kind}{} 1 ftp ftp {size:>12} {} {name}",
        mode_string(metadata),
        modified.format("%b %d %H:%M"),
    )
}

/// Candidate name for the `attempt`-th STOU try
pub fn unique_name(hint: Option<&str>, attempt: u32) -> String {
    let stem = hint
        .map(|h| h.trim_matches('/'))
        .filter(|h| !h.is_empty() && !h.contains('/'))
        .unwrap_or("stou");
    if attempt == 0 {
        stem.to_string()
    } else {
        format!("{stem}.{attempt}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_line_shape() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.csv");
        std::fs::write(&path, b"12345").unwrap();
        let line = format_list_line("report.csv", &std::fs::metadata(&path).unwrap());
        assert!(line.starts_with('-'));
        assert!(line.ends_with(" report.csv"));
        assert!(line.contains(" 5 "));

        let dir_line = format_list_line("sub", &std::fs::metadata(dir.path()).unwrap());
        assert!(dir_line.starts_with('d'));
    }

    #[test]
    fn unique_names() {
        assert_eq!(unique_name(None, 0), "stou");
        assert_eq!(unique_name(Some("data.bin"), 2), "data.bin.2");
        assert_eq!(unique_name(Some("../x/y"), 1), "stou.1");
    }
}
