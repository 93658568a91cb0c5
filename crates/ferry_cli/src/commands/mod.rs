//! CLI command implementations.

pub mod checkpoint;
pub mod estimate;
pub mod migrate;
pub mod mode;
pub mod outbox;

use ferry_storage::{FileStore, StoreConfig};
use std::path::Path;

/// Opens an existing store directory.
pub(crate) fn open_existing(path: &Path) -> Result<FileStore, Box<dyn std::error::Error>> {
    if !path.is_dir() {
        return Err(format!("No store found at {}", path.display()).into());
    }
    Ok(FileStore::open(path, StoreConfig::new().create_if_missing(false))?)
}

pub(crate) fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

pub(crate) fn format_timestamp(ms: Option<u64>) -> String {
    match ms {
        Some(ms) => format!("{} seconds since epoch", ms / 1000),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn sizes_are_humanized() {
        assert_eq!(format_size(12), "12 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn missing_store_is_an_error() {
        let dir = tempdir().unwrap();
        assert!(open_existing(&dir.path().join("absent")).is_err());
        assert!(open_existing(dir.path()).is_ok());
    }
}
