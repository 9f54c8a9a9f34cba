use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use crate::domain::ConfigurationError;

/// Read every `*.toml` file of a descriptor directory, sorted by file name.
///
/// A missing directory yields nothing. Unreadable files come back as
/// `InvalidDescriptor` so the caller can exclude them individually.
pub fn read_dir(dir: &Path) -> Vec<(String, Result<String, ConfigurationError>)> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = ?dir, error = %e, "Descriptor directory not readable, skipping");
            return Vec::new();
        }
    };

    let mut paths: Vec<_> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().map(|ext| ext == "toml").unwrap_or(false))
        .collect();
    paths.sort();

    debug!(dir = ?dir, count = paths.len(), "Reading descriptors");

    paths
        .into_iter()
        .map(|path| {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let content =
                fs::read_to_string(&path).map_err(|e| ConfigurationError::InvalidDescriptor {
                    source_name: name.clone(),
                    reason: e.to_string(),
                });
            (name, content)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_reads_toml_files_in_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("b.toml"), "id = \"b\"").unwrap();
        fs::write(dir.path().join("a.toml"), "id = \"a\"").unwrap();
        fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let files = read_dir(dir.path());
        let names: Vec<_> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a.toml", "b.toml"]);
        assert!(files[0].1.is_ok());
    }

    #[test]
    fn test_missing_dir_is_empty() {
        let dir = TempDir::new().unwrap();
        assert!(read_dir(&dir.path().join("absent")).is_empty());
    }
}
