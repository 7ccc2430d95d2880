// ABOUTME: Shared utility functions for Taskbox
// ABOUTME: Atomic JSON persistence used by the task store and the status tracker

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::Path;

/// Serialize `value` as pretty JSON and replace `path` atomically (temp file + rename)
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let content = serde_json::to_string_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "record".to_string());
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&tmp_path, content)?;
    fs::rename(&tmp_path, path)
}

/// Read and deserialize a JSON file
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, crate::CoreError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        count: u32,
    }

    #[test]
    fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("record.json");
        let record = Record {
            name: "demo".to_string(),
            count: 3,
        };

        write_json_atomic(&path, &record).unwrap();
        let loaded: Record = read_json(&path).unwrap();

        assert_eq!(loaded, record);
        assert!(!temp.path().join("nested").join(".record.json.tmp").exists());
    }

    #[test]
    fn test_read_missing_file_is_io_error() {
        let temp = TempDir::new().unwrap();
        let result: Result<Record, _> = read_json(&temp.path().join("missing.json"));
        assert!(matches!(result, Err(crate::CoreError::Io(_))));
    }
}
