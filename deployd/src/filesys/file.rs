//! File operations

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::errors::DeployError;

/// A file wrapper with path
#[derive(Debug, Clone)]
pub struct File {
    path: PathBuf,
}

impl File {
    /// Create a new file reference
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Read file contents as string
    pub async fn read_string(&self) -> Result<String, DeployError> {
        Ok(fs::read_to_string(&self.path).await?)
    }

    /// Read file as JSON
    pub async fn read_json<T: DeserializeOwned>(&self) -> Result<T, DeployError> {
        let contents = self.read_string().await?;
        let value = serde_json::from_str(&contents)?;
        Ok(value)
    }

    /// Write JSON to file, replacing it atomically
    pub async fn write_json<T: Serialize>(&self, value: &T) -> Result<(), DeployError> {
        let contents = serde_json::to_vec_pretty(value)?;
        self.write_atomic(&contents).await
    }

    /// Append one JSON document as a line
    pub async fn append_json_line<T: Serialize>(&self, value: &T) -> Result<(), DeployError> {
        self.ensure_parent().await?;

        let mut line = serde_json::to_vec(value)?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.sync_data().await?;
        Ok(())
    }

    /// Read every JSON line; a missing file reads as empty
    pub async fn read_json_lines<T: DeserializeOwned>(&self) -> Result<Vec<T>, DeployError> {
        if !self.exists().await {
            return Ok(Vec::new());
        }
        let contents = self.read_string().await?;
        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).map_err(DeployError::from))
            .collect()
    }

    /// Delete the file
    pub async fn delete(&self) -> Result<(), DeployError> {
        match fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomic write using a temporary file in the same directory
    pub async fn write_atomic(&self, contents: &[u8]) -> Result<(), DeployError> {
        self.ensure_parent().await?;

        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| DeployError::StorageError(format!("invalid file path: {:?}", self.path)))?;
        let temp_path = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(contents).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&temp_path, &self.path).await?;
        Ok(())
    }

    async fn ensure_parent(&self) -> Result<(), DeployError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        id: u32,
        name: String,
    }

    #[tokio::test]
    async fn test_write_and_read_json() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::new(dir.path().join("nested").join("record.json"));

        let record = Record { id: 1, name: "demo".to_string() };
        file.write_json(&record).await.unwrap();

        assert!(file.exists().await);
        assert_eq!(file.read_json::<Record>().await.unwrap(), record);
    }

    #[tokio::test]
    async fn test_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::new(dir.path().join("records.jsonl"));

        assert!(file.read_json_lines::<Record>().await.unwrap().is_empty());

        file.append_json_line(&Record { id: 1, name: "a".to_string() }).await.unwrap();
        file.append_json_line(&Record { id: 2, name: "b".to_string() }).await.unwrap();

        let records = file.read_json_lines::<Record>().await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].name, "b");
    }

    #[tokio::test]
    async fn test_delete_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = File::new(dir.path().join("missing.json"));
        file.delete().await.unwrap();
    }
}
