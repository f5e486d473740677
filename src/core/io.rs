use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

/// File access for everything a session persists.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn read(&self, path: &str) -> Result<Vec<u8>>;
    async fn write(&self, path: &str, content: &[u8]) -> Result<()>;
    async fn delete(&self, path: &str) -> Result<()>;
    async fn exists(&self, path: &str) -> Result<bool>;
    /// Direct children of a directory; empty when it does not exist.
    async fn list(&self, dir: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Default)]
pub struct NativeStorage;

impl NativeStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Storage for NativeStorage {
    async fn read(&self, path: &str) -> Result<Vec<u8>> {
        tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path))
    }

    async fn write(&self, path: &str, content: &[u8]) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path))
    }

    async fn delete(&self, path: &str) -> Result<()> {
        if tokio::fs::try_exists(path).await? {
            if Path::new(path).is_dir() {
                tokio::fs::remove_dir_all(path).await?;
            } else {
                tokio::fs::remove_file(path).await?;
            }
        }
        Ok(())
    }

    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(path).await?)
    }

    async fn list(&self, dir: &str) -> Result<Vec<String>> {
        let path = Path::new(dir);
        let mut entries = Vec::new();
        if path.is_dir() {
            let mut rd = tokio::fs::read_dir(path).await?;
            while let Some(entry) = rd.next_entry().await? {
                entries.push(entry.path().to_string_lossy().to_string());
            }
        }
        entries.sort();
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_parents_and_lists() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let nested = temp_dir.path().join("a/b/file.txt");
        let nested_str = nested.to_str().unwrap();

        storage.write(nested_str, b"hello").await?;
        assert!(storage.exists(nested_str).await?);
        assert_eq!(storage.read(nested_str).await?, b"hello");

        let listed = storage.list(temp_dir.path().join("a/b").to_str().unwrap()).await?;
        assert_eq!(listed, vec![nested_str.to_string()]);

        storage.delete(temp_dir.path().join("a").to_str().unwrap()).await?;
        assert!(!storage.exists(nested_str).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_list_missing_dir_is_empty() -> Result<()> {
        let temp_dir = tempfile::tempdir()?;
        let storage = NativeStorage::new();
        let missing = temp_dir.path().join("nope");
        assert!(storage.list(missing.to_str().unwrap()).await?.is_empty());
        Ok(())
    }
}
