//! Host-side staging of code files.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::Path;

/// Creates and removes staging directories and files on the host.
///
/// Implementations must allow concurrent calls on disjoint paths.
#[async_trait]
pub trait FileProvider: Send + Sync {
    async fn create_directory(&self, path: &Path) -> std::io::Result<()>;

    async fn create_file_with_content(&self, path: &Path, content: &str) -> std::io::Result<()>;

    /// Removes a directory tree. A missing directory is not an error.
    async fn delete_directory(&self, path: &Path) -> std::io::Result<()>;
}

/// [`FileProvider`] backed by the local filesystem.
#[derive(Debug, Default, Clone)]
pub struct LocalFileProvider;

impl LocalFileProvider {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileProvider for LocalFileProvider {
    async fn create_directory(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::create_dir_all(path).await
    }

    async fn create_file_with_content(&self, path: &Path, content: &str) -> std::io::Result<()> {
        tokio::fs::write(path, content).await
    }

    async fn delete_directory(&self, path: &Path) -> std::io::Result<()> {
        match tokio::fs::remove_dir_all(path).await {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stage_and_delete() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("abc").join("def");
        let files = LocalFileProvider::new();

        files.create_directory(&dir).await.unwrap();
        files
            .create_file_with_content(&dir.join("main.py"), "print('hi')")
            .await
            .unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.join("main.py")).unwrap(),
            "print('hi')"
        );

        files.delete_directory(&dir).await.unwrap();
        assert!(!dir.exists());

        // second delete is a no-op
        files.delete_directory(&dir).await.unwrap();
    }
}
