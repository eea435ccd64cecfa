//! Screenshot evidence capture

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use crate::browser::BrowserSession;
use crate::error::{RunnerError, RunnerResult};

/// Durable destination for captured evidence
#[async_trait]
pub trait EvidenceSink: Send + Sync {
    /// Store `bytes` under `name` and return the reference recorded in the step result.
    async fn write(&self, name: &str, bytes: &[u8]) -> RunnerResult<String>;
}

/// File name for the evidence of step `index` (zero based) in `run_id`
pub fn evidence_name(run_id: &str, index: usize) -> String {
    format!("step{}-{}.png", index + 1, run_id)
}

/// File name for a screenshot taken after step `index` failed
pub fn failure_evidence_name(run_id: &str, index: usize) -> String {
    format!("step{}-{}-failure.png", index + 1, run_id)
}

/// Take a screenshot and hand it to the sink
pub async fn capture(
    session: &mut dyn BrowserSession,
    sink: &dyn EvidenceSink,
    name: &str,
) -> RunnerResult<String> {
    let png = session.screenshot().await?;
    sink.write(name, &png).await
}

/// Writes evidence files into a single directory
#[derive(Debug, Clone)]
pub struct FsEvidenceSink {
    root: PathBuf,
}

impl FsEvidenceSink {
    pub async fn new(root: impl AsRef<Path>) -> RunnerResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

#[async_trait]
impl EvidenceSink for FsEvidenceSink {
    async fn write(&self, name: &str, bytes: &[u8]) -> RunnerResult<String> {
        if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(RunnerError::Evidence(format!("invalid evidence name '{}'", name)));
        }

        let path = self.path_of(name);
        fs::write(&path, bytes).await?;

        let digest = hex::encode(Sha256::digest(bytes));
        debug!("Stored evidence {} ({} bytes, sha256 {})", name, bytes.len(), digest);

        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_evidence_names() {
        assert_eq!(evidence_name("test-1700000000000", 0), "step1-test-1700000000000.png");
        assert_eq!(evidence_name("test-1", 2), "step3-test-1.png");
        assert_eq!(failure_evidence_name("test-1", 2), "step3-test-1-failure.png");
    }

    #[tokio::test]
    async fn test_write_stores_file_and_returns_name() {
        let tmp = TempDir::new().unwrap();
        let sink = FsEvidenceSink::new(tmp.path().join("evidence")).await.unwrap();

        let reference = sink.write("step1-test-1.png", b"\x89PNG fake").await.unwrap();

        assert_eq!(reference, "step1-test-1.png");
        let stored = std::fs::read(sink.path_of(&reference)).unwrap();
        assert_eq!(stored, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn test_write_rejects_path_traversal() {
        let tmp = TempDir::new().unwrap();
        let sink = FsEvidenceSink::new(tmp.path()).await.unwrap();

        for name in ["../escape.png", "a/b.png", "", ".hidden"] {
            assert!(sink.write(name, b"x").await.is_err(), "{name} should be rejected");
        }
    }
}
