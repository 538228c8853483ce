use crate::endpoint::EndpointAddr;
use crate::error::Result;
use std::path::{Path, PathBuf};

/// One-line on-disk record of the last promoted master.
///
/// Consulted at startup so a restarted coordinator adopts the master it
/// promoted before dying instead of trusting a possibly stale pool.
pub struct MasterFile {
    path: PathBuf,
}

impl MasterFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The recorded master, or `None` if the file is absent or empty.
    pub async fn read(&self) -> Result<Option<EndpointAddr>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let line = content.trim();
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(line.parse()?))
    }

    /// Record `master`, atomically: write a sibling temp file, then rename
    /// over the target so readers never observe a partial line.
    pub async fn write(&self, master: &EndpointAddr) -> Result<()> {
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, format!("{}\n", master)).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        tracing::info!(master = %master, path = %self.path.display(), "Master file updated");
        Ok(())
    }
}
