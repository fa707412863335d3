//! Small filesystem helpers

use std::path::Path;

use dora_domain::Result;

use crate::errors::InfraError;

/// Replace `path` with `bytes` via a sibling temp file and a rename
pub(crate) async fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(InfraError::from)?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, bytes).await.map_err(InfraError::from)?;
    tokio::fs::rename(&tmp, path).await.map_err(InfraError::from)?;
    Ok(())
}
