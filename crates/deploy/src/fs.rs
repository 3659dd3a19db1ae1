//! File system utils.

use std::path::Path;

use anyhow::Context;

pub struct FsHandler;

impl FsHandler {
    /// Create a host directory (and its parents) if it doesn't exist.
    pub fn create_host_config_directory(host_config_path: &Path) -> anyhow::Result<()> {
        if host_config_path.exists() {
            return Ok(());
        }

        std::fs::create_dir_all(host_config_path)
            .context("Failed to create host config directory")?;
        tracing::debug!(
            "Created host config directory: {}",
            host_config_path.display()
        );

        Ok(())
    }

    /// Replace the file at `path` with `content`.
    ///
    /// The content is written to a sibling temporary file first and then renamed
    /// over the target, so readers never observe a half-written file. Any prior
    /// content is discarded.
    pub fn replace_file(path: &Path, content: &str) -> anyhow::Result<()> {
        let parent = path
            .parent()
            .context("File path must have a parent directory")?;
        Self::create_host_config_directory(parent)?;

        let file_name = path
            .file_name()
            .context("File path must have a file name")?
            .to_string_lossy();
        let tmp_path = parent.join(format!(".{file_name}.tmp"));

        std::fs::write(&tmp_path, content)
            .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to move temporary file into {}", path.display()))?;

        tracing::trace!(path = %path.display(), bytes = content.len(), "File replaced");

        Ok(())
    }
}
