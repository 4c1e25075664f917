use std::path::PathBuf;

use anyhow::{Context, Result};

use super::archive;
use super::{ImageInfo, Inspector};

/// Reads layers from a pre-existing tar archive (`docker save`, `podman save`,
/// or any OCI-layout tar).
pub struct DockerArchiveInspector {
    archive_path: PathBuf,
}

impl DockerArchiveInspector {
    pub fn new(archive_path: PathBuf) -> Self {
        Self { archive_path }
    }
}

impl Inspector for DockerArchiveInspector {
    fn inspect(&mut self, _image: &str) -> Result<ImageInfo> {
        let filename = self
            .archive_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let stem = filename
            .trim_end_matches(".gz")
            .trim_end_matches(".tgz")
            .trim_end_matches(".tar")
            .to_string();

        archive::open_archive(&self.archive_path, "", "", &stem)
            .with_context(|| format!("Failed to parse archive {}", self.archive_path.display()))
    }
}
