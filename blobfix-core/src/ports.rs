//! Port traits abstracting all I/O away from the pipeline.

use camino::{Utf8Path, Utf8PathBuf};

/// A symbolic link found in an extracted tree. The target is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobLink {
    pub path: String,
    pub target: Utf8PathBuf,
}

/// Source of extracted blobs.
///
/// Paths are relative to the extraction root, `/`-separated, in sorted order. Implementations
/// are shared across worker threads. `list` returns regular files only and never descends
/// through links; links are reported separately by `links`.
pub trait BlobSource: Sync {
    fn list(&self) -> anyhow::Result<Vec<String>>;
    fn read(&self, path: &str) -> anyhow::Result<Vec<u8>>;

    fn links(&self) -> anyhow::Result<Vec<BlobLink>> {
        Ok(Vec::new())
    }
}

/// File-system write operations.
pub trait WritePort: Sync {
    fn write_file(&self, path: &Utf8Path, contents: &[u8]) -> anyhow::Result<()>;
    fn create_dir_all(&self, path: &Utf8Path) -> anyhow::Result<()>;
    /// Create `path` as a link to `target`, replacing whatever is there.
    fn symlink(&self, path: &Utf8Path, target: &Utf8Path) -> anyhow::Result<()>;
}
