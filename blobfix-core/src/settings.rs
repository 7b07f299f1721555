//! Clap-free settings for the fixup pipeline.

use camino::Utf8PathBuf;

/// Settings for `run_fixups`.
#[derive(Debug, Clone)]
pub struct FixupSettings {
    /// Extraction root the blobs are read from.
    pub src_root: Utf8PathBuf,

    /// Where fixed (and passed-through) blobs are written. `None` rewrites `src_root` in place.
    pub out_root: Option<Utf8PathBuf>,

    /// Worker threads; `None` lets rayon pick.
    pub jobs: Option<usize>,

    pub dry_run: bool,

    /// Report failed files as a pipeline error once the run completes.
    pub fail_fast: bool,
}

impl FixupSettings {
    pub fn new(src_root: impl Into<Utf8PathBuf>) -> Self {
        Self {
            src_root: src_root.into(),
            out_root: None,
            jobs: None,
            dry_run: false,
            fail_fast: false,
        }
    }

    pub fn effective_out_root(&self) -> &Utf8PathBuf {
        self.out_root.as_ref().unwrap_or(&self.src_root)
    }
}

impl Default for FixupSettings {
    fn default() -> Self {
        Self::new(".")
    }
}
