//! `patchelf` backend. Handles edits that need `.dynstr` or the dynamic section to grow.

use super::{ElfNeededEditor, NeededEditor};
use crate::error::{FixupErrorKind, OpResult};
use fs_err as fs;
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

const TOOL: &str = "patchelf";

#[derive(Debug, Clone)]
pub struct PatchelfEditor {
    program: PathBuf,
}

impl PatchelfEditor {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn locate() -> Option<Self> {
        which::which(TOOL).ok().map(Self::new)
    }

    fn run(&self, bytes: Vec<u8>, args: &[&str]) -> OpResult<Vec<u8>> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("blob");
        fs::write(&file, &bytes)?;

        debug!(program = %self.program.display(), ?args, "running patchelf");
        let output = Command::new(&self.program)
            .args(args)
            .arg(&file)
            .output()
            .map_err(|e| FixupErrorKind::tool(TOOL, e.to_string()))?;
        if !output.status.success() {
            return Err(FixupErrorKind::tool(
                TOOL,
                format!(
                    "exit {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            ));
        }

        Ok(fs::read(&file)?)
    }
}

impl NeededEditor for PatchelfEditor {
    fn name(&self) -> &'static str {
        TOOL
    }

    fn needed(&self, bytes: &[u8]) -> OpResult<Vec<String>> {
        ElfNeededEditor.needed(bytes)
    }

    fn add(&self, bytes: Vec<u8>, lib: &str) -> OpResult<Vec<u8>> {
        self.run(bytes, &["--add-needed", lib])
    }

    fn remove(&self, bytes: Vec<u8>, lib: &str) -> OpResult<Vec<u8>> {
        self.run(bytes, &["--remove-needed", lib])
    }

    fn replace(&self, bytes: Vec<u8>, from: &str, to: &str) -> OpResult<Vec<u8>> {
        self.run(bytes, &["--replace-needed", from, to])
    }
}
