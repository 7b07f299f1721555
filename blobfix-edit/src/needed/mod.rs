//! Shared-library dependency (`DT_NEEDED`) editing backends.

mod elf;
mod patchelf;

pub use elf::ElfNeededEditor;
pub use patchelf::PatchelfEditor;

use crate::error::{FixupErrorKind, OpResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// Mechanics of editing a binary's dependency table.
///
/// Backends only perform the edit. Rule semantics (idempotent remove, add of a present entry,
/// stale replace) are enforced once by the engine in [`crate::FixupEngine`].
pub trait NeededEditor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Declared dependencies, in table order.
    fn needed(&self, bytes: &[u8]) -> OpResult<Vec<String>>;

    fn add(&self, bytes: Vec<u8>, lib: &str) -> OpResult<Vec<u8>>;

    fn remove(&self, bytes: Vec<u8>, lib: &str) -> OpResult<Vec<u8>>;

    fn replace(&self, bytes: Vec<u8>, from: &str, to: &str) -> OpResult<Vec<u8>>;
}

/// In-place editing first; `patchelf` when the in-place editor runs out of room.
#[derive(Debug, Clone, Default)]
pub struct AutoNeededEditor {
    elf: ElfNeededEditor,
    patchelf: Option<PatchelfEditor>,
}

impl AutoNeededEditor {
    pub fn new(patchelf: Option<PatchelfEditor>) -> Self {
        Self {
            elf: ElfNeededEditor,
            patchelf,
        }
    }

    /// Use `patchelf` from `PATH` if it is installed.
    pub fn detect() -> Self {
        Self::new(PatchelfEditor::locate())
    }

    fn fallback<F>(&self, first: OpResult<Vec<u8>>, retry: F) -> OpResult<Vec<u8>>
    where
        F: FnOnce(&PatchelfEditor) -> OpResult<Vec<u8>>,
    {
        match (first, &self.patchelf) {
            (Err(FixupErrorKind::InsufficientSpace { message }), Some(pe)) => {
                debug!(reason = %message, "in-place edit impossible, retrying with patchelf");
                retry(pe)
            }
            (res, _) => res,
        }
    }
}

impl NeededEditor for AutoNeededEditor {
    fn name(&self) -> &'static str {
        "auto"
    }

    fn needed(&self, bytes: &[u8]) -> OpResult<Vec<String>> {
        self.elf.needed(bytes)
    }

    fn add(&self, bytes: Vec<u8>, lib: &str) -> OpResult<Vec<u8>> {
        let first = self.elf.add(bytes.clone(), lib);
        self.fallback(first, |pe| pe.add(bytes, lib))
    }

    fn remove(&self, bytes: Vec<u8>, lib: &str) -> OpResult<Vec<u8>> {
        self.elf.remove(bytes, lib)
    }

    fn replace(&self, bytes: Vec<u8>, from: &str, to: &str) -> OpResult<Vec<u8>> {
        let first = self.elf.replace(bytes.clone(), from, to);
        self.fallback(first, |pe| pe.replace(bytes, from, to))
    }
}

/// Which dependency editor a run uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditorChoice {
    #[default]
    Auto,
    Elf,
    Patchelf,
}

impl EditorChoice {
    pub fn build(self) -> OpResult<Arc<dyn NeededEditor>> {
        Ok(match self {
            EditorChoice::Auto => Arc::new(AutoNeededEditor::detect()),
            EditorChoice::Elf => Arc::new(ElfNeededEditor),
            EditorChoice::Patchelf => Arc::new(
                PatchelfEditor::locate()
                    .ok_or_else(|| FixupErrorKind::tool("patchelf", "not found on PATH"))?,
            ),
        })
    }
}

impl fmt::Display for EditorChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EditorChoice::Auto => "auto",
            EditorChoice::Elf => "elf",
            EditorChoice::Patchelf => "patchelf",
        })
    }
}

impl FromStr for EditorChoice {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(EditorChoice::Auto),
            "elf" => Ok(EditorChoice::Elf),
            "patchelf" => Ok(EditorChoice::Patchelf),
            other => Err(format!(
                "unknown editor '{other}' (expected auto, elf or patchelf)"
            )),
        }
    }
}
