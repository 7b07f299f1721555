//! Blob fixup engine.
//!
//! Responsibilities:
//! - Look up the fixup chain registered for a blob's install path.
//! - Fold the chain over the blob's bytes, one operation at a time.
//! - Edit `DT_NEEDED` entries, run text/byte substitutions and apply named patch sets through
//!   pluggable backends.
//! - Render a unified diff preview for text blobs.
//!
//! The engine performs no I/O of its own apart from the external-tool backends, which work in
//! private temp directories.

mod error;
pub mod needed;
pub mod patchset;
mod text;

pub use error::{FixupError, FixupErrorKind, OpResult};
pub use needed::{AutoNeededEditor, EditorChoice, ElfNeededEditor, NeededEditor, PatchelfEditor};
pub use patchset::{
    ApktoolPatcher, DirPatchSets, InMemoryPatchSets, PatchSet, PatchSetResolver,
    StructuredPatcher, UnavailablePatcher,
};

use blobfix_types::ops::FixupOp;
use blobfix_types::path::normalize_blob_path;
use diffy::PatchFormatter;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// Source of fixup chains, keyed by normalized install path.
pub trait FixupLookup {
    fn fixup_chain(&self, path: &str) -> Option<&[FixupOp]>;
}

impl FixupLookup for BTreeMap<String, Vec<FixupOp>> {
    fn fixup_chain(&self, path: &str) -> Option<&[FixupOp]> {
        self.get(path).map(Vec::as_slice)
    }
}

/// Result of running the fixups registered for one blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixupOutcome {
    pub bytes: Vec<u8>,
    /// Number of operations in the chain; `None` when no chain is registered.
    pub ops_applied: Option<usize>,
}

impl FixupOutcome {
    pub fn had_rule(&self) -> bool {
        self.ops_applied.is_some()
    }
}

/// Applies fixup chains using the configured backends.
#[derive(Clone)]
pub struct FixupEngine {
    needed: Arc<dyn NeededEditor>,
    patch_sets: Arc<dyn PatchSetResolver>,
    patcher: Arc<dyn StructuredPatcher>,
}

impl std::fmt::Debug for FixupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixupEngine")
            .field("needed", &self.needed.name())
            .field("patcher", &self.patcher.name())
            .finish_non_exhaustive()
    }
}

impl Default for FixupEngine {
    /// In-process ELF editing, no patch sets, no container tool.
    fn default() -> Self {
        Self::builder().build()
    }
}

impl FixupEngine {
    pub fn builder() -> FixupEngineBuilder {
        FixupEngineBuilder::default()
    }

    pub fn needed_editor(&self) -> &dyn NeededEditor {
        self.needed.as_ref()
    }

    /// Run the chain registered for `path`, or hand `bytes` back untouched when there is none.
    pub fn apply_fixups<L>(
        &self,
        rules: &L,
        path: &str,
        bytes: Vec<u8>,
    ) -> Result<FixupOutcome, FixupError>
    where
        L: FixupLookup + ?Sized,
    {
        let path = normalize_blob_path(path);
        let Some(chain) = rules.fixup_chain(&path) else {
            trace!(path = %path, "no fixup rule");
            return Ok(FixupOutcome {
                bytes,
                ops_applied: None,
            });
        };
        let bytes = self.run_chain(&path, bytes, chain)?;
        Ok(FixupOutcome {
            bytes,
            ops_applied: Some(chain.len()),
        })
    }

    /// Fold `ops` over `bytes` left to right. Stops at the first failing operation.
    pub fn run_chain(
        &self,
        path: &str,
        bytes: Vec<u8>,
        ops: &[FixupOp],
    ) -> Result<Vec<u8>, FixupError> {
        let mut current = bytes;
        for (index, op) in ops.iter().enumerate() {
            debug!(path, index, op = %op, "applying fixup op");
            current = self.apply_op(current, op).map_err(|kind| FixupError {
                path: path.to_string(),
                index,
                op: op.to_string(),
                kind,
            })?;
        }
        Ok(current)
    }

    pub fn apply_op(&self, bytes: Vec<u8>, op: &FixupOp) -> OpResult<Vec<u8>> {
        match op {
            FixupOp::RegexReplace {
                pattern,
                replacement,
            } => text::regex_replace(bytes, pattern, replacement),
            FixupOp::BinaryRegexReplace {
                pattern,
                replacement,
            } => text::binary_regex_replace(bytes, pattern, replacement),
            FixupOp::AddLineIfMissing { line } => text::add_line_if_missing(bytes, line),
            FixupOp::FixXml => text::fix_xml(bytes),
            FixupOp::AddNeeded { lib } => {
                if self.needed.needed(&bytes)?.iter().any(|n| n == lib) {
                    debug!(lib, "dependency already declared");
                    return Ok(bytes);
                }
                self.needed.add(bytes, lib)
            }
            FixupOp::RemoveNeeded { lib } => {
                if !self.needed.needed(&bytes)?.iter().any(|n| n == lib) {
                    debug!(lib, "dependency not declared, nothing to remove");
                    return Ok(bytes);
                }
                self.needed.remove(bytes, lib)
            }
            FixupOp::ReplaceNeeded { from, to } => {
                if !self.needed.needed(&bytes)?.iter().any(|n| n == from) {
                    return Err(FixupErrorKind::MissingDependencyEntry {
                        entry: from.clone(),
                    });
                }
                if from == to {
                    return Ok(bytes);
                }
                self.needed.replace(bytes, from, to)
            }
            FixupOp::ApplyPatchSet { id } => {
                let set = self
                    .patch_sets
                    .resolve(id)?
                    .ok_or_else(|| FixupErrorKind::UnresolvedPatchSet { id: id.clone() })?;
                self.patcher.patch(bytes, &set)
            }
        }
    }
}

#[derive(Default)]
pub struct FixupEngineBuilder {
    needed: Option<Arc<dyn NeededEditor>>,
    patch_sets: Option<Arc<dyn PatchSetResolver>>,
    patcher: Option<Arc<dyn StructuredPatcher>>,
}

impl FixupEngineBuilder {
    pub fn needed_editor(mut self, editor: Arc<dyn NeededEditor>) -> Self {
        self.needed = Some(editor);
        self
    }

    pub fn patch_sets(mut self, resolver: Arc<dyn PatchSetResolver>) -> Self {
        self.patch_sets = Some(resolver);
        self
    }

    pub fn structured_patcher(mut self, patcher: Arc<dyn StructuredPatcher>) -> Self {
        self.patcher = Some(patcher);
        self
    }

    pub fn build(self) -> FixupEngine {
        FixupEngine {
            needed: self.needed.unwrap_or_else(|| Arc::new(ElfNeededEditor)),
            patch_sets: self
                .patch_sets
                .unwrap_or_else(|| Arc::new(InMemoryPatchSets::new())),
            patcher: self.patcher.unwrap_or_else(|| Arc::new(UnavailablePatcher)),
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Unified diff between two versions of a text blob. `None` when either side is not UTF-8 or
/// nothing changed.
pub fn preview_diff(path: &str, before: &[u8], after: &[u8]) -> Option<String> {
    let old = std::str::from_utf8(before).ok()?;
    let new = std::str::from_utf8(after).ok()?;
    if old == new {
        return None;
    }

    let mut out = format!("diff --git a/{path} b/{path}\n");
    let patch = diffy::create_patch(old, new);
    out.push_str(&PatchFormatter::new().fmt_patch(&patch).to_string());
    if !out.ends_with('\n') {
        out.push('\n');
    }
    Some(out)
}
