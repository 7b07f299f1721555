//! Error types for blobfix-edit.
//!
//! A failing operation aborts the chain for one file only. The error names the file, the
//! operation's position in the chain and the underlying cause, so the caller can decide whether to
//! skip the file or abort the run.

use thiserror::Error;

/// A fixup chain failed for one file.
#[derive(Debug, Error)]
#[error("fixup failed for {path} at op #{index} ({op}): {kind}")]
pub struct FixupError {
    /// Normalized install path of the blob.
    pub path: String,

    /// Zero-based position of the failing operation in its chain.
    pub index: usize,

    /// Human-readable rendering of the failing operation.
    pub op: String,

    #[source]
    pub kind: FixupErrorKind,
}

/// Why a single fixup operation failed.
#[derive(Debug, Error)]
pub enum FixupErrorKind {
    /// A regex pattern did not compile.
    #[error("pattern compile error for {pattern:?}: {source}")]
    PatternCompile {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// A replace targeted a dependency entry that is not declared (stale rule).
    #[error("missing dependency entry: {entry}")]
    MissingDependencyEntry { entry: String },

    /// No patch set is registered under the identifier.
    #[error("unresolved patch set: {id}")]
    UnresolvedPatchSet { id: String },

    /// A text operation ran on content that is not UTF-8.
    #[error("content is not valid UTF-8 text")]
    NotText,

    /// The blob could not be parsed as the expected binary format.
    #[error("malformed binary: {message}")]
    MalformedBinary { message: String },

    /// The in-place editor has no room for the requested change.
    #[error("insufficient space: {message}")]
    InsufficientSpace { message: String },

    /// A patch did not apply.
    #[error("patch {path} did not apply: {message}")]
    PatchRejected { path: String, message: String },

    /// An external tool failed or is unavailable.
    #[error("{tool} failed: {message}")]
    Tool { tool: String, message: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FixupErrorKind {
    /// Stable token for reports.
    pub fn token(&self) -> &'static str {
        match self {
            FixupErrorKind::PatternCompile { .. } => "pattern_compile",
            FixupErrorKind::MissingDependencyEntry { .. } => "missing_dependency_entry",
            FixupErrorKind::UnresolvedPatchSet { .. } => "unresolved_patch_set",
            FixupErrorKind::NotText => "not_text",
            FixupErrorKind::MalformedBinary { .. } => "malformed_binary",
            FixupErrorKind::InsufficientSpace { .. } => "insufficient_space",
            FixupErrorKind::PatchRejected { .. } => "patch_rejected",
            FixupErrorKind::Tool { .. } => "tool",
            FixupErrorKind::Io(_) => "io",
        }
    }

    pub(crate) fn malformed(message: impl Into<String>) -> Self {
        FixupErrorKind::MalformedBinary {
            message: message.into(),
        }
    }

    pub(crate) fn no_space(message: impl Into<String>) -> Self {
        FixupErrorKind::InsufficientSpace {
            message: message.into(),
        }
    }

    pub(crate) fn tool(tool: &str, message: impl Into<String>) -> Self {
        FixupErrorKind::Tool {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// Result type alias for a single operation.
pub type OpResult<T> = Result<T, FixupErrorKind>;
