use serde::{Deserialize, Serialize};
use std::fmt;

/// One step of a blob fixup chain.
///
/// Every variant is a pure transformation from bytes to bytes; the engine in `blobfix-edit`
/// owns how each one is carried out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FixupOp {
    /// Regex substitution over the content as UTF-8 text.
    ///
    /// `pattern` and `replacement` use the `regex` crate's syntax: groups are referenced as
    /// `$1` or `${name}` and a literal `$` is written `$$`. A backslash reference such as `\1`
    /// is inserted verbatim, not expanded.
    RegexReplace { pattern: String, replacement: String },

    /// Regex substitution over raw bytes. Same syntax as `RegexReplace`; the pattern matches
    /// bytes, so `(?-u)` is needed to match non-UTF-8 sequences such as `\xff`.
    BinaryRegexReplace { pattern: String, replacement: String },

    /// Declare an extra shared-library dependency.
    AddNeeded { lib: String },

    /// Drop a shared-library dependency. Absent entries are not an error.
    RemoveNeeded { lib: String },

    /// Swap one exact dependency entry for another.
    ReplaceNeeded { from: String, to: String },

    /// Apply a named patch set to a structured container (e.g. an APK).
    ApplyPatchSet { id: String },

    /// Append a text line unless an identical line already exists.
    AddLineIfMissing { line: String },

    /// Move a misplaced `<?xml ...?>` declaration to the first line.
    FixXml,
}

impl FixupOp {
    pub fn kind(&self) -> &'static str {
        match self {
            FixupOp::RegexReplace { .. } => "regex_replace",
            FixupOp::BinaryRegexReplace { .. } => "binary_regex_replace",
            FixupOp::AddNeeded { .. } => "add_needed",
            FixupOp::RemoveNeeded { .. } => "remove_needed",
            FixupOp::ReplaceNeeded { .. } => "replace_needed",
            FixupOp::ApplyPatchSet { .. } => "apply_patch_set",
            FixupOp::AddLineIfMissing { .. } => "add_line_if_missing",
            FixupOp::FixXml => "fix_xml",
        }
    }

    pub fn regex_replace(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        FixupOp::RegexReplace {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    pub fn add_needed(lib: impl Into<String>) -> Self {
        FixupOp::AddNeeded { lib: lib.into() }
    }

    pub fn remove_needed(lib: impl Into<String>) -> Self {
        FixupOp::RemoveNeeded { lib: lib.into() }
    }

    pub fn replace_needed(from: impl Into<String>, to: impl Into<String>) -> Self {
        FixupOp::ReplaceNeeded {
            from: from.into(),
            to: to.into(),
        }
    }

    pub fn apply_patch_set(id: impl Into<String>) -> Self {
        FixupOp::ApplyPatchSet { id: id.into() }
    }
}

impl fmt::Display for FixupOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixupOp::RegexReplace {
                pattern,
                replacement,
            }
            | FixupOp::BinaryRegexReplace {
                pattern,
                replacement,
            } => write!(f, "{}({:?} -> {:?})", self.kind(), pattern, replacement),
            FixupOp::AddNeeded { lib } | FixupOp::RemoveNeeded { lib } => {
                write!(f, "{}({})", self.kind(), lib)
            }
            FixupOp::ReplaceNeeded { from, to } => write!(f, "replace_needed({from} -> {to})"),
            FixupOp::ApplyPatchSet { id } => write!(f, "apply_patch_set({id})"),
            FixupOp::AddLineIfMissing { line } => write!(f, "add_line_if_missing({line:?})"),
            FixupOp::FixXml => f.write_str("fix_xml"),
        }
    }
}
