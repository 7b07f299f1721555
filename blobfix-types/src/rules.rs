use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Install-location category of a blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    System,
    SystemExt,
    Product,
    Vendor,
    Odm,
    VendorDlkm,
}

impl Partition {
    pub const ALL: [Partition; 6] = [
        Partition::System,
        Partition::SystemExt,
        Partition::Product,
        Partition::Vendor,
        Partition::Odm,
        Partition::VendorDlkm,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Partition::System => "system",
            Partition::SystemExt => "system_ext",
            Partition::Product => "product",
            Partition::Vendor => "vendor",
            Partition::Odm => "odm",
            Partition::VendorDlkm => "vendor_dlkm",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownPartition(pub String);

impl fmt::Display for UnknownPartition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown partition '{}'", self.0)
    }
}

impl std::error::Error for UnknownPartition {}

impl FromStr for Partition {
    type Err = UnknownPartition;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Partition::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownPartition(s.to_string()))
    }
}

/// A reference to another rule-table source (a namespace path such as
/// `hardware/qcom-caf/sm8450`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceImport(pub String);

impl NamespaceImport {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NamespaceImport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a library rewrite rule does once its key set matched.
///
/// Each variant is a closed strategy; an action may decline for partitions it does not target,
/// which yields [`RewriteOutcome::Unchanged`] without falling through to later rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RewriteAction {
    /// `<lib>-<partition>` for the listed partitions.
    PartitionSuffix { partitions: Vec<Partition> },

    /// Drop the library from the output.
    Remove,

    /// `<lib><suffix>`, optionally scoped to partitions.
    Suffix {
        suffix: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partitions: Option<Vec<Partition>>,
    },

    /// Strip the first matching suffix.
    StripSuffix { suffixes: Vec<String> },

    /// `libfoo-21.12` -> `libfoo`.
    StripVersionSuffix,

    /// Fixed replacement name, optionally scoped to partitions.
    Rename {
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        partitions: Option<Vec<Partition>>,
    },
}

impl RewriteAction {
    /// Partitions for which this action may produce something other than `Unchanged`.
    ///
    /// `None` means every partition.
    pub fn partitions(&self) -> Option<&[Partition]> {
        match self {
            RewriteAction::PartitionSuffix { partitions } => Some(partitions),
            RewriteAction::Suffix { partitions, .. } | RewriteAction::Rename { partitions, .. } => {
                partitions.as_deref()
            }
            RewriteAction::Remove
            | RewriteAction::StripSuffix { .. }
            | RewriteAction::StripVersionSuffix => None,
        }
    }

    pub fn targets(&self, partition: Partition) -> bool {
        self.partitions().is_none_or(|ps| ps.contains(&partition))
    }

    pub fn label(&self) -> &'static str {
        match self {
            RewriteAction::PartitionSuffix { .. } => "partition_suffix",
            RewriteAction::Remove => "remove",
            RewriteAction::Suffix { .. } => "suffix",
            RewriteAction::StripSuffix { .. } => "strip_suffix",
            RewriteAction::StripVersionSuffix => "strip_version_suffix",
            RewriteAction::Rename { .. } => "rename",
        }
    }
}

/// A set of library identifiers sharing one rewrite action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibRewriteRule {
    pub libs: Vec<String>,
    pub action: RewriteAction,
}

impl LibRewriteRule {
    pub fn new<I, S>(libs: I, action: RewriteAction) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            libs: libs.into_iter().map(Into::into).collect(),
            action,
        }
    }

    pub fn matches(&self, lib: &str) -> bool {
        self.libs.iter().any(|l| l == lib)
    }
}

/// Result of rewriting one library name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "name", rename_all = "snake_case")]
pub enum RewriteOutcome {
    Renamed(String),
    Removed,
    Unchanged,
}

impl RewriteOutcome {
    /// Final library name, or `None` when removed.
    pub fn resolve(&self, original: &str) -> Option<String> {
        match self {
            RewriteOutcome::Renamed(n) => Some(n.clone()),
            RewriteOutcome::Removed => None,
            RewriteOutcome::Unchanged => Some(original.to_string()),
        }
    }
}

/// One or more install paths sharing an ordered fixup chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobFixupRule {
    pub paths: Vec<String>,

    #[serde(default)]
    pub ops: Vec<crate::ops::FixupOp>,
}

impl BlobFixupRule {
    pub fn new<I, S>(paths: I, ops: Vec<crate::ops::FixupOp>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            paths: paths.into_iter().map(Into::into).collect(),
            ops,
        }
    }
}
