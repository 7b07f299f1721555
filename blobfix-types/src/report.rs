use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Result of one fixup run over a blob tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixupReport {
    pub schema: String,
    pub tool: ToolInfo,
    pub run: RunInfo,
    pub module: ModuleRef,

    #[serde(default)]
    pub dry_run: bool,

    #[serde(default)]
    pub files: Vec<FileResult>,

    /// Paths with a registered chain that were not found in the tree.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmatched_rules: Vec<String>,

    pub summary: FixupSummary,
}

impl FixupReport {
    pub fn new(tool: ToolInfo, module: ModuleRef) -> Self {
        Self {
            schema: crate::schema::BLOBFIX_FIXUP_V1.to_string(),
            tool,
            run: RunInfo::started_now(),
            module,
            dry_run: false,
            files: vec![],
            unmatched_rules: vec![],
            summary: FixupSummary::default(),
        }
    }

    pub fn has_failures(&self) -> bool {
        self.summary.failed > 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: Uuid,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunInfo {
    pub fn started_now() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Some(Utc::now()),
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRef {
    pub name: String,
    pub vendor: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// A chain ran and changed the bytes.
    Fixed,
    /// A chain ran and produced identical bytes.
    Unchanged,
    /// No chain is registered for the path.
    NoRule,
    /// An operation failed; the file was left as extracted.
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileResult {
    pub path: String,
    pub status: FileStatus,

    #[serde(default)]
    pub ops_applied: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_op: Option<FailedOp>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_before: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256_after: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedOp {
    pub index: u64,
    pub op: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixupSummary {
    pub files_total: u64,
    pub fixed: u64,
    pub unchanged: u64,
    pub no_rule: u64,
    pub failed: u64,
}

impl FixupSummary {
    pub fn from_results(results: &[FileResult]) -> Self {
        let mut s = FixupSummary {
            files_total: results.len() as u64,
            ..Default::default()
        };
        for r in results {
            match r.status {
                FileStatus::Fixed => s.fixed += 1,
                FileStatus::Unchanged => s.unchanged += 1,
                FileStatus::NoRule => s.no_rule += 1,
                FileStatus::Failed => s.failed += 1,
            }
        }
        s
    }
}
