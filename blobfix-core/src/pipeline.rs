//! The fixup and rewrite pipelines, extracted from the CLI.
//!
//! These entry points are I/O-agnostic: blobs are read through [`BlobSource`] and written
//! through [`WritePort`].

use crate::ports::{BlobSource, WritePort};
use crate::settings::FixupSettings;
use anyhow::Context;
use blobfix_domain::{Module, RewriteTrace, RuleRef};
use blobfix_edit::{FixupEngine, FixupLookup, preview_diff, sha256_hex};
use blobfix_types::report::{
    FailedOp, FileResult, FileStatus, FixupReport, FixupSummary, ModuleRef, ToolInfo,
};
use blobfix_types::rules::{Partition, RewriteOutcome};
use camino::Utf8Path;
use chrono::Utc;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Error type for pipeline results. Exit code 2 = fixup failures, 1 = tool error.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// At least one file failed its chain and `fail_fast` was set. Carries the full outcome so
    /// the caller can still write the report.
    #[error("{} file(s) failed fixups", .0.report.summary.failed)]
    FixupFailed(Box<FixupRunOutcome>),
    #[error("{0:#}")]
    Internal(#[from] anyhow::Error),
}

impl ToolError {
    pub fn exit_code(&self) -> u8 {
        match self {
            ToolError::FixupFailed(_) => 2,
            ToolError::Internal(_) => 1,
        }
    }
}

/// Outcome of `run_fixups`.
#[derive(Debug, Clone)]
pub struct FixupRunOutcome {
    pub report: FixupReport,
    /// Concatenated unified diffs of every changed text blob.
    pub patch: String,
}

impl FixupRunOutcome {
    pub fn has_failures(&self) -> bool {
        self.report.has_failures()
    }
}

struct FileRun {
    result: FileResult,
    diff: Option<String>,
}

struct RunContext<'a> {
    module: &'a Module,
    engine: &'a FixupEngine,
    source: &'a dyn BlobSource,
    writer: &'a dyn WritePort,
    out_root: &'a Utf8Path,
    copy_through: bool,
    dry_run: bool,
}

/// Run every blob the source lists through the module's fixup chains.
///
/// Files are processed in parallel; each chain runs sequentially. A failing chain marks its
/// file `Failed` and leaves the extracted bytes in place, without affecting other files. When
/// the output root differs from the source root every file is written there, fixed or not, and
/// every link is recreated with its original target. Links are never followed or fixed.
pub fn run_fixups(
    settings: &FixupSettings,
    module: &Module,
    engine: &FixupEngine,
    source: &dyn BlobSource,
    writer: &dyn WritePort,
    tool: ToolInfo,
) -> Result<FixupRunOutcome, ToolError> {
    let mut report = FixupReport::new(
        tool,
        ModuleRef {
            name: module.name().to_string(),
            vendor: module.vendor().to_string(),
        },
    );
    report.dry_run = settings.dry_run;

    let paths = source.list().context("list blobs")?;
    let out_root = settings.effective_out_root();
    let ctx = RunContext {
        module,
        engine,
        source,
        writer,
        out_root,
        copy_through: settings
            .out_root
            .as_ref()
            .is_some_and(|out| *out != settings.src_root),
        dry_run: settings.dry_run,
    };

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(settings.jobs.unwrap_or(0))
        .build()
        .context("build worker pool")?;
    info!(
        module = %module.namespace(),
        files = paths.len(),
        threads = pool.current_num_threads(),
        dry_run = settings.dry_run,
        "running fixups"
    );

    let mut runs = pool.install(|| {
        paths
            .par_iter()
            .map(|path| fix_one(&ctx, path))
            .collect::<anyhow::Result<Vec<FileRun>>>()
    })?;
    runs.sort_by(|a, b| a.result.path.cmp(&b.result.path));

    if ctx.copy_through {
        copy_links(&ctx)?;
    }

    let listed: BTreeSet<&str> = paths.iter().map(String::as_str).collect();
    report.unmatched_rules = module
        .fixup_paths()
        .into_iter()
        .filter(|p| !listed.contains(p))
        .map(str::to_string)
        .collect();
    for path in &report.unmatched_rules {
        debug!(path = %path, "fixup rule matched no extracted file");
    }

    let mut patch = String::new();
    for run in runs {
        if let Some(diff) = run.diff {
            patch.push_str(&diff);
        }
        report.files.push(run.result);
    }
    report.summary = FixupSummary::from_results(&report.files);
    report.run.ended_at = Some(Utc::now());

    info!(
        fixed = report.summary.fixed,
        unchanged = report.summary.unchanged,
        failed = report.summary.failed,
        "fixups finished"
    );

    let outcome = FixupRunOutcome { report, patch };
    if settings.fail_fast && outcome.has_failures() {
        return Err(ToolError::FixupFailed(Box::new(outcome)));
    }
    Ok(outcome)
}

fn fix_one(ctx: &RunContext<'_>, path: &str) -> anyhow::Result<FileRun> {
    let bytes = ctx.source.read(path)?;
    let before = sha256_hex(&bytes);

    let Some(chain) = ctx.module.fixup_chain(path) else {
        if ctx.copy_through {
            write_blob(ctx, path, &bytes)?;
        }
        return Ok(FileRun {
            result: FileResult {
                path: path.to_string(),
                status: FileStatus::NoRule,
                ops_applied: 0,
                failed_op: None,
                message: None,
                sha256_before: Some(before.clone()),
                sha256_after: Some(before),
            },
            diff: None,
        });
    };

    match ctx.engine.run_chain(path, bytes.clone(), chain) {
        Ok(after) => {
            let changed = after != bytes;
            if changed || ctx.copy_through {
                write_blob(ctx, path, &after)?;
            }
            Ok(FileRun {
                result: FileResult {
                    path: path.to_string(),
                    status: if changed {
                        FileStatus::Fixed
                    } else {
                        FileStatus::Unchanged
                    },
                    ops_applied: chain.len() as u64,
                    failed_op: None,
                    message: None,
                    sha256_before: Some(before),
                    sha256_after: Some(sha256_hex(&after)),
                },
                diff: preview_diff(path, &bytes, &after),
            })
        }
        Err(err) => {
            warn!(
                path = %path,
                index = err.index,
                op = %err.op,
                error = %err.kind,
                "fixup failed, keeping extracted blob"
            );
            if ctx.copy_through {
                write_blob(ctx, path, &bytes)?;
            }
            Ok(FileRun {
                result: FileResult {
                    path: path.to_string(),
                    status: FileStatus::Failed,
                    ops_applied: err.index as u64,
                    failed_op: Some(FailedOp {
                        index: err.index as u64,
                        op: err.op.clone(),
                    }),
                    message: Some(format!("{}: {}", err.kind.token(), err.kind)),
                    sha256_before: Some(before.clone()),
                    sha256_after: Some(before),
                },
                diff: None,
            })
        }
    }
}

/// Recreate the source tree's links verbatim under the output root.
fn copy_links(ctx: &RunContext<'_>) -> anyhow::Result<()> {
    let links = ctx.source.links().context("list links")?;
    debug!(links = links.len(), "copying links");
    if ctx.dry_run {
        return Ok(());
    }
    for link in links {
        ctx.writer
            .symlink(&ctx.out_root.join(&link.path), &link.target)
            .with_context(|| format!("copy link {}", link.path))?;
    }
    Ok(())
}

fn write_blob(ctx: &RunContext<'_>, path: &str, bytes: &[u8]) -> anyhow::Result<()> {
    if ctx.dry_run {
        return Ok(());
    }
    ctx.writer
        .write_file(&ctx.out_root.join(path), bytes)
        .with_context(|| format!("write blob {path}"))
}

/// Write the JSON report, plus `patch.diff` next to it when any text blob changed.
pub fn write_fixup_artifacts(
    outcome: &FixupRunOutcome,
    report_path: &Utf8Path,
    writer: &dyn WritePort,
) -> anyhow::Result<()> {
    if let Some(dir) = report_path.parent()
        && !dir.as_str().is_empty()
    {
        writer.create_dir_all(dir)?;
    }

    let json = serde_json::to_string_pretty(&outcome.report).context("serialize report")?;
    writer.write_file(report_path, json.as_bytes())?;

    if !outcome.patch.is_empty() {
        let patch_path = report_path.with_file_name("patch.diff");
        writer.write_file(&patch_path, outcome.patch.as_bytes())?;
    }
    Ok(())
}

/// One library to rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteRequest {
    pub library: String,
    pub partition: Partition,
}

impl RewriteRequest {
    pub fn new(library: impl Into<String>, partition: Partition) -> Self {
        Self {
            library: library.into(),
            partition,
        }
    }
}

/// Rename decision for one library, with the rule that made it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewriteDecision {
    pub library: String,
    pub partition: Partition,
    pub outcome: RewriteOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<RuleRef>,
}

impl RewriteDecision {
    /// Final name, or `None` when the library is dropped.
    pub fn resolved(&self) -> Option<String> {
        self.outcome.resolve(&self.library)
    }
}

pub fn run_rewrites(module: &Module, requests: &[RewriteRequest]) -> Vec<RewriteDecision> {
    requests
        .iter()
        .map(|req| {
            let (outcome, rule) = match module.rewrite_traced(&req.library, req.partition) {
                RewriteTrace::NoRule => (RewriteOutcome::Unchanged, None),
                RewriteTrace::Matched { rule, outcome } => (outcome, Some(rule)),
            };
            debug!(
                library = %req.library,
                partition = %req.partition,
                outcome = ?outcome,
                "rewrite"
            );
            RewriteDecision {
                library: req.library.clone(),
                partition: req.partition,
                outcome,
                rule,
            }
        })
        .collect()
}
