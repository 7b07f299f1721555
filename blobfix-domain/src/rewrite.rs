//! Library name rewriting.
//!
//! Rules are scanned layer by layer, then in declaration order. The first rule whose key set
//! contains the library decides the outcome, including when its action declines for the
//! partition at hand. Declining is final: later rules are never consulted for that library.

use crate::store::RuleTables;
use blobfix_types::rules::{Partition, RewriteAction, RewriteOutcome};
use serde::Serialize;
use std::fmt;

/// Where a rule layer comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "namespace", rename_all = "snake_case")]
pub enum RuleSource {
    /// The module's own tables.
    Own,
    /// Tables of an imported module, by namespace.
    Import(String),
    /// The built-in base library table.
    Base,
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleSource::Own => f.write_str("own"),
            RuleSource::Import(ns) => write!(f, "import:{ns}"),
            RuleSource::Base => f.write_str("base"),
        }
    }
}

/// One layer of rule tables, in lookup priority order.
#[derive(Debug, Clone)]
pub struct RuleLayer {
    pub source: RuleSource,
    pub tables: RuleTables,
}

/// Position of the rule that matched a library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleRef {
    pub source: RuleSource,
    pub index: usize,
    pub action: &'static str,
}

/// Why a rewrite came out the way it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "match", rename_all = "snake_case")]
pub enum RewriteTrace {
    /// No rule lists the library.
    NoRule,
    /// A rule listed the library; `outcome` may still be `Unchanged` when it declined.
    Matched {
        rule: RuleRef,
        outcome: RewriteOutcome,
    },
}

impl RewriteTrace {
    pub fn outcome(&self) -> RewriteOutcome {
        match self {
            RewriteTrace::NoRule => RewriteOutcome::Unchanged,
            RewriteTrace::Matched { outcome, .. } => outcome.clone(),
        }
    }

    /// A rule matched and chose not to act.
    pub fn declined(&self) -> bool {
        matches!(
            self,
            RewriteTrace::Matched {
                outcome: RewriteOutcome::Unchanged,
                ..
            }
        )
    }
}

/// Rewrite `lib` for `partition` against the given layers.
pub fn rewrite_traced(layers: &[RuleLayer], lib: &str, partition: Partition) -> RewriteTrace {
    if lib.is_empty() {
        return RewriteTrace::NoRule;
    }
    for layer in layers {
        if let Some((index, rule)) = layer.tables.lib_rule_for(lib) {
            return RewriteTrace::Matched {
                rule: RuleRef {
                    source: layer.source.clone(),
                    index,
                    action: rule.action.label(),
                },
                outcome: apply_action(&rule.action, lib, partition),
            };
        }
    }
    RewriteTrace::NoRule
}

pub fn rewrite(layers: &[RuleLayer], lib: &str, partition: Partition) -> RewriteOutcome {
    rewrite_traced(layers, lib, partition).outcome()
}

/// Evaluate one action. Producing the input name again counts as declining.
pub fn apply_action(action: &RewriteAction, lib: &str, partition: Partition) -> RewriteOutcome {
    if !action.targets(partition) {
        return RewriteOutcome::Unchanged;
    }

    let renamed = match action {
        RewriteAction::Remove => return RewriteOutcome::Removed,
        RewriteAction::PartitionSuffix { .. } => Some(format!("{lib}-{partition}")),
        RewriteAction::Suffix { suffix, .. } => Some(format!("{lib}{suffix}")),
        RewriteAction::StripSuffix { suffixes } => suffixes
            .iter()
            .find_map(|s| lib.strip_suffix(s.as_str()))
            .filter(|stem| !stem.is_empty())
            .map(str::to_string),
        RewriteAction::StripVersionSuffix => strip_version_suffix(lib).map(str::to_string),
        RewriteAction::Rename { to, .. } => Some(to.clone()),
    };

    match renamed {
        Some(name) if name != lib && !name.is_empty() => RewriteOutcome::Renamed(name),
        _ => RewriteOutcome::Unchanged,
    }
}

/// `libprotobuf-cpp-full-21.12` -> `libprotobuf-cpp-full`.
fn strip_version_suffix(lib: &str) -> Option<&str> {
    let (stem, version) = lib.rsplit_once('-')?;
    let is_version = version.starts_with(|c: char| c.is_ascii_digit())
        && version.chars().all(|c| c.is_ascii_digit() || c == '.');
    (is_version && !stem.is_empty()).then_some(stem)
}
