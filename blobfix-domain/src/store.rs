//! Immutable rule tables.

use blobfix_types::ops::FixupOp;
use blobfix_types::path::normalize_blob_path;
use blobfix_types::rules::{BlobFixupRule, LibRewriteRule, NamespaceImport};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Namespace imports, library rewrite rules and blob fixup chains of one rule source.
///
/// Cloning is cheap: every table sits behind an `Arc`. Fixup paths are normalized once, here.
#[derive(Debug, Clone, Default)]
pub struct RuleTables {
    imports: Arc<[NamespaceImport]>,
    lib_rules: Arc<[LibRewriteRule]>,
    fixup_rules: Arc<[BlobFixupRule]>,
    /// Normalized path -> index into `fixup_rules`. The first rule claiming a path wins.
    path_index: Arc<BTreeMap<String, usize>>,
}

impl RuleTables {
    pub fn new(
        imports: Vec<NamespaceImport>,
        lib_rules: Vec<LibRewriteRule>,
        fixup_rules: Vec<BlobFixupRule>,
    ) -> Self {
        let fixup_rules: Vec<BlobFixupRule> = fixup_rules
            .into_iter()
            .map(|rule| BlobFixupRule {
                paths: rule.paths.iter().map(|p| normalize_blob_path(p)).collect(),
                ops: rule.ops,
            })
            .collect();

        let mut path_index = BTreeMap::new();
        for (i, rule) in fixup_rules.iter().enumerate() {
            for path in &rule.paths {
                path_index.entry(path.clone()).or_insert(i);
            }
        }

        Self {
            imports: imports.into(),
            lib_rules: lib_rules.into(),
            fixup_rules: fixup_rules.into(),
            path_index: Arc::new(path_index),
        }
    }

    pub fn namespace_imports(&self) -> &[NamespaceImport] {
        &self.imports
    }

    pub fn lib_rules(&self) -> &[LibRewriteRule] {
        &self.lib_rules
    }

    pub fn fixup_rules(&self) -> &[BlobFixupRule] {
        &self.fixup_rules
    }

    /// Chain registered for an already-normalized path.
    pub fn fixup_chain(&self, path: &str) -> Option<&[FixupOp]> {
        self.path_index
            .get(path)
            .map(|i| self.fixup_rules[*i].ops.as_slice())
    }

    /// Every path with a chain, sorted.
    pub fn fixup_paths(&self) -> impl Iterator<Item = &str> {
        self.path_index.keys().map(String::as_str)
    }

    /// First rule whose key set contains `lib`, with its position.
    pub fn lib_rule_for(&self, lib: &str) -> Option<(usize, &LibRewriteRule)> {
        self.lib_rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.matches(lib))
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty() && self.lib_rules.is_empty() && self.fixup_rules.is_empty()
    }
}
