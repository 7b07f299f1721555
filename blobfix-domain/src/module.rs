use crate::rewrite::{self, RewriteTrace, RuleLayer, RuleSource};
use crate::store::RuleTables;
use blobfix_edit::FixupLookup;
use blobfix_types::ops::FixupOp;
use blobfix_types::rules::{NamespaceImport, Partition, RewriteOutcome};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::Arc;

/// Which table a shadowed key lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TableKind {
    LibRewrites,
    BlobFixups,
}

/// Non-fatal findings recorded while registering or resolving a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RegistrationWarning {
    /// Two rules of one table list the same library; the earlier one wins.
    DuplicateRuleKey {
        library: String,
        partition: Partition,
        kept: usize,
        ignored: usize,
    },
    /// Two fixup rules of one table claim the same path; the earlier one wins.
    DuplicateFixupPath {
        path: String,
        kept: usize,
        ignored: usize,
    },
    /// A key defined by several layers; only the highest-priority layer is consulted.
    Shadowed {
        table: TableKind,
        key: String,
        winner: RuleSource,
        shadowed: RuleSource,
    },
    /// An import whose module is not registered.
    UnresolvedImport { namespace: String },
}

impl fmt::Display for RegistrationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationWarning::DuplicateRuleKey {
                library,
                partition,
                kept,
                ignored,
            } => write!(
                f,
                "library '{library}' ({partition}) is listed by lib rule #{kept} and #{ignored}; #{kept} wins"
            ),
            RegistrationWarning::DuplicateFixupPath {
                path,
                kept,
                ignored,
            } => write!(
                f,
                "path '{path}' is claimed by fixup rule #{kept} and #{ignored}; #{kept} wins"
            ),
            RegistrationWarning::Shadowed {
                table,
                key,
                winner,
                shadowed,
            } => {
                let table = match table {
                    TableKind::LibRewrites => "lib rewrite",
                    TableKind::BlobFixups => "blob fixup",
                };
                write!(f, "{table} '{key}' from {winner} shadows {shadowed}")
            }
            RegistrationWarning::UnresolvedImport { namespace } => {
                write!(f, "import '{namespace}' has no registered module")
            }
        }
    }
}

/// A named, immutable bundle of rule tables handed to the extraction pipeline.
///
/// Lookups walk `layers` in order: the module's own tables first, then imported modules (latest
/// import first), then the base table when inherited.
#[derive(Debug, Clone)]
pub struct Module {
    name: String,
    vendor: String,
    namespace: String,
    inherits_base: bool,
    layers: Arc<[RuleLayer]>,
    warnings: Vec<RegistrationWarning>,
}

impl Module {
    pub(crate) fn new(
        name: String,
        vendor: String,
        namespace: String,
        inherits_base: bool,
        layers: Vec<RuleLayer>,
        warnings: Vec<RegistrationWarning>,
    ) -> Self {
        Self {
            name,
            vendor,
            namespace,
            inherits_base,
            layers: layers.into(),
            warnings,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn vendor(&self) -> &str {
        &self.vendor
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn inherits_base(&self) -> bool {
        self.inherits_base
    }

    pub fn namespace_imports(&self) -> &[NamespaceImport] {
        self.own_tables().namespace_imports()
    }

    pub fn own_tables(&self) -> &RuleTables {
        &self.layers[0].tables
    }

    pub fn layers(&self) -> &[RuleLayer] {
        &self.layers
    }

    pub fn warnings(&self) -> &[RegistrationWarning] {
        &self.warnings
    }

    pub fn rewrite(&self, lib: &str, partition: Partition) -> RewriteOutcome {
        rewrite::rewrite(&self.layers, lib, partition)
    }

    pub fn rewrite_traced(&self, lib: &str, partition: Partition) -> RewriteTrace {
        rewrite::rewrite_traced(&self.layers, lib, partition)
    }

    /// Chain for a normalized path, with the layer it came from.
    pub fn fixup_chain_with_source(&self, path: &str) -> Option<(&RuleSource, &[FixupOp])> {
        self.layers
            .iter()
            .find_map(|l| l.tables.fixup_chain(path).map(|ops| (&l.source, ops)))
    }

    /// Every path with a chain in any layer, sorted.
    pub fn fixup_paths(&self) -> BTreeSet<&str> {
        self.layers
            .iter()
            .flat_map(|l| l.tables.fixup_paths())
            .collect()
    }

    pub(crate) fn own_layer_only(&self) -> RuleLayer {
        self.layers[0].clone()
    }
}

impl FixupLookup for Module {
    fn fixup_chain(&self, path: &str) -> Option<&[FixupOp]> {
        self.fixup_chain_with_source(path).map(|(_, ops)| ops)
    }
}

/// Keys defined in more than one layer.
pub(crate) fn shadow_warnings(layers: &[RuleLayer]) -> Vec<RegistrationWarning> {
    let mut out = Vec::new();
    let mut seen: HashSet<(TableKind, String, RuleSource)> = HashSet::new();

    for (k, layer) in layers.iter().enumerate() {
        let libs = layer
            .tables
            .lib_rules()
            .iter()
            .flat_map(|r| r.libs.iter().map(String::as_str));
        let paths = layer.tables.fixup_paths();
        let keys = libs
            .map(|key| (TableKind::LibRewrites, key))
            .chain(paths.map(|key| (TableKind::BlobFixups, key)));

        for (table, key) in keys {
            let winner = layers[..k].iter().find(|earlier| match table {
                TableKind::LibRewrites => earlier.tables.lib_rule_for(key).is_some(),
                TableKind::BlobFixups => earlier.tables.fixup_chain(key).is_some(),
            });
            let Some(winner) = winner else { continue };
            if seen.insert((table, key.to_string(), layer.source.clone())) {
                out.push(RegistrationWarning::Shadowed {
                    table,
                    key: key.to_string(),
                    winner: winner.source.clone(),
                    shadowed: layer.source.clone(),
                });
            }
        }
    }
    out
}
