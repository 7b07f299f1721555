//! Builds validated, immutable [`Module`]s from rule tables.

use crate::base::base_tables;
use crate::module::{Module, RegistrationWarning, shadow_warnings};
use crate::rewrite::{RuleLayer, RuleSource};
use crate::store::RuleTables;
use blobfix_types::module::ModuleFile;
use blobfix_types::rules::{BlobFixupRule, LibRewriteRule, NamespaceImport, Partition};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistrarError {
    #[error("library '{library}' is claimed by more than one rewrite rule for partition {partition}")]
    DuplicateRuleKey { library: String, partition: Partition },

    #[error("path '{path}' is claimed by more than one fixup rule")]
    DuplicateFixupPath { path: String },

    #[error("{table} rule #{index} has an empty key")]
    EmptyKey { table: &'static str, index: usize },

    #[error("module {field} must not be empty")]
    EmptyIdentity { field: &'static str },
}

/// What to do with duplicate keys inside one module's tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Log and keep the first rule.
    #[default]
    Lenient,
    /// Refuse to build the module.
    Strict,
}

/// Module constructor with a duplicate-key policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct Registrar {
    pub policy: RegistrationPolicy,
}

impl Registrar {
    pub fn new(policy: RegistrationPolicy) -> Self {
        Self { policy }
    }

    /// Build a module registered under `device/<vendor>/<name>` on top of the base table.
    pub fn register(
        &self,
        name: &str,
        vendor: &str,
        namespace_imports: Vec<NamespaceImport>,
        lib_rules: Vec<LibRewriteRule>,
        fixup_rules: Vec<BlobFixupRule>,
    ) -> Result<Module, RegistrarError> {
        self.build(
            name,
            vendor,
            format!("device/{vendor}/{name}"),
            true,
            RuleTables::new(namespace_imports, lib_rules, fixup_rules),
        )
    }

    pub fn register_file(&self, file: ModuleFile) -> Result<Module, RegistrarError> {
        let namespace = file.namespace_or_default();
        let tables = RuleTables::new(file.namespace_imports, file.lib_rewrites, file.blob_fixups);
        self.build(
            &file.name,
            &file.vendor,
            namespace,
            file.inherit_base_lib_rewrites,
            tables,
        )
    }

    fn build(
        &self,
        name: &str,
        vendor: &str,
        namespace: String,
        inherit_base: bool,
        tables: RuleTables,
    ) -> Result<Module, RegistrarError> {
        if name.trim().is_empty() {
            return Err(RegistrarError::EmptyIdentity { field: "name" });
        }
        if vendor.trim().is_empty() {
            return Err(RegistrarError::EmptyIdentity { field: "vendor" });
        }
        check_keys(&tables)?;

        let mut warnings = Vec::new();
        for w in duplicate_lib_keys(tables.lib_rules())
            .into_iter()
            .chain(duplicate_fixup_paths(tables.fixup_rules()))
        {
            match (self.policy, &w) {
                (RegistrationPolicy::Strict, RegistrationWarning::DuplicateRuleKey { library, partition, .. }) => {
                    return Err(RegistrarError::DuplicateRuleKey {
                        library: library.clone(),
                        partition: *partition,
                    });
                }
                (RegistrationPolicy::Strict, RegistrationWarning::DuplicateFixupPath { path, .. }) => {
                    return Err(RegistrarError::DuplicateFixupPath { path: path.clone() });
                }
                _ => {
                    warn!(module = %name, vendor = %vendor, "{w}");
                    warnings.push(w);
                }
            }
        }

        let mut layers = vec![RuleLayer {
            source: RuleSource::Own,
            tables,
        }];
        if inherit_base {
            layers.push(RuleLayer {
                source: RuleSource::Base,
                tables: base_tables().clone(),
            });
        }
        for w in shadow_warnings(&layers) {
            debug!(module = %name, "{w}");
            warnings.push(w);
        }

        debug!(
            module = %name,
            vendor = %vendor,
            namespace = %namespace,
            lib_rules = layers[0].tables.lib_rules().len(),
            fixup_rules = layers[0].tables.fixup_rules().len(),
            "registered module"
        );
        Ok(Module::new(
            name.to_string(),
            vendor.to_string(),
            namespace,
            inherit_base,
            layers,
            warnings,
        ))
    }
}

/// Lenient registration with the base table inherited.
pub fn register_module(
    name: &str,
    vendor: &str,
    namespace_imports: Vec<NamespaceImport>,
    lib_rules: Vec<LibRewriteRule>,
    fixup_rules: Vec<BlobFixupRule>,
) -> Result<Module, RegistrarError> {
    Registrar::default().register(name, vendor, namespace_imports, lib_rules, fixup_rules)
}

fn check_keys(tables: &RuleTables) -> Result<(), RegistrarError> {
    for (index, rule) in tables.lib_rules().iter().enumerate() {
        if rule.libs.is_empty() || rule.libs.iter().any(|l| l.trim().is_empty()) {
            return Err(RegistrarError::EmptyKey {
                table: "lib_rewrites",
                index,
            });
        }
    }
    for (index, rule) in tables.fixup_rules().iter().enumerate() {
        if rule.paths.is_empty() || rule.paths.iter().any(String::is_empty) {
            return Err(RegistrarError::EmptyKey {
                table: "blob_fixups",
                index,
            });
        }
    }
    Ok(())
}

/// A library listed by an earlier rule makes a later rule unreachable for it. Reported for the
/// first partition both rules target, else the first the later rule targets.
fn duplicate_lib_keys(rules: &[LibRewriteRule]) -> Vec<RegistrationWarning> {
    let mut first: BTreeMap<&str, usize> = BTreeMap::new();
    let mut out = Vec::new();

    for (j, rule) in rules.iter().enumerate() {
        for lib in &rule.libs {
            let Some(&i) = first.get(lib.as_str()) else {
                first.insert(lib, j);
                continue;
            };
            if i == j {
                continue;
            }
            let earlier = &rules[i].action;
            let later = &rule.action;
            let contested = Partition::ALL
                .into_iter()
                .find(|p| earlier.targets(*p) && later.targets(*p))
                .or_else(|| Partition::ALL.into_iter().find(|p| later.targets(*p)));
            if let Some(partition) = contested {
                out.push(RegistrationWarning::DuplicateRuleKey {
                    library: lib.clone(),
                    partition,
                    kept: i,
                    ignored: j,
                });
            }
        }
    }
    out
}

fn duplicate_fixup_paths(rules: &[BlobFixupRule]) -> Vec<RegistrationWarning> {
    let mut first: BTreeMap<&str, usize> = BTreeMap::new();
    let mut out = Vec::new();

    for (j, rule) in rules.iter().enumerate() {
        for path in &rule.paths {
            match first.get(path.as_str()) {
                None => {
                    first.insert(path, j);
                }
                Some(&i) if i != j => out.push(RegistrationWarning::DuplicateFixupPath {
                    path: path.clone(),
                    kept: i,
                    ignored: j,
                }),
                Some(_) => {}
            }
        }
    }
    out
}
