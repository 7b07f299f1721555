//! Modules keyed by namespace, with namespace imports resolved into rule layers.

use crate::base::base_tables;
use crate::module::{Module, RegistrationWarning, shadow_warnings};
use crate::ports::ModuleSource;
use crate::registrar::Registrar;
use crate::rewrite::{RuleLayer, RuleSource};
use anyhow::Context;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("no module registered under namespace '{0}'")]
    UnknownNamespace(String),
}

#[derive(Debug, Clone, Default)]
pub struct ModuleRegistry {
    modules: BTreeMap<String, Module>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every module file the source provides.
    pub fn load(source: &dyn ModuleSource, registrar: &Registrar) -> anyhow::Result<Self> {
        let mut registry = Self::new();
        for loaded in source.module_files()? {
            let module = registrar
                .register_file(loaded.file)
                .with_context(|| format!("register module {}", loaded.path))?;
            registry.insert(module);
        }
        Ok(registry)
    }

    /// Register a module under its namespace. Returns the module it replaced, if any.
    pub fn insert(&mut self, module: Module) -> Option<Module> {
        let namespace = module.namespace().to_string();
        let previous = self.modules.insert(namespace.clone(), module);
        if previous.is_some() {
            warn!(namespace = %namespace, "module namespace registered twice; keeping the latest");
        }
        previous
    }

    pub fn get(&self, namespace: &str) -> Option<&Module> {
        self.modules.get(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.modules.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// The module registered under `namespace`, with its imports layered in.
    ///
    /// Layer order: own tables, imports from last to first (each followed by its own imports),
    /// then the base table. Self-imports and cycles are skipped; imports without a registered
    /// module are kept as plain references and reported.
    pub fn resolve(&self, namespace: &str) -> Result<Module, RegistryError> {
        let root = self
            .modules
            .get(namespace)
            .ok_or_else(|| RegistryError::UnknownNamespace(namespace.to_string()))?;
        Ok(self.resolve_module(root))
    }

    /// Resolve imports for a module that may not be registered itself.
    pub fn resolve_module(&self, root: &Module) -> Module {
        let mut layers = vec![root.own_layer_only()];
        let mut warnings: Vec<RegistrationWarning> = root
            .warnings()
            .iter()
            .filter(|w| !matches!(w, RegistrationWarning::Shadowed { .. }))
            .cloned()
            .collect();
        let mut visited = BTreeSet::from([root.namespace().to_string()]);

        self.collect_imports(root, &mut visited, &mut layers, &mut warnings);

        if root.inherits_base() {
            layers.push(RuleLayer {
                source: RuleSource::Base,
                tables: base_tables().clone(),
            });
        }
        warnings.extend(shadow_warnings(&layers));

        debug!(
            namespace = %root.namespace(),
            layers = layers.len(),
            "resolved module imports"
        );
        Module::new(
            root.name().to_string(),
            root.vendor().to_string(),
            root.namespace().to_string(),
            root.inherits_base(),
            layers,
            warnings,
        )
    }

    fn collect_imports(
        &self,
        module: &Module,
        visited: &mut BTreeSet<String>,
        layers: &mut Vec<RuleLayer>,
        warnings: &mut Vec<RegistrationWarning>,
    ) {
        for import in module.namespace_imports().iter().rev() {
            let ns = import.as_str();
            if !visited.insert(ns.to_string()) {
                debug!(import = %ns, "import already layered, skipping");
                continue;
            }
            let Some(imported) = self.modules.get(ns) else {
                debug!(import = %ns, "import has no registered module");
                warnings.push(RegistrationWarning::UnresolvedImport {
                    namespace: ns.to_string(),
                });
                continue;
            };

            let mut layer = imported.own_layer_only();
            layer.source = RuleSource::Import(ns.to_string());
            layers.push(layer);
            self.collect_imports(imported, visited, layers, warnings);
        }
    }
}
