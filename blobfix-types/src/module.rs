use crate::rules::{BlobFixupRule, LibRewriteRule, NamespaceImport};
use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

/// On-disk definition of an extraction module.
///
/// ```toml
/// name = "sm8475-common"
/// vendor = "motorola"
/// namespace_imports = ["hardware/qcom-caf/sm8450"]
///
/// [[lib_rewrites]]
/// libs = ["libagmclient"]
/// action = { type = "remove" }
///
/// [[blob_fixups]]
/// paths = ["vendor/lib64/libmotext_inf.so"]
/// ops = [{ type = "remove_needed", lib = "libril.so" }]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    pub name: String,
    pub vendor: String,

    /// Namespace this module is registered under. Defaults to `device/<vendor>/<name>`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    #[serde(default)]
    pub namespace_imports: Vec<NamespaceImport>,

    /// Layer the built-in library rewrite table under this module's rules.
    #[serde(default = "default_true")]
    pub inherit_base_lib_rewrites: bool,

    #[serde(default)]
    pub lib_rewrites: Vec<LibRewriteRule>,

    #[serde(default)]
    pub blob_fixups: Vec<BlobFixupRule>,
}

impl ModuleFile {
    pub fn namespace_or_default(&self) -> String {
        self.namespace
            .clone()
            .unwrap_or_else(|| format!("device/{}/{}", self.vendor, self.name))
    }
}
