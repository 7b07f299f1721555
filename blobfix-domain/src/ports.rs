use anyhow::{Context, bail};
use blobfix_types::module::ModuleFile;
use blobfix_types::schema::BLOBFIX_MODULE_V1;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use glob::{Pattern, glob};
use tracing::debug;

/// A parsed module file and where it came from.
#[derive(Debug, Clone)]
pub struct LoadedModuleFile {
    pub path: Utf8PathBuf,
    pub file: ModuleFile,
}

/// Supplies module definitions to the registry.
///
/// blobfix-domain uses this so registry loading can be tested against an in-memory implementation.
pub trait ModuleSource {
    fn module_files(&self) -> anyhow::Result<Vec<LoadedModuleFile>>;
}

pub fn parse_module_file(text: &str) -> anyhow::Result<ModuleFile> {
    let file: ModuleFile = toml::from_str(text).context("parse module TOML")?;
    if let Some(schema) = &file.schema
        && schema != BLOBFIX_MODULE_V1
    {
        bail!("unsupported module schema '{schema}' (expected '{BLOBFIX_MODULE_V1}')");
    }
    Ok(file)
}

pub fn read_module_file(path: &Utf8Path) -> anyhow::Result<ModuleFile> {
    let text = fs::read_to_string(path).with_context(|| format!("read {}", path))?;
    parse_module_file(&text).with_context(|| format!("load module {}", path))
}

/// Every `*.toml` below a directory, in path order.
#[derive(Debug, Clone)]
pub struct FsModuleSource {
    root: Utf8PathBuf,
}

impl FsModuleSource {
    pub fn new(root: Utf8PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

impl ModuleSource for FsModuleSource {
    fn module_files(&self) -> anyhow::Result<Vec<LoadedModuleFile>> {
        let pattern =
            Utf8PathBuf::from(Pattern::escape(self.root.as_str())).join("**/*.toml");
        debug!(pattern = %pattern, "scanning for module files");

        let mut paths = Vec::new();
        for entry in glob(pattern.as_str()).context("glob module files")? {
            let path = entry.map_err(|e| anyhow::anyhow!("glob error: {e}"))?;
            let path = Utf8PathBuf::from_path_buf(path)
                .map_err(|p| anyhow::anyhow!("non UTF-8 module path: {}", p.display()))?;
            paths.push(path);
        }
        paths.sort();

        paths
            .into_iter()
            .map(|path| {
                let file = read_module_file(&path)?;
                Ok(LoadedModuleFile { path, file })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryModuleSource {
    files: Vec<LoadedModuleFile>,
}

impl InMemoryModuleSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: &str, file: ModuleFile) -> Self {
        self.files.push(LoadedModuleFile {
            path: Utf8PathBuf::from(path),
            file,
        });
        self
    }
}

impl ModuleSource for InMemoryModuleSource {
    fn module_files(&self) -> anyhow::Result<Vec<LoadedModuleFile>> {
        Ok(self.files.clone())
    }
}
