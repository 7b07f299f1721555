//! Configuration file loading for blobfix.
//!
//! Discovers and loads `blobfix.toml` from the working directory.
//! Merges config file settings with CLI arguments (CLI takes precedence).

use anyhow::Context;
use blobfix_edit::EditorChoice;
use camino::{Utf8Path, Utf8PathBuf};
use fs_err as fs;
use serde::Deserialize;
use tracing::debug;

/// The config file name to search for.
pub const CONFIG_FILE_NAME: &str = "blobfix.toml";

/// Top-level configuration from blobfix.toml.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlobfixConfig {
    pub fixup: FixupConfig,
    pub registration: RegistrationConfig,
}

/// Fixup section of the config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FixupConfig {
    /// Dependency editor backend.
    pub editor: Option<EditorChoice>,

    /// Worker threads.
    pub jobs: Option<usize>,

    /// Exit with code 2 when any file fails.
    pub fail_fast: bool,

    /// Directories searched for patch sets, after any given on the command line.
    pub patch_dirs: Vec<Utf8PathBuf>,

    /// Directory of module files used to resolve namespace imports.
    pub modules_dir: Option<Utf8PathBuf>,
}

/// Registration section of the config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistrationConfig {
    /// Reject duplicate keys instead of warning.
    pub strict: bool,
}

/// Discover the blobfix.toml config file in `dir`.
pub fn discover_config(dir: &Utf8Path) -> Option<Utf8PathBuf> {
    let config_path = dir.join(CONFIG_FILE_NAME);
    if config_path.exists() {
        debug!("found config file at {}", config_path);
        Some(config_path)
    } else {
        debug!("no config file found at {}", config_path);
        None
    }
}

/// Load and parse a blobfix.toml config file.
pub fn load_config(path: &Utf8Path) -> anyhow::Result<BlobfixConfig> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read config file {}", path))?;
    parse_config(&contents).with_context(|| format!("parse config file {}", path))
}

pub fn parse_config(contents: &str) -> anyhow::Result<BlobfixConfig> {
    let config: BlobfixConfig = toml::from_str(contents).context("invalid TOML")?;
    Ok(config)
}

/// Load config from `dir`, or return default if not found.
pub fn load_or_default(dir: &Utf8Path) -> anyhow::Result<BlobfixConfig> {
    match discover_config(dir) {
        Some(path) => load_config(&path),
        None => Ok(BlobfixConfig::default()),
    }
}

/// Configuration after merging CLI arguments over the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedConfig {
    pub editor: EditorChoice,
    pub jobs: Option<usize>,
    pub fail_fast: bool,
    /// CLI directories first, so they win over config directories.
    pub patch_dirs: Vec<Utf8PathBuf>,
    pub modules_dir: Option<Utf8PathBuf>,
    pub strict: bool,
}

/// Fixup-related CLI values, as parsed.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub editor: Option<EditorChoice>,
    pub jobs: Option<usize>,
    pub fail_fast: bool,
    pub patch_dirs: Vec<Utf8PathBuf>,
    pub modules_dir: Option<Utf8PathBuf>,
    pub strict: bool,
}

/// Builder for merging config file with CLI arguments.
pub struct ConfigMerger {
    config: BlobfixConfig,
}

impl ConfigMerger {
    pub fn new(config: BlobfixConfig) -> Self {
        Self { config }
    }

    /// Options take the CLI value when given; flags are on when either side sets them.
    pub fn merge(self, cli: CliOverrides) -> MergedConfig {
        let fixup = self.config.fixup;

        let mut patch_dirs = cli.patch_dirs;
        for dir in fixup.patch_dirs {
            if !patch_dirs.contains(&dir) {
                patch_dirs.push(dir);
            }
        }

        MergedConfig {
            editor: cli.editor.or(fixup.editor).unwrap_or_default(),
            jobs: cli.jobs.or(fixup.jobs),
            fail_fast: cli.fail_fast || fixup.fail_fast,
            patch_dirs,
            modules_dir: cli.modules_dir.or(fixup.modules_dir),
            strict: cli.strict || self.config.registration.strict,
        }
    }
}
