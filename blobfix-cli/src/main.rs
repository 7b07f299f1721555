mod config;

use anyhow::Context;
use blobfix_core::adapters::{FsBlobSource, FsWritePort, NullWritePort};
use blobfix_core::ports::WritePort;
use blobfix_core::settings::FixupSettings;
use blobfix_core::{
    FixupRunOutcome, RewriteRequest, ToolError, run_fixups, run_rewrites, write_fixup_artifacts,
};
use blobfix_domain::{
    FsModuleSource, Module, ModuleRegistry, Registrar, RegistrarError, RegistrationPolicy,
    RegistrationWarning, read_module_file,
};
use blobfix_edit::{
    ApktoolPatcher, DirPatchSets, EditorChoice, FixupEngine, StructuredPatcher,
    UnavailablePatcher,
};
use blobfix_types::report::ToolInfo;
use blobfix_types::rules::{Partition, RewriteOutcome};
use camino::{Utf8Path, Utf8PathBuf};
use clap::{Parser, Subcommand};
use config::{CliOverrides, ConfigMerger, MergedConfig};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "blobfix",
    version,
    about = "Rule-table driven library renaming and fixups for extracted vendor blobs."
)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a module's fixup chains over an extracted blob tree.
    Fixup(FixupArgs),
    /// Show how a module renames libraries for a partition.
    Rewrite(RewriteArgs),
    /// Register a module and report duplicate or shadowed rules.
    Check(CheckArgs),
    /// Print every rule a module resolves to, layer by layer.
    ListRules(ListRulesArgs),
}

#[derive(Debug, Parser)]
struct ModuleArgs {
    /// Module definition file.
    #[arg(long)]
    module: Utf8PathBuf,

    /// Directory of module files used to resolve namespace imports.
    #[arg(long)]
    modules_dir: Option<Utf8PathBuf>,

    /// Reject duplicate rule keys and fixup paths.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[derive(Debug, Parser)]
struct FixupArgs {
    #[command(flatten)]
    module: ModuleArgs,

    /// Extracted blob tree.
    #[arg(long)]
    src: Utf8PathBuf,

    /// Output tree (default: fix the source tree in place).
    #[arg(long)]
    out: Option<Utf8PathBuf>,

    /// Directory holding patch sets as `<id>/*.patch`. Repeatable; earlier wins.
    #[arg(long = "patches")]
    patches: Vec<Utf8PathBuf>,

    /// Dependency editor backend.
    #[arg(long)]
    editor: Option<EditorChoice>,

    /// Worker threads.
    #[arg(long)]
    jobs: Option<usize>,

    /// Report what would change without writing blobs.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Exit with code 2 when any file fails its chain.
    #[arg(long, default_value_t = false)]
    fail_fast: bool,

    /// Write the JSON report (and patch.diff beside it) here.
    #[arg(long)]
    report: Option<Utf8PathBuf>,
}

#[derive(Debug, Parser)]
struct RewriteArgs {
    #[command(flatten)]
    module: ModuleArgs,

    /// Library names to rewrite.
    #[arg(required = true)]
    libs: Vec<String>,

    /// Partition the libraries are installed to.
    #[arg(long)]
    partition: Partition,

    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Parser)]
struct CheckArgs {
    #[command(flatten)]
    module: ModuleArgs,
}

#[derive(Debug, Parser)]
struct ListRulesArgs {
    #[command(flatten)]
    module: ModuleArgs,

    /// Output format (text, json).
    #[arg(long, value_enum, default_value = "text")]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    match real_main() {
        Ok(code) => code,
        Err(e) => {
            error!("{:?}", e);
            eprintln!("error: {e:#}");
            if e.downcast_ref::<RegistrarError>().is_some() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn real_main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let file_config =
        config::load_or_default(Utf8Path::new(".")).context("load blobfix.toml config")?;
    let merger = ConfigMerger::new(file_config);

    match cli.cmd {
        Command::Fixup(args) => {
            let merged = merger.merge(CliOverrides {
                editor: args.editor,
                jobs: args.jobs,
                fail_fast: args.fail_fast,
                patch_dirs: args.patches.clone(),
                modules_dir: args.module.modules_dir.clone(),
                strict: args.module.strict,
            });
            cmd_fixup(args, merged)
        }
        Command::Rewrite(args) => {
            let merged = merger.merge(module_overrides(&args.module));
            cmd_rewrite(args, merged)
        }
        Command::Check(args) => {
            let merged = merger.merge(module_overrides(&args.module));
            cmd_check(args, merged)
        }
        Command::ListRules(args) => {
            let merged = merger.merge(module_overrides(&args.module));
            cmd_list_rules(args, merged)
        }
    }
}

fn module_overrides(args: &ModuleArgs) -> CliOverrides {
    CliOverrides {
        modules_dir: args.modules_dir.clone(),
        strict: args.strict,
        ..Default::default()
    }
}

/// Register the module file and layer in whatever its imports resolve to.
fn load_module(path: &Utf8Path, merged: &MergedConfig) -> anyhow::Result<Module> {
    let policy = if merged.strict {
        RegistrationPolicy::Strict
    } else {
        RegistrationPolicy::Lenient
    };
    let registrar = Registrar::new(policy);

    let file = read_module_file(path)?;
    let module = registrar
        .register_file(file)
        .with_context(|| format!("register module {}", path))?;

    let registry = match &merged.modules_dir {
        Some(dir) => ModuleRegistry::load(&FsModuleSource::new(dir.clone()), &registrar)
            .with_context(|| format!("load modules from {}", dir))?,
        None => ModuleRegistry::new(),
    };
    let module = registry.resolve_module(&module);

    for warning in module.warnings() {
        match warning {
            // Imports often name build namespaces that carry no extraction rules.
            RegistrationWarning::UnresolvedImport { .. } => debug!("{warning}"),
            _ => warn!("{warning}"),
        }
    }
    debug!(
        module = %module.namespace(),
        layers = module.layers().len(),
        "loaded module"
    );
    Ok(module)
}

fn cmd_fixup(args: FixupArgs, merged: MergedConfig) -> anyhow::Result<ExitCode> {
    let module = load_module(&args.module.module, &merged)?;

    let patcher: Arc<dyn StructuredPatcher> = match ApktoolPatcher::locate() {
        Some(apktool) => Arc::new(apktool),
        None => Arc::new(UnavailablePatcher),
    };
    let engine = FixupEngine::builder()
        .needed_editor(
            merged
                .editor
                .build()
                .with_context(|| format!("set up {} editor", merged.editor))?,
        )
        .patch_sets(Arc::new(DirPatchSets::new(merged.patch_dirs.clone())))
        .structured_patcher(patcher)
        .build();
    debug!(engine = ?engine, "fixup engine ready");

    let settings = FixupSettings {
        out_root: args.out,
        jobs: merged.jobs,
        dry_run: args.dry_run,
        fail_fast: merged.fail_fast,
        ..FixupSettings::new(args.src.clone())
    };
    let source = FsBlobSource::new(args.src);
    let writer: &dyn WritePort = if settings.dry_run {
        &NullWritePort
    } else {
        &FsWritePort
    };

    let (outcome, code) = match run_fixups(
        &settings,
        &module,
        &engine,
        &source,
        writer,
        tool_info(),
    ) {
        Ok(outcome) => (outcome, ExitCode::SUCCESS),
        Err(err) => {
            let code = ExitCode::from(err.exit_code());
            match err {
                ToolError::FixupFailed(outcome) => (*outcome, code),
                ToolError::Internal(e) => return Err(e),
            }
        }
    };

    if let Some(report) = &args.report {
        write_fixup_artifacts(&outcome, report, &FsWritePort)?;
        info!("wrote report to {}", report);
    }
    print_summary(&outcome);
    Ok(code)
}

fn print_summary(outcome: &FixupRunOutcome) {
    for file in &outcome.report.files {
        if let Some(message) = &file.message {
            println!("FAILED {}: {}", file.path, message);
        }
    }
    for path in &outcome.report.unmatched_rules {
        println!("missing {}", path);
    }
    let s = &outcome.report.summary;
    println!(
        "{} files: {} fixed, {} unchanged, {} without rules, {} failed{}",
        s.files_total,
        s.fixed,
        s.unchanged,
        s.no_rule,
        s.failed,
        if outcome.report.dry_run { " (dry run)" } else { "" }
    );
}

fn cmd_rewrite(args: RewriteArgs, merged: MergedConfig) -> anyhow::Result<ExitCode> {
    let module = load_module(&args.module.module, &merged)?;
    let requests: Vec<RewriteRequest> = args
        .libs
        .iter()
        .map(|lib| RewriteRequest::new(lib.as_str(), args.partition))
        .collect();
    let decisions = run_rewrites(&module, &requests);

    match args.format {
        OutputFormat::Text => {
            for d in &decisions {
                match &d.outcome {
                    RewriteOutcome::Renamed(name) => println!("{} -> {}", d.library, name),
                    RewriteOutcome::Removed => println!("{} removed", d.library),
                    RewriteOutcome::Unchanged => println!("{} unchanged", d.library),
                }
            }
        }
        OutputFormat::Json => print_json(&decisions)?,
    }
    Ok(ExitCode::SUCCESS)
}

fn cmd_check(args: CheckArgs, merged: MergedConfig) -> anyhow::Result<ExitCode> {
    let module = load_module(&args.module.module, &merged)?;

    for warning in module.warnings() {
        println!("warning: {}", warning);
    }
    let lib_rules: usize = module
        .layers()
        .iter()
        .map(|l| l.tables.lib_rules().len())
        .sum();
    println!(
        "ok: {} ({} layers, {} lib rules, {} fixup paths)",
        module.namespace(),
        module.layers().len(),
        lib_rules,
        module.fixup_paths().len()
    );
    Ok(ExitCode::SUCCESS)
}

fn cmd_list_rules(args: ListRulesArgs, merged: MergedConfig) -> anyhow::Result<ExitCode> {
    let module = load_module(&args.module.module, &merged)?;

    match args.format {
        OutputFormat::Text => {
            println!(
                "{} ({}/{})",
                module.namespace(),
                module.vendor(),
                module.name()
            );
            for layer in module.layers() {
                println!();
                println!("[{}]", layer.source);
                for (index, rule) in layer.tables.lib_rules().iter().enumerate() {
                    println!(
                        "  lib #{index} {}: {}",
                        rule.action.label(),
                        rule.libs.join(", ")
                    );
                }
                for path in layer.tables.fixup_paths() {
                    let ops = layer.tables.fixup_chain(path).unwrap_or_default();
                    let ops: Vec<String> = ops.iter().map(ToString::to_string).collect();
                    println!("  fixup {path}: {}", ops.join("; "));
                }
            }
        }
        OutputFormat::Json => {
            let layers: Vec<_> = module
                .layers()
                .iter()
                .map(|layer| {
                    serde_json::json!({
                        "source": layer.source,
                        "lib_rewrites": layer.tables.lib_rules(),
                        "blob_fixups": layer.tables.fixup_rules(),
                    })
                })
                .collect();
            print_json(&serde_json::json!({
                "name": module.name(),
                "vendor": module.vendor(),
                "namespace": module.namespace(),
                "layers": layers,
                "warnings": module.warnings(),
            }))?;
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_json<T: serde::Serialize>(v: &T) -> anyhow::Result<()> {
    let s = serde_json::to_string_pretty(v).context("serialize json")?;
    println!("{s}");
    Ok(())
}

fn tool_info() -> ToolInfo {
    ToolInfo {
        name: "blobfix".to_string(),
        version: Some(env!("CARGO_PKG_VERSION").to_string()),
    }
}
