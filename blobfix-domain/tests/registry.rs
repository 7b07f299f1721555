use blobfix_domain::{
    FsModuleSource, InMemoryModuleSource, ModuleRegistry, Registrar, RegistrationPolicy,
    RegistrationWarning, RegistryError, RuleSource, TableKind,
};
use blobfix_edit::FixupLookup;
use blobfix_types::module::ModuleFile;
use blobfix_types::ops::FixupOp;
use blobfix_types::rules::{
    BlobFixupRule, LibRewriteRule, NamespaceImport, Partition, RewriteAction, RewriteOutcome,
};
use camino::Utf8PathBuf;
use fs_err as fs;
use pretty_assertions::assert_eq;

fn module_file(namespace: &str, imports: &[&str]) -> ModuleFile {
    let name = namespace.rsplit('/').next().unwrap_or(namespace).to_string();
    ModuleFile {
        schema: None,
        name,
        vendor: "qcom".into(),
        namespace: Some(namespace.into()),
        namespace_imports: imports.iter().map(|i| NamespaceImport::new(*i)).collect(),
        inherit_base_lib_rewrites: true,
        lib_rewrites: vec![],
        blob_fixups: vec![],
    }
}

fn rename(lib: &str, to: &str) -> LibRewriteRule {
    LibRewriteRule::new(
        [lib],
        RewriteAction::Rename {
            to: to.into(),
            partitions: None,
        },
    )
}

/// device imports two HAL trees; both define `libshared`, and the device overrides `libdevice`.
fn registry() -> ModuleRegistry {
    let mut sm8450 = module_file("hardware/qcom-caf/sm8450", &[]);
    sm8450.lib_rewrites = vec![rename("libshared", "libshared-sm8450"), rename("libhal", "libhal-8450")];
    sm8450.blob_fixups = vec![BlobFixupRule::new(
        ["vendor/lib64/libhal.so"],
        vec![FixupOp::remove_needed("libold.so")],
    )];

    let mut wlan = module_file("hardware/qcom-caf/wlan", &["hardware/qcom-caf/sm8450"]);
    wlan.lib_rewrites = vec![
        rename("libshared", "libshared-wlan"),
        rename("libdevice", "libdevice-wlan"),
    ];

    let mut device = module_file(
        "device/motorola/sm8475-common",
        &[
            "device/motorola/sm8475-common",
            "hardware/qcom-caf/sm8450",
            "hardware/qcom-caf/wlan",
            "vendor/qcom/opensource/dataservices",
        ],
    );
    device.lib_rewrites = vec![rename("libdevice", "libdevice-own")];

    let source = InMemoryModuleSource::new()
        .with("sm8450.toml", sm8450)
        .with("wlan.toml", wlan)
        .with("device.toml", device);
    ModuleRegistry::load(&source, &Registrar::default()).expect("load registry")
}

#[test]
fn precedence_is_own_then_later_imports_then_earlier_imports() {
    let module = registry().resolve("device/motorola/sm8475-common").unwrap();

    assert_eq!(
        module.rewrite("libdevice", Partition::Vendor),
        RewriteOutcome::Renamed("libdevice-own".into())
    );
    assert_eq!(
        module.rewrite("libshared", Partition::Vendor),
        RewriteOutcome::Renamed("libshared-wlan".into())
    );
    assert_eq!(
        module.rewrite("libhal", Partition::Vendor),
        RewriteOutcome::Renamed("libhal-8450".into())
    );
    assert_eq!(
        module.rewrite("libprotobuf-cpp-full-21.12", Partition::Vendor),
        RewriteOutcome::Renamed("libprotobuf-cpp-full".into())
    );

    let sources: Vec<String> = module.layers().iter().map(|l| l.source.to_string()).collect();
    assert_eq!(
        sources,
        vec![
            "own",
            "import:hardware/qcom-caf/wlan",
            "import:hardware/qcom-caf/sm8450",
            "base",
        ]
    );
}

#[test]
fn imported_fixups_are_visible() {
    let module = registry().resolve("device/motorola/sm8475-common").unwrap();
    let (source, ops) = module
        .fixup_chain_with_source("vendor/lib64/libhal.so")
        .expect("imported chain");
    assert_eq!(*source, RuleSource::Import("hardware/qcom-caf/sm8450".into()));
    assert_eq!(ops, &[FixupOp::remove_needed("libold.so")][..]);
    assert!(module.fixup_chain("vendor/lib64/libhal.so").is_some());
}

#[test]
fn shadowing_and_unresolved_imports_are_reported() {
    let module = registry().resolve("device/motorola/sm8475-common").unwrap();
    let warnings = module.warnings();

    assert!(warnings.contains(&RegistrationWarning::Shadowed {
        table: TableKind::LibRewrites,
        key: "libshared".into(),
        winner: RuleSource::Import("hardware/qcom-caf/wlan".into()),
        shadowed: RuleSource::Import("hardware/qcom-caf/sm8450".into()),
    }));
    assert!(warnings.contains(&RegistrationWarning::Shadowed {
        table: TableKind::LibRewrites,
        key: "libdevice".into(),
        winner: RuleSource::Own,
        shadowed: RuleSource::Import("hardware/qcom-caf/wlan".into()),
    }));
    assert!(warnings.contains(&RegistrationWarning::UnresolvedImport {
        namespace: "vendor/qcom/opensource/dataservices".into(),
    }));
}

#[test]
fn import_cycles_terminate() {
    let a = module_file("vendor/a", &["vendor/b"]);
    let b = module_file("vendor/b", &["vendor/a"]);
    let source = InMemoryModuleSource::new().with("a.toml", a).with("b.toml", b);
    let registry = ModuleRegistry::load(&source, &Registrar::default()).unwrap();
    let module = registry.resolve("vendor/a").unwrap();
    assert_eq!(module.layers().len(), 3);
}

#[test]
fn unknown_namespace_is_an_error() {
    assert_eq!(
        registry().resolve("device/unknown").unwrap_err(),
        RegistryError::UnknownNamespace("device/unknown".into())
    );
}

#[test]
fn strict_registry_load_names_the_file() {
    let mut bad = module_file("vendor/bad", &[]);
    bad.lib_rewrites = vec![rename("libx", "a"), rename("libx", "b")];
    let source = InMemoryModuleSource::new().with("modules/bad.toml", bad);
    let err = ModuleRegistry::load(&source, &Registrar::new(RegistrationPolicy::Strict))
        .unwrap_err();
    assert!(format!("{err:#}").contains("modules/bad.toml"));
}

#[test]
fn fs_source_reads_nested_module_files() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    fs::create_dir_all(root.join("motorola")).unwrap();
    fs::write(
        root.join("motorola/sm8475-common.toml"),
        include_str!("../../modules/motorola/sm8475-common.toml"),
    )
    .unwrap();
    fs::write(
        root.join("qcom.toml"),
        "name = \"sm8450\"\nvendor = \"qcom\"\nnamespace = \"hardware/qcom-caf/sm8450\"\n",
    )
    .unwrap();

    let registry = ModuleRegistry::load(&FsModuleSource::new(root), &Registrar::default()).unwrap();
    let namespaces: Vec<&str> = registry.namespaces().collect();
    assert_eq!(
        namespaces,
        vec!["device/motorola/sm8475-common", "hardware/qcom-caf/sm8450"]
    );
}

#[test]
fn fs_source_takes_root_literally() {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf())
        .unwrap()
        .join("modules[1]");
    fs::create_dir_all(&root).unwrap();
    fs::write(
        root.join("qcom.toml"),
        "name = \"sm8450\"\nvendor = \"qcom\"\nnamespace = \"hardware/qcom-caf/sm8450\"\n",
    )
    .unwrap();

    let registry = ModuleRegistry::load(&FsModuleSource::new(root), &Registrar::default()).unwrap();
    let namespaces: Vec<&str> = registry.namespaces().collect();
    assert_eq!(namespaces, vec!["hardware/qcom-caf/sm8450"]);
}

#[test]
fn unsupported_schema_is_rejected() {
    let err = blobfix_domain::parse_module_file(
        "schema = \"blobfix.module.v9\"\nname = \"m\"\nvendor = \"v\"\n",
    )
    .unwrap_err();
    assert!(err.to_string().contains("unsupported module schema"));
}
