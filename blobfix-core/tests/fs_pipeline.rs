//! End-to-end fixup runs over a temp directory tree.

use blobfix_core::adapters::{FsBlobSource, FsWritePort, NullWritePort};
use blobfix_core::ports::BlobSource;
use blobfix_core::settings::FixupSettings;
use blobfix_core::{ToolError, run_fixups, write_fixup_artifacts};
use blobfix_domain::{Module, Registrar, RegistrationPolicy, parse_module_file};
use blobfix_edit::FixupEngine;
use blobfix_types::report::{FileStatus, ToolInfo};
use camino::Utf8PathBuf;
use fs_err as fs;
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const TELEPHONY: &str = "system_ext/etc/permissions/moto-telephony.xml";
const TELEPHONY_XML: &str = "<library name=\"moto-telephony\" file=\"/system/framework/moto-telephony.jar\"/>\n";

fn module() -> Module {
    let file = parse_module_file(include_str!("../../modules/motorola/sm8475-common.toml"))
        .expect("parse module");
    Registrar::new(RegistrationPolicy::Strict)
        .register_file(file)
        .expect("register module")
}

fn tool() -> ToolInfo {
    ToolInfo {
        name: "blobfix".into(),
        version: None,
    }
}

fn tree() -> (TempDir, Utf8PathBuf) {
    let temp = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf()).expect("utf8");
    let src = root.join("src");
    fs::create_dir_all(src.join("system_ext/etc/permissions")).unwrap();
    fs::create_dir_all(src.join("vendor/lib64")).unwrap();
    fs::write(src.join(TELEPHONY), TELEPHONY_XML).unwrap();
    fs::write(src.join("vendor/lib64/libmotext_inf.so"), b"\x7fELF truncated").unwrap();
    fs::write(src.join("vendor/lib64/libunrelated.so"), b"opaque").unwrap();
    (temp, root)
}

#[test]
fn fixes_tree_into_output_root() {
    let (_temp, root) = tree();
    let settings = FixupSettings {
        out_root: Some(root.join("out")),
        jobs: Some(2),
        ..FixupSettings::new(root.join("src"))
    };

    let outcome = run_fixups(
        &settings,
        &module(),
        &FixupEngine::default(),
        &FsBlobSource::new(root.join("src")),
        &FsWritePort,
        tool(),
    )
    .expect("run fixups");

    let statuses: Vec<(&str, FileStatus)> = outcome
        .report
        .files
        .iter()
        .map(|f| (f.path.as_str(), f.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            (TELEPHONY, FileStatus::Fixed),
            ("vendor/lib64/libmotext_inf.so", FileStatus::Failed),
            ("vendor/lib64/libunrelated.so", FileStatus::NoRule),
        ]
    );

    assert_eq!(
        fs::read_to_string(root.join("out").join(TELEPHONY)).unwrap(),
        TELEPHONY_XML.replace("/system/", "/system_ext/")
    );
    assert_eq!(
        fs::read(root.join("out/vendor/lib64/libmotext_inf.so")).unwrap(),
        b"\x7fELF truncated"
    );
    assert_eq!(
        fs::read(root.join("out/vendor/lib64/libunrelated.so")).unwrap(),
        b"opaque"
    );
    // The source tree is never touched when an output root is set.
    assert_eq!(
        fs::read_to_string(root.join("src").join(TELEPHONY)).unwrap(),
        TELEPHONY_XML
    );
    assert!(
        outcome
            .report
            .unmatched_rules
            .contains(&"vendor/bin/qcc-trd".to_string())
    );

    let report_path = root.join("reports/fixup.json");
    write_fixup_artifacts(&outcome, &report_path, &FsWritePort).unwrap();
    let value: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&report_path).unwrap()).unwrap();
    assert_eq!(value["summary"]["failed"], 1);
    assert!(
        fs::read_to_string(root.join("reports/patch.diff"))
            .unwrap()
            .contains("+<library name=\"moto-telephony\" file=\"/system_ext/framework")
    );
}

#[test]
fn fail_fast_still_writes_every_file() {
    let (_temp, root) = tree();
    let settings = FixupSettings {
        out_root: Some(root.join("out")),
        fail_fast: true,
        ..FixupSettings::new(root.join("src"))
    };

    let err = run_fixups(
        &settings,
        &module(),
        &FixupEngine::default(),
        &FsBlobSource::new(root.join("src")),
        &FsWritePort,
        tool(),
    )
    .unwrap_err();
    assert!(matches!(err, ToolError::FixupFailed(_)));
    assert!(root.join("out/vendor/lib64/libunrelated.so").exists());
}

#[test]
fn dry_run_leaves_tree_alone() {
    let (_temp, root) = tree();
    let settings = FixupSettings {
        dry_run: true,
        ..FixupSettings::new(root.join("src"))
    };

    let outcome = run_fixups(
        &settings,
        &module(),
        &FixupEngine::default(),
        &FsBlobSource::new(root.join("src")),
        &NullWritePort,
        tool(),
    )
    .unwrap();
    assert_eq!(outcome.report.summary.fixed, 1);
    assert_eq!(
        fs::read_to_string(root.join("src").join(TELEPHONY)).unwrap(),
        TELEPHONY_XML
    );
}

#[cfg(unix)]
#[test]
fn links_are_copied_verbatim_and_never_followed() {
    use std::os::unix::fs::symlink;

    let (_temp, root) = tree();
    let src = root.join("src");
    fs::write(src.join("vendor/lib64/libreal.so"), b"real").unwrap();
    symlink("libreal.so", src.join("vendor/lib64/liblink.so")).unwrap();
    symlink("lib64", src.join("vendor/lib")).unwrap();

    let source = FsBlobSource::new(src.clone());
    let listed = source.list().unwrap();
    assert!(listed.iter().all(|p| !p.starts_with("vendor/lib/")));
    assert!(listed.contains(&"vendor/lib64/libreal.so".to_string()));
    assert!(!listed.contains(&"vendor/lib64/liblink.so".to_string()));

    let settings = FixupSettings {
        out_root: Some(root.join("out")),
        ..FixupSettings::new(src)
    };
    let outcome = run_fixups(
        &settings,
        &module(),
        &FixupEngine::default(),
        &source,
        &FsWritePort,
        tool(),
    )
    .unwrap();
    assert_eq!(outcome.report.summary.files_total, 4);

    let out = root.join("out");
    let link = fs::symlink_metadata(out.join("vendor/lib64/liblink.so")).unwrap();
    assert!(link.file_type().is_symlink());
    assert_eq!(
        fs::read_link(out.join("vendor/lib64/liblink.so")).unwrap(),
        std::path::PathBuf::from("libreal.so")
    );
    let dir_link = fs::symlink_metadata(out.join("vendor/lib")).unwrap();
    assert!(dir_link.file_type().is_symlink());
    assert_eq!(fs::read(out.join("vendor/lib/libreal.so")).unwrap(), b"real");

    // A second run over the same output replaces the links instead of failing.
    run_fixups(
        &settings,
        &module(),
        &FixupEngine::default(),
        &source,
        &FsWritePort,
        tool(),
    )
    .unwrap();
    assert!(
        fs::symlink_metadata(out.join("vendor/lib"))
            .unwrap()
            .file_type()
            .is_symlink()
    );
}

#[test]
fn root_with_glob_metacharacters_is_listed() {
    let temp = TempDir::new().expect("temp dir");
    let root = Utf8PathBuf::from_path_buf(temp.path().to_path_buf())
        .expect("utf8")
        .join("dump[1]");
    fs::create_dir_all(root.join("vendor/lib64")).unwrap();
    fs::write(root.join("vendor/lib64/liba.so"), b"a").unwrap();

    assert_eq!(
        FsBlobSource::new(root).list().unwrap(),
        vec!["vendor/lib64/liba.so"]
    );
}
