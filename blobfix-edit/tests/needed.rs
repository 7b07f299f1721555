mod support;

use blobfix_edit::{
    AutoNeededEditor, ElfNeededEditor, FixupEngine, FixupErrorKind, NeededEditor,
};
use blobfix_types::ops::FixupOp;
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::Arc;
use support::{ElfBuilder, keymint_service, motext_inf};

fn elf_engine() -> FixupEngine {
    FixupEngine::builder()
        .needed_editor(Arc::new(ElfNeededEditor))
        .build()
}

fn needed(bytes: &[u8]) -> Vec<String> {
    ElfNeededEditor.needed(bytes).expect("parse needed")
}

#[test]
fn motext_inf_chain_drops_libril_and_nothing_else() {
    let elf = motext_inf();
    let rules = BTreeMap::from([(
        "vendor/lib64/libmotext_inf.so".to_string(),
        vec![FixupOp::remove_needed("libril.so")],
    )]);

    let out = elf_engine()
        .apply_fixups(&rules, "vendor/lib64/libmotext_inf.so", elf.bytes.clone())
        .expect("fixup");

    assert_eq!(
        needed(&out.bytes),
        vec!["liblog.so", "libc++.so", "libc.so"]
    );
    assert_eq!(out.bytes.len(), elf.bytes.len());
    assert_eq!(elf.outside_dynamic(&out.bytes), elf.outside_dynamic(&elf.bytes));
}

#[test]
fn remove_twice_is_a_no_op_the_second_time() {
    let engine = elf_engine();
    let op = FixupOp::remove_needed("libril.so");
    let once = engine
        .run_chain("vendor/lib64/libmotext_inf.so", motext_inf().bytes, &[op.clone()])
        .expect("first remove");
    let twice = engine
        .run_chain("vendor/lib64/libmotext_inf.so", once.clone(), &[op])
        .expect("second remove");
    assert_eq!(once, twice);
}

#[test]
fn remove_of_absent_entry_leaves_bytes_untouched() {
    let elf = motext_inf();
    let out = elf_engine()
        .run_chain("x.so", elf.bytes.clone(), &[FixupOp::remove_needed("libnope.so")])
        .expect("remove absent");
    assert_eq!(out, elf.bytes);
}

#[test]
fn replace_of_stale_entry_fails() {
    let err = elf_engine()
        .run_chain(
            "vendor/bin/qcc-trd",
            motext_inf().bytes,
            &[
                FixupOp::remove_needed("liblog.so"),
                FixupOp::replace_needed("libgrpc++_unsecure.so", "libgrpc++_unsecure_prebuilt.so"),
            ],
        )
        .unwrap_err();
    assert_eq!(err.path, "vendor/bin/qcc-trd");
    assert_eq!(err.index, 1);
    assert!(matches!(
        err.kind,
        FixupErrorKind::MissingDependencyEntry { ref entry } if entry == "libgrpc++_unsecure.so"
    ));
}

#[test]
fn keymint_chain_rewrites_in_place_and_adds_rkp() {
    let elf = keymint_service(1);
    let chain = vec![
        FixupOp::replace_needed(
            "android.hardware.security.keymint-V1-ndk_platform.so",
            "android.hardware.security.keymint-V1-ndk.so",
        ),
        FixupOp::replace_needed(
            "android.hardware.security.secureclock-V1-ndk_platform.so",
            "android.hardware.security.secureclock-V1-ndk.so",
        ),
        FixupOp::replace_needed(
            "android.hardware.security.sharedsecret-V1-ndk_platform.so",
            "android.hardware.security.sharedsecret-V1-ndk.so",
        ),
        FixupOp::add_needed("android.hardware.security.rkp-V1-ndk.so"),
    ];

    let out = elf_engine()
        .run_chain("vendor/bin/hw/android.hardware.security.keymint-service-qti", elf.bytes.clone(), &chain)
        .expect("keymint chain");

    assert_eq!(
        needed(&out),
        vec![
            "android.hardware.security.keymint-V1-ndk.so",
            "android.hardware.security.secureclock-V1-ndk.so",
            "android.hardware.security.sharedsecret-V1-ndk.so",
            "libbinder_ndk.so",
            "android.hardware.security.rkp-V1-ndk.so",
        ]
    );
    assert_eq!(out.len(), elf.bytes.len());
    assert_eq!(out[elf.dynstr.end..elf.dynamic.start], elf.bytes[elf.dynstr.end..elf.dynamic.start]);
    assert_eq!(out[elf.dynamic.end..], elf.bytes[elf.dynamic.end..]);
}

#[test]
fn add_of_present_entry_is_a_no_op() {
    let elf = motext_inf();
    let out = elf_engine()
        .run_chain("x.so", elf.bytes.clone(), &[FixupOp::add_needed("libc.so")])
        .expect("add present");
    assert_eq!(out, elf.bytes);
}

#[test]
fn add_without_spare_slot_needs_relocation() {
    let elf = keymint_service(0);
    let err = elf_engine()
        .run_chain(
            "x.so",
            elf.bytes,
            &[FixupOp::add_needed("android.hardware.security.rkp-V1-ndk.so")],
        )
        .unwrap_err();
    assert!(matches!(err.kind, FixupErrorKind::InsufficientSpace { .. }));
}

#[test]
fn add_of_unknown_string_needs_relocation() {
    let elf = ElfBuilder::new().needed("libc.so").spare_slots(2).build();
    let err = elf_engine()
        .run_chain("vendor/lib64/libqcodec2_core.so", elf.bytes, &[FixupOp::add_needed("libcodec2_shim.so")])
        .unwrap_err();
    assert!(matches!(err.kind, FixupErrorKind::InsufficientSpace { .. }));
}

#[test]
fn replace_reuses_an_existing_string() {
    let elf = ElfBuilder::new()
        .needed("libgrpc++_unsecure.so")
        .needed("libc.so")
        .string("libgrpc++_unsecure_prebuilt.so")
        .build();
    let out = elf_engine()
        .run_chain(
            "vendor/bin/qcc-trd",
            elf.bytes.clone(),
            &[FixupOp::replace_needed("libgrpc++_unsecure.so", "libgrpc++_unsecure_prebuilt.so")],
        )
        .expect("replace");
    assert_eq!(needed(&out), vec!["libgrpc++_unsecure_prebuilt.so", "libc.so"]);
    // Only the dynamic array moved.
    assert_eq!(elf.outside_dynamic(&out), elf.outside_dynamic(&elf.bytes));
}

#[test]
fn replace_with_longer_missing_name_needs_relocation() {
    let elf = ElfBuilder::new().needed("libgrpc++_unsecure.so").build();
    let err = elf_engine()
        .run_chain(
            "vendor/bin/qcc-trd",
            elf.bytes,
            &[FixupOp::replace_needed("libgrpc++_unsecure.so", "libgrpc++_unsecure_prebuilt.so")],
        )
        .unwrap_err();
    assert!(matches!(err.kind, FixupErrorKind::InsufficientSpace { .. }));
}

#[test]
fn replace_refuses_to_overwrite_a_tail_shared_soname() {
    let elf = ElfBuilder::new()
        .needed("liblog.so")
        .soname("xlibril.so")
        .needed_in_soname_tail("libril.so")
        .build();
    assert_eq!(needed(&elf.bytes), vec!["liblog.so", "libril.so"]);

    let err = elf_engine()
        .run_chain(
            "vendor/lib64/libxril.so",
            elf.bytes,
            &[FixupOp::replace_needed("libril.so", "libx.so")],
        )
        .unwrap_err();
    assert!(matches!(err.kind, FixupErrorKind::InsufficientSpace { .. }));
}

#[test]
fn replace_overwrites_in_place_when_no_string_overlaps() {
    let elf = ElfBuilder::new()
        .needed("liblog.so")
        .needed("libril.so")
        .soname("xlibril.so")
        .build();
    let out = elf_engine()
        .run_chain(
            "vendor/lib64/libxril.so",
            elf.bytes.clone(),
            &[FixupOp::replace_needed("libril.so", "libx.so")],
        )
        .expect("in-place rename");
    assert_eq!(needed(&out), vec!["liblog.so", "libx.so"]);
    assert_eq!(out.len(), elf.bytes.len());
    let dynstr = &out[elf.dynstr.clone()];
    assert!(dynstr.windows(11).any(|w| w == b"xlibril.so\0"));
}

#[test]
fn auto_editor_without_patchelf_reports_in_place_failure() {
    let engine = FixupEngine::builder()
        .needed_editor(Arc::new(AutoNeededEditor::new(None)))
        .build();
    let elf = ElfBuilder::new().needed("libgrpc++_unsecure.so").build();
    let err = engine
        .run_chain(
            "vendor/bin/qcc-trd",
            elf.bytes,
            &[FixupOp::replace_needed("libgrpc++_unsecure.so", "libgrpc++_unsecure_prebuilt.so")],
        )
        .unwrap_err();
    assert_eq!(err.kind.token(), "insufficient_space");
}

#[test]
fn non_elf_input_is_malformed() {
    let err = elf_engine()
        .run_chain("vendor/lib64/libmotext_inf.so", b"not an elf".to_vec(), &[FixupOp::remove_needed("libril.so")])
        .unwrap_err();
    assert!(matches!(err.kind, FixupErrorKind::MalformedBinary { .. }));
}

#[test]
fn patchelf_grows_the_string_table_when_installed() {
    let Some(patchelf) = blobfix_edit::PatchelfEditor::locate() else {
        eprintln!("patchelf not installed; skipping");
        return;
    };
    let engine = FixupEngine::builder()
        .needed_editor(Arc::new(AutoNeededEditor::new(Some(patchelf))))
        .build();
    let elf = ElfBuilder::new().needed("libgrpc++_unsecure.so").build();
    let Ok(out) = engine.run_chain(
        "vendor/bin/qcc-trd",
        elf.bytes,
        &[FixupOp::replace_needed("libgrpc++_unsecure.so", "libgrpc++_unsecure_prebuilt.so")],
    ) else {
        // patchelf refuses some synthetic layouts; the in-process path is covered above.
        return;
    };
    assert_eq!(needed(&out), vec!["libgrpc++_unsecure_prebuilt.so"]);
}
