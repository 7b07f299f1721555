//! Built-in library rewrite table shared by every module that opts in.

use crate::store::RuleTables;
use blobfix_types::rules::{LibRewriteRule, RewriteAction};
use std::sync::OnceLock;

pub const LIBS_PROTO_3_9_1: [&str; 2] = ["libprotobuf-cpp-full-3.9.1", "libprotobuf-cpp-lite-3.9.1"];

pub const LIBS_PROTO_21_12: [&str; 2] = ["libprotobuf-cpp-full-21.12", "libprotobuf-cpp-lite-21.12"];

pub const LIBS_CLANG_RT_UBSAN: [&str; 2] = [
    "libclang_rt.ubsan_standalone-arm-android",
    "libclang_rt.ubsan_standalone-aarch64-android",
];

pub fn base_lib_rules() -> Vec<LibRewriteRule> {
    vec![
        LibRewriteRule::new(
            LIBS_CLANG_RT_UBSAN,
            RewriteAction::StripSuffix {
                suffixes: vec!["-arm-android".into(), "-aarch64-android".into()],
            },
        ),
        LibRewriteRule::new(
            LIBS_PROTO_3_9_1,
            RewriteAction::Suffix {
                suffix: "-vendorcompat".into(),
                partitions: None,
            },
        ),
        LibRewriteRule::new(LIBS_PROTO_21_12, RewriteAction::StripVersionSuffix),
    ]
}

/// Shared instance of the base table.
pub fn base_tables() -> &'static RuleTables {
    static BASE: OnceLock<RuleTables> = OnceLock::new();
    BASE.get_or_init(|| RuleTables::new(vec![], base_lib_rules(), vec![]))
}
