//! Shared DTOs (schemas-as-code) for the blobfix workspace.
//!
//! # Design constraints
//! - Rule types are deserialized from hand-written module files, so they stay tolerant:
//!   optional fields default, variants are tagged by `type`.
//! - Report types are serialized to disk. Prefer adding optional fields over changing semantics.

pub mod module;
pub mod ops;
pub mod path;
pub mod report;
pub mod rules;

/// Schema identifiers.
pub mod schema {
    pub const BLOBFIX_FIXUP_V1: &str = "blobfix.fixup.v1";
    pub const BLOBFIX_MODULE_V1: &str = "blobfix.module.v1";
}
