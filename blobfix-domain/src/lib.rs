//! Domain logic: rule tables, library name rewriting and module registration.
//!
//! This crate owns *which* rules apply to a library or a blob. It does not own *how* blob bytes
//! are edited; that's the `blobfix-edit` crate.

mod base;
mod module;
mod ports;
mod registrar;
mod registry;
mod rewrite;
mod store;

pub use base::{
    LIBS_CLANG_RT_UBSAN, LIBS_PROTO_3_9_1, LIBS_PROTO_21_12, base_lib_rules, base_tables,
};
pub use module::{Module, RegistrationWarning, TableKind};
pub use ports::{
    FsModuleSource, InMemoryModuleSource, LoadedModuleFile, ModuleSource, parse_module_file,
    read_module_file,
};
pub use registrar::{RegistrarError, Registrar, RegistrationPolicy, register_module};
pub use registry::{ModuleRegistry, RegistryError};
pub use rewrite::{RewriteTrace, RuleLayer, RuleRef, RuleSource, apply_action};
pub use store::RuleTables;
