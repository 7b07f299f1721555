//! Embeddable core library for blobfix.
//!
//! Provides a clap-free, I/O-abstracted entry point for running a module's fixups over an
//! extracted blob tree.
//!
//! # Port traits
//!
//! All I/O is abstracted behind port traits in [`ports`]:
//! - [`BlobSource`](ports::BlobSource): list and read extracted blobs
//! - [`WritePort`](ports::WritePort): write files and create directories
//!
//! The [`adapters`] module provides filesystem-backed and in-memory implementations.
//!
//! # Entry points
//!
//! - [`run_fixups`](pipeline::run_fixups): fix a blob tree and build a report
//! - [`run_rewrites`](pipeline::run_rewrites): rename decisions for a list of libraries

pub mod adapters;
pub mod pipeline;
pub mod ports;
pub mod settings;

pub use pipeline::{
    FixupRunOutcome, RewriteDecision, RewriteRequest, ToolError, run_fixups, run_rewrites,
    write_fixup_artifacts,
};

// Re-export the domain's module type so callers don't need blobfix-domain directly.
pub use blobfix_domain::Module;
