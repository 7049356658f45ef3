//! ocipull command-line front end.
//!
//! Wires argument parsing, tracing and the pull pipeline on top of
//! `ocipull-oci`. The binary in `main.rs` is a thin wrapper around [`pipeline::run`].

#![allow(missing_docs)]

pub mod cli;
pub mod config;
pub mod errors;
pub mod pipeline;
pub mod progress;
pub mod tracing;

pub use config::PullConfig;
pub use errors::PipelineError;
pub use pipeline::{PullSummary, run};
