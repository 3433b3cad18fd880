//! The dump engine.
//!
//! Extracts the logical contents of a document store into a directory tree,
//! a single archive stream, or standard output. The orchestrator drives the
//! phases (probe, plan, metadata, users/roles, parallel collection dump,
//! oplog capture, prelude); everything server-side goes through the
//! [`client::Source`] seam.

mod dumper;
mod intent;
mod manager;
mod oplog;
mod orchestrator;
mod plan;
mod query;
mod shutdown;
mod sink;

pub use dumper::DumpContext;
pub use intent::Intent;
pub use manager::{FinalizePolicy, IntentManager};
pub use orchestrator::Orchestrator;
pub use shutdown::ShutdownNotifier;
pub use sink::{DocStream, OutputSink};
