//! Shared vocabulary for the docdump workspace: namespaces, intent kinds,
//! option types, and the error set every crate reports through.

mod error;
mod ns;
mod options;

pub use error::{Error, Result};
pub use ns::{IntentKind, Namespace};
pub use options::{DumpOptions, InputOptions, OutputOptions, SelectionOptions};
