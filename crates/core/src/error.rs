use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error set surfaced by the dump engine.
#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid options: {0}")]
  InvalidOptions(String),

  #[error("cannot reach server: {0}")]
  Unreachable(String),

  #[error("unsupported on this topology: {0}")]
  TopologyMismatch(String),

  #[error("namespace {0} does not exist")]
  NotFound(String),

  #[error("oplog overflow: unable to capture all oplog entries written during the dump")]
  OplogOverflow,

  #[error("incompatible query: {0}")]
  QueryIncompatible(String),

  #[error("terminated")]
  Terminated,

  #[error("I/O error: {0}")]
  Io(#[from] std::io::Error),

  #[error("internal error: {0}")]
  Internal(String),

  /// A primary failure plus a second failure observed while closing or
  /// flushing the output it was writing to.
  #[error("{primary} (cleanup also failed: {cleanup})")]
  Chained {
    primary: Box<Error>,
    cleanup: Box<Error>,
  },
}

impl Error {
  /// Attach a cleanup failure to an existing error.
  pub fn chain(primary: Error, cleanup: Error) -> Error {
    Error::Chained {
      primary: Box::new(primary),
      cleanup: Box::new(cleanup),
    }
  }

  /// True when this error is cooperative cancellation, possibly buried under
  /// cleanup failures.
  pub fn is_terminated(&self) -> bool {
    match self {
      Error::Terminated => true,
      Error::Chained { primary, .. } => primary.is_terminated(),
      _ => false,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn chained_keeps_terminated_classification() {
    let err = Error::chain(
      Error::Terminated,
      Error::Io(std::io::Error::other("flush failed")),
    );
    assert!(err.is_terminated());
    assert!(!Error::OplogOverflow.is_terminated());
  }

  #[test]
  fn chained_display_mentions_both() {
    let err = Error::chain(
      Error::OplogOverflow,
      Error::Internal("mux exited".into()),
    );
    let text = err.to_string();
    assert!(text.contains("oplog overflow"));
    assert!(text.contains("mux exited"));
  }
}
