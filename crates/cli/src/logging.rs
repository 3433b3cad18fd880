//! Logging setup.

/// Initialize console logging on standard error. Standard output is
/// reserved for dump data (`--out -` and `--archive -`).
pub fn init_logging() {
  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
    )
    .with_writer(std::io::stderr)
    .init();
}
