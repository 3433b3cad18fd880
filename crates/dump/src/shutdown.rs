//! Single-fire shutdown broadcast.

use tokio_util::sync::CancellationToken;

/// Wires the signal handler to every worker pipeline and the archive
/// multiplexer. The first `notify` fires the broadcast; later calls are
/// no-ops. Observers either poll [`is_fired`](Self::is_fired) or select on
/// [`fired`](Self::fired), which wakes promptly rather than at the next
/// poll interval.
#[derive(Debug, Clone, Default)]
pub struct ShutdownNotifier {
  token: CancellationToken,
}

impl ShutdownNotifier {
  pub fn new() -> Self {
    Self::default()
  }

  /// Fire the broadcast. Idempotent.
  pub fn notify(&self) {
    self.token.cancel();
  }

  pub fn is_fired(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Resolves once the broadcast has fired.
  pub async fn fired(&self) {
    self.token.cancelled().await;
  }

  /// Token handed to the archive multiplexer, which shares the same fire.
  pub fn token(&self) -> CancellationToken {
    self.token.clone()
  }
}
