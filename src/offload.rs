use crate::{EgressError, Result};

/// Runs a broker-client call that may block its OS thread (poll, flush) on
/// the tokio blocking pool, suspending only the calling task until the call
/// reports back.
///
/// There is no mid-flight cancellation; the call itself is bounded by the
/// timeout handed to the client, and the caller's loop decides whether to
/// invoke it again.
pub async fn run<F, R>(f: F) -> Result<R>
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| EgressError::Offload(e.to_string()))
}
