// Timeout enforcement around `BackendClient` calls.
//
// `wire_protocol::BackendClient` trusts implementations to honour their own
// deadline; the Poller does not trust that blindly and wraps every call in
// `tokio::time::timeout` regardless, the same defensive-timeout posture the
// reference receiver takes around its own forwarder RPCs.

use std::future::Future;
use std::time::Duration;
use wire_protocol::BackendError;

/// Races `call` against `timeout`, converting an elapsed deadline into
/// `BackendError::Timeout` so every caller sees a single uniform error type.
pub async fn call_with_timeout<F, T>(timeout: Duration, call: F) -> Result<T, BackendError>
where
    F: Future<Output = Result<T, BackendError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_elapsed) => Err(BackendError::Timeout(timeout)),
    }
}
