use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Outcome of a store or chain call that can be interrupted by shutdown signals.
pub(crate) enum HookDecision<T> {
    Finished(anyhow::Result<T>),
    Cancelled,
}

/// Drives `operation` until it finishes or `cancel` fires, whichever comes first.
pub(crate) async fn run_cancellable<T, F>(cancel: &CancellationToken, operation: F) -> HookDecision<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => HookDecision::Cancelled,
        result = operation => HookDecision::Finished(result),
    }
}
