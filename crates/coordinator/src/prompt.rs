//! Racing two sources for one blocking decision.
//!
//! Used when a prompt can be answered from more than one place (an
//! operator at the terminal, a queued out-of-band grant, a timeout): both
//! sources run as cancellable futures sharing a result slot; the first to
//! finish wins and the loser is cancelled through the shared token.
//! Losing sources must be side-effect-free on cancellation.

use std::future::Future;

use tokio_util::sync::CancellationToken;

/// Await both sources, return the first finisher's value, and cancel the
/// other through `cancel` (best-effort; the loser observes the token).
pub async fn race_decision<T, A, B>(primary: A, secondary: B, cancel: &CancellationToken) -> Option<T>
where
    A: Future<Output = Option<T>>,
    B: Future<Output = Option<T>>,
{
    let result = tokio::select! {
        result = primary => result,
        result = secondary => result,
    };
    cancel.cancel();
    result
}
