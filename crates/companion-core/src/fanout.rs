//! Run independent operations together and collect their outcomes in
//! launch order.

use std::future::Future;

use futures_util::future::join_all;
use tracing::trace;

/// Drive every operation concurrently and return one outcome per operation.
///
/// The outcome at index `i` always belongs to the `i`th operation no matter
/// which finishes first. A failure does not stop the others. An empty input
/// resolves immediately with an empty list.
pub async fn fan_out<I, F, T, E>(operations: I) -> Vec<Result<T, E>>
where
    I: IntoIterator<Item = F>,
    F: Future<Output = Result<T, E>>,
{
    let operations: Vec<F> = operations.into_iter().collect();
    if operations.is_empty() {
        return Vec::new();
    }
    let total = operations.len();
    let outcomes = join_all(operations).await;
    trace!(
        total,
        failed = outcomes.iter().filter(|r| r.is_err()).count(),
        "fan-out complete"
    );
    outcomes
}
