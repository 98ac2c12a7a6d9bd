//! Bounded concurrency runner
//!
//! A fixed number of cooperative workers pull items from a shared cursor.
//! Everything runs inside the caller's task, so suspension only happens at the
//! awaits inside the worker future.

use futures_util::future::join_all;
use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Mutex;

/// Runs `worker` over every item with at most `limit` invocations in flight
///
/// Every item is attempted exactly once. Results come back in completion
/// order. A panic inside one invocation is logged and that item yields no
/// result; the remaining items are still processed. A `limit` of zero is
/// treated as one.
pub async fn run_bounded<T, R, F, Fut>(items: Vec<T>, limit: usize, worker: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let workers = limit.clamp(1, total);
    let cursor = Mutex::new(items.into_iter());

    let pool = (0..workers).map(|worker_id| {
        let cursor = &cursor;
        let worker = &worker;
        async move {
            let mut results = Vec::new();
            loop {
                // The lock is never held across an await
                let next = match cursor.lock() {
                    Ok(mut guard) => guard.next(),
                    Err(poisoned) => poisoned.into_inner().next(),
                };
                let Some(item) = next else { break };

                match AssertUnwindSafe(worker(item)).catch_unwind().await {
                    Ok(result) => results.push(result),
                    Err(_) => tracing::error!(worker_id, "worker panicked, item skipped"),
                }
            }
            results
        }
    });

    join_all(pool).await.into_iter().flatten().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_never_exceeds_limit() {
        let in_flight = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let completed = AtomicUsize::new(0);

        let items: Vec<u64> = (0..20).collect();
        let results = run_bounded(items, 5, |i| {
            let in_flight = &in_flight;
            let peak = &peak;
            let completed = &completed;
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1 + i % 3)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                completed.fetch_add(1, Ordering::SeqCst);
                i
            }
        })
        .await;

        assert_eq!(completed.load(Ordering::SeqCst), 20);
        assert_eq!(results.len(), 20);
        assert!(peak.load(Ordering::SeqCst) <= 5);
        assert!(peak.load(Ordering::SeqCst) > 1);

        let mut sorted = results;
        sorted.sort_unstable();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panic_does_not_abort_batch() {
        let results = run_bounded(vec![1, 2, 3, 4], 2, |i| async move {
            if i == 2 {
                panic!("boom");
            }
            i * 10
        })
        .await;

        let mut sorted = results;
        sorted.sort_unstable();
        assert_eq!(sorted, vec![10, 30, 40]);
    }

    #[tokio::test]
    async fn test_empty_and_zero_limit() {
        let empty: Vec<u32> = run_bounded(Vec::<u32>::new(), 5, |i| async move { i }).await;
        assert!(empty.is_empty());

        let results = run_bounded(vec![1, 2, 3], 0, |i| async move { i }).await;
        assert_eq!(results, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_errors_are_per_item() {
        let results: Vec<Result<u32, String>> = run_bounded(vec![1, 2, 3], 5, |i| async move {
            if i % 2 == 0 {
                Err(format!("item {} failed", i))
            } else {
                Ok(i)
            }
        })
        .await;

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 2);
        assert_eq!(results.iter().filter(|r| r.is_err()).count(), 1);
    }
}
