//! Bounded parallel map over independent work items.
//!
//! Each item may be heavy (a whole image pass), so items are dispatched to
//! rayon in windows of `max_concurrent` to cap peak memory.

use rayon::prelude::*;

/// Number of worker slots to use when the caller does not specify one.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Maps `f` over `items` in parallel, with at most `max_concurrent` items in flight.
///
/// Output order matches input order. `None` uses [`default_concurrency`];
/// `Some(0)` is treated as 1.
pub fn par_map_limited<T, R, F>(items: &[T], max_concurrent: Option<usize>, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(usize, &T) -> R + Sync,
{
    let window = max_concurrent.unwrap_or_else(default_concurrency).max(1);

    let mut results = Vec::with_capacity(items.len());
    for (chunk_idx, chunk) in items.chunks(window).enumerate() {
        let base = chunk_idx * window;
        let chunk_results: Vec<R> = chunk
            .par_iter()
            .enumerate()
            .map(|(i, item)| f(base + i, item))
            .collect();
        results.extend(chunk_results);
    }
    results
}
