//! Concurrency-limited parallel iteration utilities.
//!
//! Wraps rayon's `par_iter` to process independent work items while capping
//! how many are in flight at once. Output order always matches input order,
//! regardless of the order in which workers finish.

use rayon::prelude::*;

/// Maps `f` over `items` in parallel, with at most `max_concurrent` items in flight.
///
/// Semantically equivalent to `items.par_iter().map(f).collect()`.
///
/// # Panics
///
/// Panics if `max_concurrent` is 0.
pub fn par_map_limited<T, R, F>(items: &[T], max_concurrent: usize, f: F) -> Vec<R>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    assert!(max_concurrent > 0, "max_concurrent must be > 0");

    let mut results = Vec::with_capacity(items.len());
    for chunk in items.chunks(max_concurrent) {
        let chunk_results: Vec<R> = chunk.par_iter().map(&f).collect();
        results.extend(chunk_results);
    }
    results
}

/// Number of items to keep in flight for `len` items: every rayon worker busy,
/// capped by `len`.
pub fn default_concurrency(len: usize) -> usize {
    rayon::current_num_threads().max(1).min(len.max(1))
}
