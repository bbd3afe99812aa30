//! Bounded fan-out over scoped worker threads.

use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use parking_lot::Mutex;
use tracing::warn;

use crate::error::{HistoryError, Result};

/// Run `work` over `items` on `concurrency` threads, summing the error
/// counts it returns. Every item is attempted regardless of earlier failures.
pub(crate) fn for_each_parallel<I, F>(concurrency: usize, items: I, work: F) -> Result<u32>
where
    I: IntoIterator,
    I::IntoIter: Send,
    F: Fn(I::Item) -> u32 + Sync,
{
    if concurrency == 0 {
        return Err(HistoryError::ZeroConcurrency);
    }
    let queue = Mutex::new(items.into_iter());
    let errors = AtomicU32::new(0);

    thread::scope(|s| {
        for _ in 0..concurrency {
            s.spawn(|| loop {
                let next = queue.lock().next();
                let Some(item) = next else {
                    break;
                };
                errors.fetch_add(work(item), Ordering::Relaxed);
            });
        }
    });
    Ok(errors.into_inner())
}

/// Log a failed item and count it.
pub(crate) fn note_error<T>(result: Result<T>) -> u32 {
    match result {
        Ok(_) => 0,
        Err(e) => {
            warn!(error = %e, "Error");
            1
        }
    }
}
