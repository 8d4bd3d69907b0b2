//! Bounded fan-out - run a batch of load operations under a concurrency ceiling.

use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::{BoxFuture, join_all};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CoreError, Result};

/// Default number of operations allowed in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

static CONCURRENCY: AtomicUsize = AtomicUsize::new(DEFAULT_CONCURRENCY);

/// One unit of work handed to [`when_all_bounded`].
pub type LoadOp<'a> = BoxFuture<'a, Result<()>>;

/// Process-wide concurrency limit used by every pack operation.
pub fn concurrency_limit() -> usize {
    CONCURRENCY.load(Ordering::Relaxed)
}

/// Override the process-wide concurrency limit. Values below 1 are raised to 1.
pub fn set_concurrency_limit(limit: usize) {
    let limit = limit.max(1);
    CONCURRENCY.store(limit, Ordering::Relaxed);
    debug!(limit, "Concurrency limit updated");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settled {
    Done,
    Failed,
    Skipped,
}

/// Run `ops` with at most `limit` of them in flight.
///
/// Operations start in submission order as slots free up. Individual failures
/// are logged and otherwise ignored; callers observe them through the side
/// effects of each operation. Once `cancel` fires no further operation is
/// started, in-flight ones are expected to react to the same token, and the
/// returned future fails with [`CoreError::Cancelled`] after everything that
/// did start has settled.
pub async fn when_all_bounded<'a, I>(ops: I, limit: usize, cancel: &CancellationToken) -> Result<()>
where
    I: IntoIterator<Item = LoadOp<'a>>,
{
    let gate = Semaphore::new(limit.max(1));
    let gate = &gate;

    let settled = join_all(ops.into_iter().enumerate().map(|(index, op)| async move {
        let _permit = tokio::select! {
            biased;
            () = cancel.cancelled() => return Settled::Skipped,
            permit = gate.acquire() => match permit {
                Ok(permit) => permit,
                Err(_) => return Settled::Skipped,
            },
        };

        match op.await {
            Ok(()) => Settled::Done,
            Err(e) => {
                debug!(index, error = %e, "Fanned-out operation failed");
                Settled::Failed
            }
        }
    }))
    .await;

    let count = |kind: Settled| settled.iter().filter(|s| **s == kind).count();
    debug!(
        total = settled.len(),
        done = count(Settled::Done),
        failed = count(Settled::Failed),
        skipped = count(Settled::Skipped),
        "Fan-out settled"
    );

    if cancel.is_cancelled() {
        return Err(CoreError::cancelled("bounded fan-out"));
    }
    Ok(())
}
