//! Polling helpers for conditions that become true eventually, such as a
//! guest finishing its boot.

use std::convert::Infallible;
use std::future::Future;
use std::time::Duration;

use log::debug;
use tokio::time::{Instant, sleep};

/// Poll `func` until it yields `Some`, or `timeout` runs out.
///
/// Sleeps `first` before the first attempt and `step` between attempts.
/// The deadline is measured from the call, so a `first` longer than
/// `timeout` means `func` never runs.
pub async fn wait_for<T, F, Fut>(mut func: F, timeout: Duration, first: Duration, step: Duration) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let attempt = || {
        let fut = func();
        async move { Ok::<_, Infallible>(fut.await) }
    };
    match try_wait_for(attempt, timeout, first, step).await {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

/// Like [`wait_for`], but stops at the first error `func` returns.
pub async fn try_wait_for<T, E, F, Fut>(
    mut func: F,
    timeout: Duration,
    first: Duration,
    step: Duration,
) -> Result<Option<T>, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let start = Instant::now();
    let end = start + timeout;

    sleep(first).await;

    while Instant::now() < end {
        debug!("Attempt after {:?}", start.elapsed());
        if let Some(value) = func().await? {
            return Ok(Some(value));
        }
        sleep(step).await;
    }

    debug!("Gave up after {:?}", start.elapsed());
    Ok(None)
}
