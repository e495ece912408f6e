/*
 * Panic supervision for background tasks
 *
 * A background loop that panics (usually because a handler panicked) is
 * logged and started again instead of silently taking the pipeline down.
 * The loop body keeps its state in the closure captures, so whatever was in
 * flight at the time of the panic is lost and everything still queued is
 * picked up by the restarted loop.
 */

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Duration;

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Runs `task` until it returns normally, restarting it after every panic.
pub(crate) fn supervise_blocking<F>(name: &str, mut task: F)
where
    F: FnMut(),
{
    loop {
        match catch_unwind(AssertUnwindSafe(&mut task)) {
            Ok(()) => return,
            Err(payload) => {
                tracing::error!(
                    task = name,
                    panic = %panic_message(payload.as_ref()),
                    "background task panicked, restarting"
                );
            }
        }
    }
}

/// Async flavour of [`supervise_blocking`]; waits `restart_delay` before
/// each restart.
pub(crate) async fn supervise_async<F, Fut>(name: &str, restart_delay: Duration, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        match AssertUnwindSafe(task()).catch_unwind().await {
            Ok(()) => return,
            Err(payload) => {
                tracing::error!(
                    task = name,
                    panic = %panic_message(payload.as_ref()),
                    delay_ms = restart_delay.as_millis() as u64,
                    "background task panicked, restarting"
                );
                if !restart_delay.is_zero() {
                    tokio::time::sleep(restart_delay).await;
                }
            }
        }
    }
}
