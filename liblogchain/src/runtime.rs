/*
 * Background runtime
 *
 * All background work (async queue drain, buffer flush timers, robot
 * delivery workers, HTTP requests) runs on one lazily created multi-threaded
 * Tokio runtime owned by the library. Producers never need a runtime of
 * their own, and may call in from inside someone else's runtime.
 */

use once_cell::sync::OnceCell;
use std::future::Future;
use tokio::runtime::Runtime;

use crate::error::LogError;

static RUNTIME: OnceCell<Runtime> = OnceCell::new();

/// Returns the shared runtime, starting it on first use.
pub(crate) fn runtime() -> Result<&'static Runtime, LogError> {
    RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("liblogchain-bg")
            .enable_all()
            .build()
            .map_err(|e| LogError::Runtime(format!("failed to start background runtime: {}", e)))
    })
}

/// Parks the calling thread until `future` resolves.
///
/// Unlike `Runtime::block_on` this is allowed from within an async context,
/// which matters because producers may live on anyone's runtime. Only use it
/// on futures driven by the shared runtime (join handles, channels).
pub(crate) fn wait<F: Future>(future: F) -> F::Output {
    futures::executor::block_on(future)
}
