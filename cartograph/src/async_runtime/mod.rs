use std::future::Future;
use std::sync::LazyLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;

const WORKER_THREADS: usize = 2;

static WORKERS: LazyLock<Option<Runtime>> = LazyLock::new(|| {
    Builder::new_multi_thread()
        .worker_threads(WORKER_THREADS)
        .thread_name("cartograph-worker")
        .enable_all()
        .build()
        .map_err(|err| log::error!("Failed to start worker runtime: {err}"))
        .ok()
});

/// Runs the future on the tokio runtime of the calling context, or on the crate worker pool if
/// there is none.
///
/// Returns `None` if the worker pool could not be started.
pub fn spawn<T>(future: T) -> Option<JoinHandle<T::Output>>
where
    T: Future + Send + 'static,
    T::Output: Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => WORKERS.as_ref().map(|runtime| runtime.spawn(future)),
    }
}
