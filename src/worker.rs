//! Named worker threads with bounded shutdown.

use std::io;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

pub(crate) fn spawn_named<F, T>(name: &str, f: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new().name(name.to_string()).spawn(f)
}

/// Wait up to `timeout` for a worker to finish.
///
/// Returns false when the deadline passed; the thread is left detached and
/// exits on its own once it observes its stop flag.
pub(crate) fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) -> bool {
    let name = handle.thread().name().unwrap_or("worker").to_string();
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            log::warn!("{name} thread did not stop within {timeout:?}; detaching");
            return false;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    if handle.join().is_err() {
        log::error!("{name} thread panicked");
    }
    true
}
