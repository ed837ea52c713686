//! Starting work on a named thread versus calling it directly.

use std::io;
use std::thread::{self, JoinHandle};

/// Name of the calling thread, or `"unnamed"`.
pub fn current_thread_label() -> String {
    thread::current().name().unwrap_or("unnamed").to_string()
}

/// Runs `work` on a new thread called `name`.
pub fn spawn_named<F, T>(name: impl Into<String>, work: F) -> io::Result<JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::Builder::new().name(name.into()).spawn(work)
}

/// Runs `work` on the caller's thread. No thread is created, so the work
/// reports the caller's identity.
pub fn run_inline<F, T>(work: F) -> T
where
    F: FnOnce() -> T,
{
    work()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawned_work_sees_custom_name() {
        let handle = spawn_named("My custom name", current_thread_label).unwrap();
        assert_eq!(handle.join().unwrap(), "My custom name");
    }

    #[test]
    fn test_inline_work_sees_caller_name() {
        assert_eq!(run_inline(current_thread_label), current_thread_label());
    }

    #[test]
    fn test_spawned_thread_without_name() {
        let label = thread::spawn(current_thread_label).join().unwrap();
        assert_eq!(label, "unnamed");
    }
}
