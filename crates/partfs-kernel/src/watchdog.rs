//! Liveness supervision around long-running operations.
//!
//! Formatting a partition can take longer than a task watchdog allows. The
//! manager suspends supervision for the duration of every engine format
//! through [`WatchdogGuard`], which resumes it on drop, including on error
//! and unwind.

use std::fmt;

/// A liveness supervisor that can be paused.
pub trait Watchdog: Send + Sync {
    /// Stop supervising the calling context.
    fn suspend(&self);

    /// Resume supervision.
    fn resume(&self);
}

/// A watchdog that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn suspend(&self) {}

    fn resume(&self) {}
}

/// Keeps a watchdog suspended while alive.
#[must_use = "the watchdog resumes as soon as the guard is dropped"]
pub struct WatchdogGuard<'a> {
    watchdog: &'a dyn Watchdog,
}

impl<'a> WatchdogGuard<'a> {
    /// Suspend `watchdog` until the guard is dropped.
    pub fn suspend(watchdog: &'a dyn Watchdog) -> Self {
        tracing::debug!("watchdog suspended");
        watchdog.suspend();
        Self { watchdog }
    }
}

impl Drop for WatchdogGuard<'_> {
    fn drop(&mut self) {
        self.watchdog.resume();
        tracing::debug!("watchdog resumed");
    }
}

impl fmt::Debug for WatchdogGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchdogGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI32, Ordering};

    #[derive(Default)]
    struct Depth(AtomicI32);

    impl Watchdog for Depth {
        fn suspend(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }

        fn resume(&self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_guard_resumes_on_drop() {
        let wd = Depth::default();
        {
            let _guard = WatchdogGuard::suspend(&wd);
            assert_eq!(wd.0.load(Ordering::SeqCst), 1);
        }
        assert_eq!(wd.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guard_resumes_on_early_return() {
        fn fallible(wd: &dyn Watchdog, fail: bool) -> Result<(), &'static str> {
            let _guard = WatchdogGuard::suspend(wd);
            if fail {
                return Err("format failed");
            }
            Ok(())
        }

        let wd = Depth::default();
        assert!(fallible(&wd, true).is_err());
        assert!(fallible(&wd, false).is_ok());
        assert_eq!(wd.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_guard_resumes_on_panic() {
        let wd = Depth::default();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = WatchdogGuard::suspend(&wd);
            panic!("engine panicked");
        }));
        assert!(result.is_err());
        assert_eq!(wd.0.load(Ordering::SeqCst), 0);
    }
}
