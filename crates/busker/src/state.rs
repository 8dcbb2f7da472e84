//! Opt-in guarded state for app instances.
//!
//! The runtime never locks app state. Tools that share mutable state across
//! concurrent calls wrap it in one of these.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

/// A value behind a mutex. A panicking tool does not poison it for others.
#[derive(Debug, Default)]
pub struct Guarded<T> {
    inner: Mutex<T>,
}

impl<T> Guarded<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with exclusive access.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.lock())
    }
}

/// Append-only log shared by concurrent calls.
#[derive(Debug)]
pub struct SharedLog<T> {
    entries: Guarded<Vec<T>>,
}

impl<T> Default for SharedLog<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SharedLog<T> {
    pub fn new() -> Self {
        Self {
            entries: Guarded::new(Vec::new()),
        }
    }

    /// Append and return the new length.
    pub fn append(&self, entry: T) -> usize {
        self.entries.with(|v| {
            v.push(entry);
            v.len()
        })
    }

    pub fn len(&self) -> usize {
        self.entries.with(|v| v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> SharedLog<T> {
    pub fn snapshot(&self) -> Vec<T> {
        self.entries.with(|v| v.clone())
    }
}

/// One helper command a tool ran.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRecord {
    pub command: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub elapsed: Duration,
    pub at: SystemTime,
}

/// Commands run on behalf of one app instance.
pub type CommandHistory = SharedLog<CommandRecord>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn concurrent_appends_are_all_kept() {
        let log = Arc::new(SharedLog::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let log = Arc::clone(&log);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        log.append((t, i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let entries = log.snapshot();
        assert_eq!(entries.len(), 800);
        for t in 0..8 {
            let mine: Vec<_> = entries.iter().filter(|(who, _)| *who == t).map(|(_, i)| *i).collect();
            assert_eq!(mine, (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn panic_while_holding_does_not_poison() {
        let guarded = Arc::new(Guarded::new(0u32));
        let g = Arc::clone(&guarded);
        let _ = std::thread::spawn(move || {
            g.with(|n| {
                *n += 1;
                panic!("tool blew up");
            })
        })
        .join();

        assert_eq!(guarded.with(|n| *n), 1);
    }
}
