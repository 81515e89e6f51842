//! Combined, idempotent cleanup of dialed connections.

use parking_lot::Mutex;
use std::fmt;
use std::mem;

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Releases every connection it has collected, at most once.
///
/// Calling [`Release::release`] runs the collected closures in the order they were added and
/// empties the guard, so later calls do nothing. Dropping the guard performs the release as
/// well: a `Release` that goes out of scope never leaks a connection.
///
/// Keep the guard alive for as long as the connections are in use.
#[must_use = "dropping a Release closes its connections immediately"]
#[derive(Default)]
pub struct Release {
    pending: Mutex<Vec<ReleaseFn>>,
}

impl Release {
    /// A guard that owns nothing.
    pub fn noop() -> Self {
        Self::default()
    }

    pub(crate) fn from_fn(f: impl FnOnce() + Send + 'static) -> Self {
        Self { pending: Mutex::new(vec![Box::new(f)]) }
    }

    /// Moves every pending closure of `other` into this guard.
    pub fn absorb(&mut self, other: Self) {
        let taken = mem::take(&mut *other.pending.lock());
        self.pending.get_mut().extend(taken);
    }

    /// Number of closures still waiting to run.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }

    /// Runs every pending closure once. Safe to call repeatedly and from any thread.
    pub fn release(&self) {
        let pending = mem::take(&mut *self.pending.lock());
        for f in pending {
            f();
        }
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Release").field("pending", &self.pending()).finish()
    }
}
