use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One scheduled callback with an absolute deadline.
///
/// Cloning a timer is cheap and the clone shares the original's identity:
/// a clone handed to [`crate::TimerRegistry::detach`] cancels the timer it
/// was cloned from.
#[derive(Clone)]
pub struct Timer {
    deadline: Instant,
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl Timer {
    /// Schedule `cb` to fire `delay` from now.
    pub fn after(delay: Duration, cb: impl Fn() + Send + Sync + 'static) -> Self {
        Self::at(Instant::now() + delay, cb)
    }

    /// Schedule `cb` at an absolute deadline.
    pub fn at(deadline: Instant, cb: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            deadline,
            callback: Arc::new(cb),
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Invoke the callback.
    pub fn fire(&self) {
        (self.callback)();
    }

    /// Same deadline and same shared callback: the clone relation.
    pub fn same_identity(&self, other: &Timer) -> bool {
        self.deadline == other.deadline && Arc::ptr_eq(&self.callback, &other.callback)
    }
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_fire_and_identity() {
        let hits = Arc::new(AtomicU32::new(0));
        let h = hits.clone();
        let t = Timer::after(Duration::from_millis(1), move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        let clone = t.clone();
        assert!(t.same_identity(&clone));
        t.fire();
        clone.fire();
        assert_eq!(hits.load(Ordering::SeqCst), 2);

        let other = Timer::at(t.deadline(), || {});
        assert!(!t.same_identity(&other));
    }
}
