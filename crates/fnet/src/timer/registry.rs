use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use fnet_core::{NetError, NetResult};

use super::sweeper::{SweepStats, SweeperHandle};
use super::Timer;

/// Deadline-ordered timer set.
///
/// Attached timers are kept sorted by deadline; equal deadlines preserve
/// attachment order. Sweeping detaches every due timer first and fires the
/// callbacks after the lock is released, so a callback may freely re-attach
/// timers (periodic timers reschedule themselves this way).
pub struct TimerRegistry {
    timers: Arc<Mutex<Vec<Timer>>>,
    sweeper: Mutex<Option<SweeperHandle>>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self {
            timers: Arc::new(Mutex::new(Vec::new())),
            sweeper: Mutex::new(None),
        }
    }

    /// Add a timer, keeping the set sorted. A timer whose deadline already
    /// passed fires on the next sweep.
    pub fn attach(&self, timer: Timer) {
        let mut timers = self.timers.lock().unwrap();
        let at = timers.partition_point(|t| t.deadline() <= timer.deadline());
        timers.insert(at, timer);
    }

    /// Remove the first timer sharing `timer`'s identity. Returns whether
    /// anything was removed; detaching an absent timer is a no-op.
    pub fn detach(&self, timer: &Timer) -> bool {
        let mut timers = self.timers.lock().unwrap();
        match timers.iter().position(|t| t.same_identity(timer)) {
            Some(at) => {
                timers.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.timers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.timers.lock().unwrap().is_empty()
    }

    /// Fire every timer whose deadline is at or before now, in deadline
    /// order. Returns the number fired.
    pub fn sweep_now(&self) -> usize {
        sweep(&self.timers)
    }

    /// Spawn the background sweeper thread, sweeping every `interval`.
    ///
    /// At most one sweeper runs per registry; a second start while one is
    /// running fails with [`NetError::SweeperRunning`].
    pub fn start_background_sweep(&self, interval: Duration) -> NetResult<()> {
        let mut slot = self.sweeper.lock().unwrap();
        if slot.is_some() {
            return Err(NetError::SweeperRunning);
        }
        *slot = Some(SweeperHandle::spawn(self.timers.clone(), interval));
        Ok(())
    }

    /// Stop and join the background sweeper, returning its run statistics.
    /// `None` when no sweeper was running.
    pub fn stop_background_sweep(&self) -> Option<SweepStats> {
        self.sweeper.lock().unwrap().take().map(SweeperHandle::shutdown)
    }
}

impl Default for TimerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.stop_background_sweep();
    }
}

/// Detach all due timers under the lock, then fire them outside it.
pub(super) fn sweep(timers: &Mutex<Vec<Timer>>) -> usize {
    let now = Instant::now();
    let due: Vec<Timer> = {
        let mut timers = timers.lock().unwrap();
        let upto = timers.partition_point(|t| t.deadline() <= now);
        timers.drain(..upto).collect()
    };
    for t in &due {
        t.fire();
    }
    due.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn counting_timer(delay: Duration, hits: &Arc<AtomicU32>) -> Timer {
        let h = hits.clone();
        Timer::after(delay, move || {
            h.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_sweep_fires_due_only() {
        let reg = TimerRegistry::new();
        let due = Arc::new(AtomicU32::new(0));
        let future = Arc::new(AtomicU32::new(0));
        reg.attach(counting_timer(Duration::ZERO, &due));
        reg.attach(counting_timer(Duration::from_secs(3600), &future));

        assert_eq!(reg.sweep_now(), 1);
        assert_eq!(due.load(Ordering::SeqCst), 1);
        assert_eq!(future.load(Ordering::SeqCst), 0);
        assert_eq!(reg.len(), 1);

        // A fired timer does not fire again.
        assert_eq!(reg.sweep_now(), 0);
        assert_eq!(due.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sweep_order_is_deadline_order() {
        let reg = TimerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let base = Instant::now();
        // Attach out of order.
        for (label, offset_ms) in [("b", 2u64), ("a", 1), ("c", 3)] {
            let o = order.clone();
            reg.attach(Timer::at(base + Duration::from_millis(offset_ms), move || {
                o.lock().unwrap().push(label);
            }));
        }
        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(reg.sweep_now(), 3);
        assert_eq!(*order.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_duplicate_deadlines_keep_attach_order() {
        let reg = TimerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let deadline = Instant::now();
        for label in ["first", "second", "third"] {
            let o = order.clone();
            reg.attach(Timer::at(deadline, move || {
                o.lock().unwrap().push(label);
            }));
        }
        assert_eq!(reg.sweep_now(), 3);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_detach() {
        let reg = TimerRegistry::new();
        let hits = Arc::new(AtomicU32::new(0));
        let t = counting_timer(Duration::ZERO, &hits);
        reg.attach(t.clone());

        assert!(reg.detach(&t));
        assert_eq!(reg.sweep_now(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Absent timer: no-op.
        assert!(!reg.detach(&t));
    }

    #[test]
    fn test_callback_may_reattach() {
        let reg = Arc::new(TimerRegistry::new());
        let hits = Arc::new(AtomicU32::new(0));
        {
            let reg2 = reg.clone();
            let h = hits.clone();
            reg.attach(Timer::after(Duration::ZERO, move || {
                h.fetch_add(1, Ordering::SeqCst);
                let h2 = h.clone();
                reg2.attach(Timer::after(Duration::ZERO, move || {
                    h2.fetch_add(1, Ordering::SeqCst);
                }));
            }));
        }
        assert_eq!(reg.sweep_now(), 1);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.sweep_now(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_background_sweeper() {
        let reg = TimerRegistry::new();
        let hits = Arc::new(AtomicU32::new(0));
        reg.attach(counting_timer(Duration::from_millis(5), &hits));
        reg.attach(counting_timer(Duration::from_millis(10), &hits));

        reg.start_background_sweep(Duration::from_millis(2)).unwrap();
        assert_eq!(
            reg.start_background_sweep(Duration::from_millis(2)),
            Err(NetError::SweeperRunning)
        );

        let deadline = Instant::now() + Duration::from_secs(2);
        while hits.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = reg.stop_background_sweep().unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(stats.fired, 2);
        assert!(stats.cycles >= 1);

        // Stopped: a second stop reports nothing to stop.
        assert!(reg.stop_background_sweep().is_none());
        // And a restart works.
        reg.start_background_sweep(Duration::from_millis(2)).unwrap();
        assert!(reg.stop_background_sweep().is_some());
    }
}
