use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use fnet_core::kdebug;

use super::registry;
use super::Timer;

/// Counters reported by a sweeper thread when it shuts down.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Sweep cycles executed.
    pub cycles: u64,
    /// Timers fired across all cycles.
    pub fired: u64,
}

/// Handle to a running background sweeper thread.
pub(super) struct SweeperHandle {
    handle: Option<JoinHandle<SweepStats>>,
    stop: Arc<(Mutex<bool>, Condvar)>,
}

impl SweeperHandle {
    pub(super) fn spawn(timers: Arc<Mutex<Vec<Timer>>>, interval: Duration) -> Self {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop2 = stop.clone();
        let handle = thread::Builder::new()
            .name("fnet-timer-sweep".into())
            .spawn(move || {
                let (lock, cvar) = &*stop2;
                let mut stats = SweepStats::default();
                let mut stopped = lock.lock().unwrap();
                loop {
                    if *stopped {
                        break;
                    }
                    // Release the stop lock while sweeping so shutdown is
                    // never blocked on a slow callback.
                    drop(stopped);
                    stats.cycles += 1;
                    stats.fired += registry::sweep(&timers) as u64;
                    stopped = lock.lock().unwrap();
                    if *stopped {
                        break;
                    }
                    let (guard, _) = cvar.wait_timeout(stopped, interval).unwrap();
                    stopped = guard;
                }
                kdebug!(
                    "timer sweeper exiting: {} cycles, {} fired",
                    stats.cycles,
                    stats.fired
                );
                stats
            })
            .expect("spawn timer sweeper thread");
        Self {
            handle: Some(handle),
            stop,
        }
    }

    /// Signal the thread to stop, join it, and return its statistics.
    pub(super) fn shutdown(mut self) -> SweepStats {
        self.signal_stop();
        match self.handle.take() {
            Some(h) => h.join().unwrap_or_default(),
            None => SweepStats::default(),
        }
    }

    fn signal_stop(&self) {
        let (lock, cvar) = &*self.stop;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            self.signal_stop();
            let _ = h.join();
        }
    }
}
