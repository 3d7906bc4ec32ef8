//! Deadline timers
//!
//! A [`Timer`] pairs an absolute deadline with a callback. A
//! [`TimerRegistry`] keeps attached timers sorted by deadline and fires the
//! due ones on each sweep, either driven manually through
//! [`TimerRegistry::sweep_now`] or by a background sweeper thread.

mod entry;
mod registry;
mod sweeper;

pub use entry::Timer;
pub use registry::TimerRegistry;
pub use sweeper::SweepStats;
