//! Signal bridge: the self-pipe trick
//!
//! OS signal handlers run on an arbitrary interrupted context and may not
//! take locks, allocate, or touch most library state. The bridge confines
//! the asynchronous part to a single async-signal-safe `write` of the
//! signal number into a non-blocking socketpair; everything else happens in
//! [`SigFlow::process`], called by the reactor when the pipe's read end
//! becomes readable.
//!
//! At most one bridge exists per process: the handler needs a process-wide
//! write descriptor, and that static slot is the claim. Constructing a
//! second bridge while one is alive fails with [`NetError::BridgeExists`].

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

use fnet_core::{NetError, NetResult};

/// Highest signal number the callback table covers (exclusive).
pub const MAX_SIGNAL: usize = 128;

/// Write end of the live bridge's pipe, or -1.
static BRIDGE_WRITE_FD: AtomicI32 = AtomicI32::new(-1);
/// Set by the handler when a signal byte could not be written.
static BRIDGE_OVERFLOW: AtomicBool = AtomicBool::new(false);

/// The only code that runs in signal context. Async-signal-safe: one
/// `write`, errno preserved.
extern "C" fn pipe_handler(sig: libc::c_int) {
    unsafe {
        let saved_errno = *libc::__errno_location();
        let fd = BRIDGE_WRITE_FD.load(Ordering::Relaxed);
        if fd >= 0 {
            let byte = sig as u8;
            let n = libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
            if n != 1 {
                // Pipe full: a signal would be lost. Record it so process()
                // can report instead of dropping silently.
                BRIDGE_OVERFLOW.store(true, Ordering::Relaxed);
            }
        }
        *libc::__errno_location() = saved_errno;
    }
}

type SigCallback = Box<dyn FnMut()>;

pub struct SigFlow {
    wr: OwnedFd,
    rd: OwnedFd,
    callbacks: [Option<SigCallback>; MAX_SIGNAL],
    installed: [bool; MAX_SIGNAL],
}

impl SigFlow {
    /// Create the bridge: a non-blocking socketpair plus the process-wide
    /// handler-side claim.
    pub fn new() -> NetResult<Self> {
        use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockProtocol, SockType};

        let (wr, rd) = socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None::<SockProtocol>,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )
        .map_err(|e| NetError::SignalSetup(e as i32))?;

        BRIDGE_WRITE_FD
            .compare_exchange(-1, wr.as_raw_fd(), Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| NetError::BridgeExists)?;
        BRIDGE_OVERFLOW.store(false, Ordering::SeqCst);

        Ok(Self {
            wr,
            rd,
            callbacks: std::array::from_fn(|_| None),
            installed: [false; MAX_SIGNAL],
        })
    }

    /// Bind `signo` to `cb` and install the pipe handler for it.
    ///
    /// `restart` selects `SA_RESTART` so interrupted slow syscalls resume.
    /// Validation happens before any state changes.
    pub fn add_signal(
        &mut self,
        signo: i32,
        cb: impl FnMut() + 'static,
        restart: bool,
    ) -> NetResult<()> {
        let slot = Self::slot_of(signo)?;
        let sig = Signal::try_from(signo).map_err(|_| NetError::InvalidSignal(signo))?;

        // Store the callback before installing the handler, so a signal
        // arriving immediately after sigaction() finds its slot bound.
        self.callbacks[slot] = Some(Box::new(cb));

        let flags = if restart {
            SaFlags::SA_RESTART
        } else {
            SaFlags::empty()
        };
        let action = SigAction::new(SigHandler::Handler(pipe_handler), flags, SigSet::all());
        if let Err(e) = unsafe { signal::sigaction(sig, &action) } {
            self.callbacks[slot] = None;
            return Err(NetError::SignalSetup(e as i32));
        }
        self.installed[slot] = true;
        Ok(())
    }

    /// Restore the default disposition for `signo` and drop its callback.
    pub fn remove_signal(&mut self, signo: i32) -> NetResult<()> {
        let slot = Self::slot_of(signo)?;
        let sig = Signal::try_from(signo).map_err(|_| NetError::InvalidSignal(signo))?;

        let action = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        unsafe { signal::sigaction(sig, &action) }.map_err(|e| NetError::SignalSetup(e as i32))?;
        self.callbacks[slot] = None;
        self.installed[slot] = false;
        Ok(())
    }

    /// Drain the pipe and fire the table callback for every signal byte.
    ///
    /// Returns the number of signals processed. A recorded pipe overflow is
    /// reported as [`NetError::SignalPipeOverflow`] before any dispatch:
    /// a lost byte could have been a shutdown request.
    pub fn process(&mut self) -> NetResult<usize> {
        if BRIDGE_OVERFLOW.swap(false, Ordering::SeqCst) {
            return Err(NetError::SignalPipeOverflow);
        }
        let mut count = 0;
        let mut buf = [0u8; 8];
        loop {
            let n = unsafe {
                libc::read(
                    self.rd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
            for &b in &buf[..n as usize] {
                if let Some(cb) = self.callbacks.get_mut(b as usize).and_then(|s| s.as_mut()) {
                    cb();
                }
                count += 1;
            }
        }
        Ok(count)
    }

    /// Discard pending signal bytes without firing callbacks.
    pub fn drain_without_dispatch(&mut self) {
        let mut buf = [0u8; 128];
        loop {
            let n = unsafe {
                libc::read(
                    self.rd.as_raw_fd(),
                    buf.as_mut_ptr() as *mut libc::c_void,
                    buf.len(),
                )
            };
            if n <= 0 {
                break;
            }
        }
    }

    /// Read end: the descriptor the reactor watches.
    pub fn out_fd(&self) -> RawFd {
        self.rd.as_raw_fd()
    }

    /// Write end: the descriptor the handler writes to.
    pub fn in_fd(&self) -> RawFd {
        self.wr.as_raw_fd()
    }

    fn slot_of(signo: i32) -> NetResult<usize> {
        if signo <= 0 || signo as usize >= MAX_SIGNAL {
            return Err(NetError::InvalidSignal(signo));
        }
        Ok(signo as usize)
    }
}

impl Drop for SigFlow {
    fn drop(&mut self) {
        // Handlers must not outlive the pipe they write to.
        for signo in 1..MAX_SIGNAL as i32 {
            if self.installed[signo as usize] {
                let _ = self.remove_signal(signo);
            }
        }
        BRIDGE_WRITE_FD.store(-1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn raise(signo: i32) {
        assert_eq!(unsafe { libc::raise(signo) }, 0);
    }

    // Signal disposition is process-global state, so every scenario runs
    // inside this single test.
    #[test]
    fn test_signal_bridge_end_to_end() {
        let mut flow = SigFlow::new().unwrap();

        // Exactly one bridge per process.
        assert_eq!(SigFlow::new().err(), Some(NetError::BridgeExists));

        // Misuse reported before any mutation.
        assert_eq!(
            flow.add_signal(0, || {}, true).err(),
            Some(NetError::InvalidSignal(0))
        );
        assert_eq!(
            flow.add_signal(1000, || {}, true).err(),
            Some(NetError::InvalidSignal(1000))
        );

        // Three signals raised before process() is called: three processed,
        // each bound callback fired exactly once.
        let hits1 = Rc::new(Cell::new(0));
        let hits2 = Rc::new(Cell::new(0));
        let hitsh = Rc::new(Cell::new(0));
        {
            let h = hits1.clone();
            flow.add_signal(libc::SIGUSR1, move || h.set(h.get() + 1), true)
                .unwrap();
        }
        {
            let h = hits2.clone();
            flow.add_signal(libc::SIGUSR2, move || h.set(h.get() + 1), true)
                .unwrap();
        }
        {
            let h = hitsh.clone();
            flow.add_signal(libc::SIGHUP, move || h.set(h.get() + 1), true)
                .unwrap();
        }

        raise(libc::SIGUSR1);
        raise(libc::SIGUSR2);
        raise(libc::SIGHUP);
        assert_eq!(flow.process().unwrap(), 3);
        assert_eq!(hits1.get(), 1);
        assert_eq!(hits2.get(), 1);
        assert_eq!(hitsh.get(), 1);

        // Nothing pending now.
        assert_eq!(flow.process().unwrap(), 0);

        // Drain without dispatch discards, firing nothing.
        raise(libc::SIGUSR1);
        raise(libc::SIGUSR1);
        flow.drain_without_dispatch();
        assert_eq!(flow.process().unwrap(), 0);
        assert_eq!(hits1.get(), 1);

        // Repeated delivery keeps working.
        raise(libc::SIGUSR2);
        assert_eq!(flow.process().unwrap(), 1);
        assert_eq!(hits2.get(), 2);

        // Dropping the bridge releases the claim and restores defaults,
        // so a fresh bridge can be built.
        drop(flow);
        let flow2 = SigFlow::new().unwrap();
        drop(flow2);
    }
}
