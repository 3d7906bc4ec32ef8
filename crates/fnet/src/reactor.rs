//! Single-threaded epoll reactor
//!
//! The reactor owns an epoll instance and drives all registered descriptors
//! from one thread. Generic sockets share the reactor-wide readable,
//! writable and disconnect callbacks; special descriptors (the listening
//! socket, the signal bridge pipe) each carry their own handler.
//!
//! Callbacks that need to register further descriptors (an accept handler
//! registering fresh connections, say) capture a [`Registrar`]: a small
//! `Copy` handle onto the same epoll instance that stays valid for the
//! reactor's lifetime.

use std::collections::HashMap;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fnet_core::env::env_get;
use fnet_core::{kdebug, kerror, last_errno, NetError, NetResult};

use crate::acceptor::TcpAcceptor;
use crate::sigflow::SigFlow;
use crate::util;

/// Readiness event bits, in epoll's terms.
pub mod event {
    pub const READABLE: u32 = libc::EPOLLIN as u32;
    pub const WRITABLE: u32 = libc::EPOLLOUT as u32;
    /// Peer shutdown, hangup or socket error. Always watched; dispatched
    /// before any other bit on the same descriptor.
    pub const DISCONNECT: u32 =
        (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32;
}

/// Delivery patterns combined with an [`event`] mask at registration.
pub mod pattern {
    /// Level-triggered: reported as long as the condition holds.
    pub const LT: u32 = 0;
    /// Edge-triggered: reported once per readiness transition; the handler
    /// must drain until the operation would block.
    pub const ET: u32 = libc::EPOLLET as u32;
    /// Level-triggered, disarmed after one report until re-armed with
    /// [`Reactor::reset`].
    pub const LT_ONESHOT: u32 = libc::EPOLLONESHOT as u32;
    /// Edge-triggered one-shot.
    pub const ET_ONESHOT: u32 = (libc::EPOLLET | libc::EPOLLONESHOT) as u32;
}

#[derive(Clone, Debug)]
pub struct ReactorConfig {
    /// Events accepted per poll cycle.
    pub event_capacity: usize,
    /// Poll timeout; `None` blocks until an event arrives.
    pub wait_timeout: Option<Duration>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            wait_timeout: None,
        }
    }
}

impl ReactorConfig {
    /// Read overrides from `FNET_EV_BUF_SZ` and `FNET_WAIT_TIMEOUT_MS`
    /// (0 means block indefinitely).
    pub fn from_env() -> Self {
        let ms: u64 = env_get("FNET_WAIT_TIMEOUT_MS", 0);
        Self {
            event_capacity: env_get("FNET_EV_BUF_SZ", 1024),
            wait_timeout: (ms > 0).then(|| Duration::from_millis(ms)),
        }
    }
}

/// `Copy` handle onto the reactor's epoll instance, for use inside
/// callbacks. Valid while the reactor that produced it is running.
#[derive(Clone, Copy)]
pub struct Registrar {
    epfd: RawFd,
}

impl Registrar {
    /// Start watching `fd` for `ev` under `pat`. Disconnect conditions are
    /// always watched.
    pub fn register(&self, fd: RawFd, ev: u32, pat: u32) -> NetResult<()> {
        epoll_ctl(self.epfd, libc::EPOLL_CTL_ADD, fd, ev | pat)
    }

    /// Change (or, for one-shot registrations, re-arm) `fd`'s mask.
    pub fn reset(&self, fd: RawFd, ev: u32, pat: u32) -> NetResult<()> {
        epoll_ctl(self.epfd, libc::EPOLL_CTL_MOD, fd, ev | pat)
    }

    /// Stop watching `fd`. The descriptor stays open.
    pub fn deregister(&self, fd: RawFd) -> NetResult<()> {
        epoll_ctl(self.epfd, libc::EPOLL_CTL_DEL, fd, 0)
    }
}

/// Handle for requesting a reactor stop from callbacks or other threads.
///
/// The flag is checked between poll cycles, so a blocked reactor notices it
/// on its next wakeup (a signal, an event, or the poll timeout).
#[derive(Clone)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

struct SpecificEntry {
    cb: Box<dyn FnMut()>,
    /// Keeps a transferred descriptor (e.g. the listening socket) open for
    /// the life of the registration.
    _owned: Option<OwnedFd>,
}

pub struct Reactor {
    epfd: Option<OwnedFd>,
    stop: Arc<AtomicBool>,
    wait_timeout_ms: i32,
    ev_buf: Vec<libc::epoll_event>,
    timeout_cb: Option<Box<dyn FnMut()>>,
    readable_cb: Box<dyn FnMut(RawFd)>,
    writable_cb: Box<dyn FnMut(RawFd)>,
    disconnect_cb: Box<dyn FnMut(RawFd)>,
    specific: HashMap<RawFd, SpecificEntry>,
    sigflow: Option<SigFlow>,
    sigflow_fd: RawFd,
}

impl Reactor {
    pub fn new() -> NetResult<Self> {
        Self::with_config(ReactorConfig::default())
    }

    pub fn with_config(cfg: ReactorConfig) -> NetResult<Self> {
        let raw = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if raw < 0 {
            return Err(NetError::Multiplexer(last_errno()));
        }
        let epfd = unsafe { OwnedFd::from_raw_fd(raw) };
        let zero = libc::epoll_event { events: 0, u64: 0 };
        Ok(Self {
            epfd: Some(epfd),
            stop: Arc::new(AtomicBool::new(false)),
            wait_timeout_ms: cfg
                .wait_timeout
                .map(|d| d.as_millis() as i32)
                .unwrap_or(-1),
            ev_buf: vec![zero; cfg.event_capacity.max(1)],
            timeout_cb: None,
            readable_cb: Box::new(|_| {}),
            writable_cb: Box::new(|_| {}),
            // Default disconnect handling: close, which also drops the
            // descriptor out of the epoll set.
            disconnect_cb: Box::new(|fd| unsafe {
                libc::close(fd);
            }),
            specific: HashMap::new(),
            sigflow: None,
            sigflow_fd: -1,
        })
    }

    fn raw_epfd(&self) -> NetResult<RawFd> {
        self.epfd
            .as_ref()
            .map(AsRawFd::as_raw_fd)
            .ok_or(NetError::Closed)
    }

    /// Handle for registrations from inside callbacks.
    pub fn registrar(&self) -> NetResult<Registrar> {
        Ok(Registrar {
            epfd: self.raw_epfd()?,
        })
    }

    /// Watch a generic socket; its events go to the reactor-wide callbacks.
    pub fn register(&self, fd: RawFd, ev: u32, pat: u32) -> NetResult<()> {
        self.registrar()?.register(fd, ev, pat)
    }

    /// Change or re-arm a registration.
    pub fn reset(&self, fd: RawFd, ev: u32, pat: u32) -> NetResult<()> {
        self.registrar()?.reset(fd, ev, pat)
    }

    pub fn deregister(&self, fd: RawFd) -> NetResult<()> {
        self.registrar()?.deregister(fd)
    }

    /// Take ownership of a listening socket and accept connections through
    /// it. `on_connected` receives each accepted descriptor, already
    /// non-blocking and close-on-exec, and owns it from then on.
    pub fn register_acceptor(
        &mut self,
        acceptor: TcpAcceptor,
        mut on_connected: impl FnMut(RawFd) + 'static,
    ) -> NetResult<()> {
        let owned = acceptor.release();
        let lfd = owned.as_raw_fd();
        util::set_nonblocking(lfd)?;
        self.register(lfd, event::READABLE, pattern::ET)?;
        // Edge-triggered, so drain the whole accept queue per report.
        let cb = Box::new(move || loop {
            let cfd = unsafe {
                libc::accept4(
                    lfd,
                    std::ptr::null_mut(),
                    std::ptr::null_mut(),
                    libc::SOCK_NONBLOCK | libc::SOCK_CLOEXEC,
                )
            };
            if cfd < 0 {
                let errno = last_errno();
                if errno != libc::EAGAIN && errno != libc::EWOULDBLOCK {
                    kerror!("accept on fd {} failed: errno {}", lfd, errno);
                }
                break;
            }
            on_connected(cfd);
        });
        self.specific.insert(
            lfd,
            SpecificEntry {
                cb,
                _owned: Some(owned),
            },
        );
        Ok(())
    }

    /// Watch an arbitrary descriptor with its own handler instead of the
    /// reactor-wide callbacks.
    pub fn register_specific(
        &mut self,
        fd: RawFd,
        ev: u32,
        pat: u32,
        cb: impl FnMut() + 'static,
    ) -> NetResult<()> {
        self.register(fd, ev, pat)?;
        self.specific.insert(
            fd,
            SpecificEntry {
                cb: Box::new(cb),
                _owned: None,
            },
        );
        Ok(())
    }

    /// Adopt a signal bridge: its pipe is watched and drained into callback
    /// dispatch as part of the event loop.
    pub fn register_sigflow(&mut self, flow: SigFlow) -> NetResult<()> {
        let fd = flow.out_fd();
        self.register(fd, event::READABLE, pattern::LT)?;
        self.sigflow_fd = fd;
        self.sigflow = Some(flow);
        Ok(())
    }

    /// Access the adopted signal bridge, e.g. to bind further signals.
    pub fn sigflow_mut(&mut self) -> Option<&mut SigFlow> {
        self.sigflow.as_mut()
    }

    pub fn set_readable_cb(&mut self, cb: impl FnMut(RawFd) + 'static) {
        self.readable_cb = Box::new(cb);
    }

    pub fn set_writable_cb(&mut self, cb: impl FnMut(RawFd) + 'static) {
        self.writable_cb = Box::new(cb);
    }

    /// Replace the default disconnect handling (closing the descriptor).
    /// The replacement is responsible for closing.
    pub fn set_disconnect_cb(&mut self, cb: impl FnMut(RawFd) + 'static) {
        self.disconnect_cb = Box::new(cb);
    }

    /// Fire `cb` whenever a poll cycle elapses with no events.
    pub fn set_timeout(&mut self, every: Duration, cb: impl FnMut() + 'static) {
        self.wait_timeout_ms = every.as_millis() as i32;
        self.timeout_cb = Some(Box::new(cb));
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Run one poll cycle: wait, then dispatch every reported event.
    /// Returns the number of events dispatched; zero covers both a timeout
    /// and an interrupted wait.
    pub fn poll_once(&mut self) -> NetResult<usize> {
        let epfd = self.raw_epfd()?;
        let n = unsafe {
            libc::epoll_wait(
                epfd,
                self.ev_buf.as_mut_ptr(),
                self.ev_buf.len() as i32,
                self.wait_timeout_ms,
            )
        };
        if n < 0 {
            let errno = last_errno();
            // A signal interrupting the wait is an empty cycle, not a
            // timeout and not an error.
            if errno == libc::EINTR {
                return Ok(0);
            }
            return Err(NetError::Multiplexer(errno));
        }
        if n == 0 {
            if let Some(cb) = self.timeout_cb.as_mut() {
                cb();
            }
            return Ok(0);
        }

        // The event buffer moves out during dispatch so callbacks may
        // borrow the reactor's fields freely.
        let evs = std::mem::take(&mut self.ev_buf);
        for e in &evs[..n as usize] {
            let fd = e.u64 as RawFd;
            let mask = e.events;
            if mask & event::DISCONNECT != 0 {
                self.handle_disconnect(fd);
                continue;
            }
            if fd == self.sigflow_fd {
                if let Some(flow) = self.sigflow.as_mut() {
                    if let Err(e) = flow.process() {
                        kerror!("signal bridge: {}", e);
                    }
                }
            } else if let Some(entry) = self.specific.get_mut(&fd) {
                (entry.cb)();
            } else if mask & event::READABLE != 0 {
                (self.readable_cb)(fd);
            } else if mask & event::WRITABLE != 0 {
                (self.writable_cb)(fd);
            }
        }
        self.ev_buf = evs;
        Ok(n as usize)
    }

    fn handle_disconnect(&mut self, fd: RawFd) {
        if fd == self.sigflow_fd {
            kdebug!("signal bridge pipe closed");
            self.sigflow_fd = -1;
            self.sigflow = None;
        } else if self.specific.remove(&fd).is_some() {
            // Dropping the entry closes any owned descriptor, which also
            // deregisters it.
            kdebug!("special fd {} disconnected", fd);
        } else {
            (self.disconnect_cb)(fd);
        }
    }

    /// Poll until a stop is requested, then release the epoll instance.
    pub fn run(&mut self) -> NetResult<()> {
        while !self.stop.load(Ordering::SeqCst) {
            self.poll_once()?;
        }
        kdebug!("reactor stopping");
        self.epfd = None;
        Ok(())
    }
}

fn epoll_ctl(epfd: RawFd, op: libc::c_int, fd: RawFd, events: u32) -> NetResult<()> {
    let mut ev = libc::epoll_event {
        events: events | event::DISCONNECT,
        u64: fd as u64,
    };
    let rc = unsafe { libc::epoll_ctl(epfd, op, fd, &mut ev) };
    if rc < 0 {
        return Err(NetError::Multiplexer(last_errno()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::io::{Read, Write};
    use std::net::TcpStream;
    use std::rc::Rc;

    fn pipe_pair() -> (OwnedFd, OwnedFd) {
        use nix::sys::socket::{socketpair, AddressFamily, SockFlag, SockProtocol, SockType};
        socketpair(
            AddressFamily::Unix,
            SockType::Stream,
            None::<SockProtocol>,
            SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        )
        .unwrap()
    }

    fn send_all(fd: RawFd, bytes: &[u8]) {
        let n = unsafe { libc::send(fd, bytes.as_ptr() as *const libc::c_void, bytes.len(), 0) };
        assert_eq!(n, bytes.len() as isize);
    }

    fn quick_reactor() -> Reactor {
        Reactor::with_config(ReactorConfig {
            event_capacity: 16,
            wait_timeout: Some(Duration::from_millis(50)),
        })
        .unwrap()
    }

    #[test]
    fn test_readable_dispatch() {
        let mut reactor = quick_reactor();
        let (tx, rx) = pipe_pair();

        let hits = Rc::new(Cell::new(0));
        {
            let hits = hits.clone();
            let want = rx.as_raw_fd();
            reactor.set_readable_cb(move |fd| {
                assert_eq!(fd, want);
                let mut buf = [0u8; 16];
                let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 16) };
                assert_eq!(&buf[..n as usize], b"ping");
                hits.set(hits.get() + 1);
            });
        }
        reactor.register(rx.as_raw_fd(), event::READABLE, pattern::LT).unwrap();

        send_all(tx.as_raw_fd(), b"ping");
        assert_eq!(reactor.poll_once().unwrap(), 1);
        assert_eq!(hits.get(), 1);

        // Drained: the next cycle times out.
        assert_eq!(reactor.poll_once().unwrap(), 0);
    }

    #[test]
    fn test_oneshot_requires_rearm() {
        let mut reactor = quick_reactor();
        let (tx, rx) = pipe_pair();
        let rfd = rx.as_raw_fd();

        let hits = Rc::new(Cell::new(0));
        {
            let hits = hits.clone();
            reactor.set_readable_cb(move |fd| {
                let mut buf = [0u8; 16];
                while unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, 16) } > 0 {}
                hits.set(hits.get() + 1);
            });
        }
        reactor
            .register(rfd, event::READABLE, pattern::ET_ONESHOT)
            .unwrap();

        send_all(tx.as_raw_fd(), b"one");
        assert_eq!(reactor.poll_once().unwrap(), 1);
        assert_eq!(hits.get(), 1);

        // Disarmed: new data is not reported.
        send_all(tx.as_raw_fd(), b"two");
        assert_eq!(reactor.poll_once().unwrap(), 0);
        assert_eq!(hits.get(), 1);

        // Re-armed: the pending data is reported again.
        reactor
            .reset(rfd, event::READABLE, pattern::ET_ONESHOT)
            .unwrap();
        assert_eq!(reactor.poll_once().unwrap(), 1);
        assert_eq!(hits.get(), 2);
    }

    #[test]
    fn test_timeout_callback() {
        let mut reactor = Reactor::new().unwrap();
        let ticks = Rc::new(Cell::new(0));
        {
            let ticks = ticks.clone();
            reactor.set_timeout(Duration::from_millis(10), move || {
                ticks.set(ticks.get() + 1);
            });
        }
        assert_eq!(reactor.poll_once().unwrap(), 0);
        assert_eq!(ticks.get(), 1);
    }

    #[test]
    fn test_run_until_stopped_releases_multiplexer() {
        let mut reactor = Reactor::new().unwrap();
        let handle = reactor.stop_handle();
        reactor.set_timeout(Duration::from_millis(1), move || handle.stop());
        reactor.run().unwrap();
        assert_eq!(reactor.poll_once(), Err(NetError::Closed));
    }

    #[test]
    fn test_tcp_echo_end_to_end() {
        let mut reactor = quick_reactor();

        let acceptor = TcpAcceptor::new().unwrap();
        util::set_reuse_address(acceptor.as_raw_fd()).unwrap();
        acceptor.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        acceptor.listen(TcpAcceptor::DEFAULT_BACKLOG).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let registrar = reactor.registrar().unwrap();
        reactor
            .register_acceptor(acceptor, move |cfd| {
                registrar.register(cfd, event::READABLE, pattern::ET).unwrap();
            })
            .unwrap();
        reactor.set_readable_cb(|fd| {
            let mut buf = [0u8; 256];
            loop {
                let n =
                    unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
                if n <= 0 {
                    break;
                }
                let w = unsafe {
                    libc::write(fd, buf.as_ptr() as *const libc::c_void, n as usize)
                };
                assert_eq!(w, n);
            }
        });

        let done = Arc::new(AtomicBool::new(false));
        let done2 = done.clone();
        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(addr).unwrap();
            stream.write_all(b"echo me").unwrap();
            let mut back = [0u8; 7];
            stream.read_exact(&mut back).unwrap();
            done2.store(true, Ordering::SeqCst);
            back
        });

        while !done.load(Ordering::SeqCst) {
            reactor.poll_once().unwrap();
        }
        assert_eq!(&client.join().unwrap(), b"echo me");
    }
}
