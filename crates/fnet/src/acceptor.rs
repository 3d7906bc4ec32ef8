//! TCP acceptor: owns a bound, listening socket and produces connections
//!
//! The listening descriptor is held as an `OwnedFd`; handing it to the
//! reactor goes through [`TcpAcceptor::release`], which consumes the
//! acceptor so a descriptor can never be registered twice or used after
//! the transfer.

use std::net::SocketAddrV4;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use fnet_core::{last_errno, NetError, NetResult};

use crate::util;

pub struct TcpAcceptor {
    fd: OwnedFd,
}

impl TcpAcceptor {
    /// Accept-queue depth used when the caller has no opinion.
    pub const DEFAULT_BACKLOG: i32 = 511;

    /// Create the listening socket. Fails as a constructor error rather
    /// than aborting the process.
    pub fn new() -> NetResult<Self> {
        let fd = unsafe { libc::socket(libc::AF_INET, libc::SOCK_STREAM | libc::SOCK_CLOEXEC, 0) };
        if fd < 0 {
            return Err(NetError::Socket(last_errno()));
        }
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    /// Bind to an IPv4 address and port.
    pub fn bind(&self, addr: SocketAddrV4) -> NetResult<()> {
        let sin = util::to_sockaddr_in(addr);
        let rc = unsafe {
            libc::bind(
                self.fd.as_raw_fd(),
                &sin as *const _ as *const libc::sockaddr,
                std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
            )
        };
        if rc < 0 {
            return Err(NetError::Socket(last_errno()));
        }
        Ok(())
    }

    /// Start listening. Once the accept queue holds `backlog` connections
    /// the kernel drops further attempts silently.
    pub fn listen(&self, backlog: i32) -> NetResult<()> {
        if unsafe { libc::listen(self.fd.as_raw_fd(), backlog) } < 0 {
            return Err(NetError::Socket(last_errno()));
        }
        Ok(())
    }

    /// Accept one pending connection.
    ///
    /// Returns `Ok(None)` when the accept would block; the returned
    /// descriptor is owned by the caller.
    pub fn try_accept(&self) -> NetResult<Option<(RawFd, SocketAddrV4)>> {
        let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
        let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
        let fd = unsafe {
            libc::accept(
                self.fd.as_raw_fd(),
                &mut sin as *mut _ as *mut libc::sockaddr,
                &mut len,
            )
        };
        if fd < 0 {
            let errno = last_errno();
            if errno == libc::EAGAIN || errno == libc::EWOULDBLOCK {
                return Ok(None);
            }
            return Err(NetError::Socket(errno));
        }
        Ok(Some((fd, util::from_sockaddr_in(&sin))))
    }

    /// Local address (useful after binding port 0).
    pub fn local_addr(&self) -> NetResult<SocketAddrV4> {
        util::local_addr(self.fd.as_raw_fd())
    }

    pub fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    /// Transfer ownership of the listening descriptor out of the acceptor.
    pub fn release(self) -> OwnedFd {
        self.fd
    }
}
