//! Socket utility helpers: non-blocking mode, option toggles, addresses

use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::RawFd;

use fnet_core::{last_errno, NetError, NetResult};

/// Switch `fd` to non-blocking mode. Returns the previous fcntl flags.
pub fn set_nonblocking(fd: RawFd) -> NetResult<i32> {
    let old = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if old < 0 {
        return Err(NetError::Socket(last_errno()));
    }
    if unsafe { libc::fcntl(fd, libc::F_SETFL, old | libc::O_NONBLOCK) } < 0 {
        return Err(NetError::Socket(last_errno()));
    }
    Ok(old)
}

/// Enable SO_REUSEADDR so a restarted server can rebind immediately.
pub fn set_reuse_address(fd: RawFd) -> NetResult<()> {
    set_opt(fd, libc::SOL_SOCKET, libc::SO_REUSEADDR)
}

/// Disable Nagle's algorithm.
pub fn set_tcp_nodelay(fd: RawFd) -> NetResult<()> {
    set_opt(fd, libc::IPPROTO_TCP, libc::TCP_NODELAY)
}

fn set_opt(fd: RawFd, level: libc::c_int, name: libc::c_int) -> NetResult<()> {
    let opt: libc::c_int = 1;
    let rc = unsafe {
        libc::setsockopt(
            fd,
            level,
            name,
            &opt as *const _ as *const libc::c_void,
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(NetError::Socket(last_errno()));
    }
    Ok(())
}

/// Local address of a bound socket (getsockname).
pub fn local_addr(fd: RawFd) -> NetResult<SocketAddrV4> {
    sock_name(fd, libc::getsockname)
}

/// Peer address of a connected socket (getpeername).
pub fn peer_addr(fd: RawFd) -> NetResult<SocketAddrV4> {
    sock_name(fd, libc::getpeername)
}

type NameFn = unsafe extern "C" fn(
    libc::c_int,
    *mut libc::sockaddr,
    *mut libc::socklen_t,
) -> libc::c_int;

fn sock_name(fd: RawFd, f: NameFn) -> NetResult<SocketAddrV4> {
    let mut addr: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let rc = unsafe { f(fd, &mut addr as *mut _ as *mut libc::sockaddr, &mut len) };
    if rc < 0 {
        return Err(NetError::Socket(last_errno()));
    }
    Ok(from_sockaddr_in(&addr))
}

/// Build a `sockaddr_in` from a `SocketAddrV4`.
pub(crate) fn to_sockaddr_in(addr: SocketAddrV4) -> libc::sockaddr_in {
    let mut sin: libc::sockaddr_in = unsafe { std::mem::zeroed() };
    sin.sin_family = libc::AF_INET as libc::sa_family_t;
    sin.sin_addr.s_addr = u32::from(*addr.ip()).to_be();
    sin.sin_port = addr.port().to_be();
    sin
}

/// Convert a `sockaddr_in` back into a `SocketAddrV4`.
pub(crate) fn from_sockaddr_in(sin: &libc::sockaddr_in) -> SocketAddrV4 {
    SocketAddrV4::new(
        Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr)),
        u16::from_be(sin.sin_port),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::os::fd::AsRawFd;

    #[test]
    fn test_sockaddr_round_trip() {
        let addr: SocketAddrV4 = "192.168.1.7:8080".parse().unwrap();
        let sin = to_sockaddr_in(addr);
        assert_eq!(from_sockaddr_in(&sin), addr);
    }

    #[test]
    fn test_set_nonblocking() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let fd = listener.as_raw_fd();
        let old = set_nonblocking(fd).unwrap();
        assert_eq!(old & libc::O_NONBLOCK, 0);
        // Second call sees the flag already set.
        let old2 = set_nonblocking(fd).unwrap();
        assert_ne!(old2 & libc::O_NONBLOCK, 0);
    }

    #[test]
    fn test_local_addr() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = local_addr(listener.as_raw_fd()).unwrap();
        assert_eq!(*addr.ip(), Ipv4Addr::new(127, 0, 0, 1));
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_bad_fd_reports_errno() {
        match set_reuse_address(-1) {
            Err(NetError::Socket(errno)) => assert_eq!(errno, libc::EBADF),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
