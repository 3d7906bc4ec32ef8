//! Error types for the fnet reactor

use core::fmt;

/// Result type for reactor operations
pub type NetResult<T> = Result<T, NetError>;

/// Errors that can occur in reactor operations.
///
/// Transient would-block conditions are never represented here: they are
/// reported as `Ok(None)` / zero-byte results by the APIs that hit them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetError {
    /// epoll_create/epoll_ctl/epoll_wait failure (errno)
    Multiplexer(i32),

    /// socket/bind/listen/accept/setsockopt/fcntl failure (errno)
    Socket(i32),

    /// sigaction or signal-pipe creation failure (errno)
    SignalSetup(i32),

    /// Signal number outside the supported range or not a real signal
    InvalidSignal(i32),

    /// The signal pipe filled up and at least one signal byte was lost
    SignalPipeOverflow,

    /// A signal bridge already exists in this process
    BridgeExists,

    /// Background sweep thread already running
    SweeperRunning,

    /// Trie key contains a byte outside lowercase ASCII
    InvalidTrieKey(u8),

    /// Operation on a reactor whose multiplexer handle was released
    Closed,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::Multiplexer(errno) => write!(f, "multiplexer error (errno {})", errno),
            NetError::Socket(errno) => write!(f, "socket error (errno {})", errno),
            NetError::SignalSetup(errno) => write!(f, "signal setup error (errno {})", errno),
            NetError::InvalidSignal(sig) => write!(f, "invalid signal number {}", sig),
            NetError::SignalPipeOverflow => write!(f, "signal pipe overflowed, signals lost"),
            NetError::BridgeExists => write!(f, "a signal bridge already exists"),
            NetError::SweeperRunning => write!(f, "background sweep thread already running"),
            NetError::InvalidTrieKey(b) => write!(f, "invalid trie key byte 0x{:02x}", b),
            NetError::Closed => write!(f, "reactor is closed"),
        }
    }
}

impl std::error::Error for NetError {}

/// Read the calling thread's errno.
#[inline]
pub fn last_errno() -> i32 {
    unsafe { *libc::__errno_location() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(
            NetError::Multiplexer(9).to_string(),
            "multiplexer error (errno 9)"
        );
        assert_eq!(
            NetError::InvalidTrieKey(b'-').to_string(),
            "invalid trie key byte 0x2d"
        );
        assert!(NetError::SignalPipeOverflow.to_string().contains("overflow"));
    }

    #[test]
    fn test_eq() {
        assert_eq!(NetError::Socket(11), NetError::Socket(11));
        assert_ne!(NetError::Socket(11), NetError::Multiplexer(11));
    }
}
