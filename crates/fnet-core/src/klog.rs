//! Leveled stderr print macros for fnet
//!
//! # Environment Variables
//!
//! - `FNET_LOG_LEVEL=<level>` - Set log level: 0=off, 1=error, 2=warn,
//!   3=info, 4=debug (default: info)
//!
//! # Usage
//!
//! ```ignore
//! use fnet_core::{kdebug, kerror, kinfo, kwarn};
//!
//! kinfo!("listening on {}", addr);
//! kerror!("accept failed: {}", err);
//! ```

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Log levels (matches common conventions)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Off = 0,
    Error = 1,
    Warn = 2,
    Info = 3,
    Debug = 4,
}

impl LogLevel {
    pub fn from_u8(v: u8) -> Self {
        match v {
            0 => LogLevel::Off,
            1 => LogLevel::Error,
            2 => LogLevel::Warn,
            3 => LogLevel::Info,
            _ => LogLevel::Debug,
        }
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Off => "",
            LogLevel::Error => "[ERROR]",
            LogLevel::Warn => "[WARN ]",
            LogLevel::Info => "[INFO ]",
            LogLevel::Debug => "[DEBUG]",
        }
    }
}

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize the log level from `FNET_LOG_LEVEL`.
///
/// Called automatically on the first level check, but can be called
/// explicitly for deterministic initialization.
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Ok(val) = std::env::var("FNET_LOG_LEVEL") {
        if let Ok(n) = val.parse::<u8>() {
            LOG_LEVEL.store(LogLevel::from_u8(n) as u8, Ordering::Relaxed);
        }
    }
}

/// Override the log level programmatically.
pub fn set_level(level: LogLevel) {
    INITIALIZED.store(true, Ordering::SeqCst);
    LOG_LEVEL.store(level as u8, Ordering::Relaxed);
}

/// Is `level` currently enabled?
#[inline]
pub fn enabled(level: LogLevel) -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    level as u8 <= LOG_LEVEL.load(Ordering::Relaxed)
}

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {
        if $crate::klog::enabled($level) {
            eprintln!("{} fnet: {}", $level.prefix(), format_args!($($arg)*));
        }
    };
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::LogLevel::Error, $($arg)*) };
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::LogLevel::Warn, $($arg)*) };
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::LogLevel::Info, $($arg)*) };
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => { $crate::klog!($crate::klog::LogLevel::Debug, $($arg)*) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(LogLevel::Error < LogLevel::Debug);
        assert_eq!(LogLevel::from_u8(3), LogLevel::Info);
        assert_eq!(LogLevel::from_u8(200), LogLevel::Debug);
    }

    #[test]
    fn test_set_level() {
        set_level(LogLevel::Warn);
        assert!(enabled(LogLevel::Error));
        assert!(enabled(LogLevel::Warn));
        assert!(!enabled(LogLevel::Debug));
        set_level(LogLevel::Info);
    }
}
