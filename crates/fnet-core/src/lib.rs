//! # fnet-core
//!
//! Shared primitives for the fnet reactor workspace:
//! - Error types ([`NetError`], [`NetResult`])
//! - Leveled stderr logging macros (`kerror!`, `kwarn!`, `kinfo!`, `kdebug!`)
//! - Environment-variable configuration helpers ([`env::env_get`])

pub mod env;
pub mod error;
pub mod klog;

pub use error::{last_errno, NetError, NetResult};
