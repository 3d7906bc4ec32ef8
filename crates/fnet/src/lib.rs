//! # fnet — event-driven network reactor
//!
//! A single-threaded reactor built on epoll readiness multiplexing, with:
//! - **Reactor**: registers descriptors, demultiplexes readiness events and
//!   dispatches acceptor-specific, signal-bridge-specific or generic
//!   readable/writable/disconnect callbacks ([`reactor::Reactor`])
//! - **Signal bridge**: the self-pipe trick, turning asynchronous signal
//!   delivery into a readable event ([`sigflow::SigFlow`])
//! - **Connection buffer**: per-connection byte slab with cursor-based
//!   incremental consumption and compaction ([`buffer::SockBuffer`])
//! - **Timer registry**: deadline-ordered timers with an optional background
//!   sweep thread ([`timer::TimerRegistry`])
//! - **HTTP request state machine**: progressive request-line/header/body
//!   parsing across partial reads ([`http::HttpParser`])
//!
//! ## Quick Start
//!
//! ```ignore
//! use fnet::{event, pattern, Reactor, TcpAcceptor};
//!
//! let acceptor = TcpAcceptor::new()?;
//! acceptor.bind("127.0.0.1:9090".parse()?)?;
//! acceptor.listen(TcpAcceptor::DEFAULT_BACKLOG)?;
//!
//! let mut reactor = Reactor::new()?;
//! let registrar = reactor.registrar()?;
//! reactor.register_acceptor(acceptor, move |fd| {
//!     fnet::util::set_nonblocking(fd).ok();
//!     registrar.register(fd, event::READABLE, pattern::ET).ok();
//! })?;
//! reactor.set_readable_cb(|fd| { /* drain fd */ });
//! reactor.run()?;
//! ```
//!
//! All socket callbacks run on the single thread driving [`Reactor::run`];
//! none of them may block. The only real parallelism is the timer
//! registry's optional sweep thread.

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod acceptor;
        pub mod buffer;
        pub mod http;
        pub mod reactor;
        pub mod sigflow;
        pub mod timer;
        pub mod trie;
        pub mod util;

        pub use acceptor::TcpAcceptor;
        pub use buffer::SockBuffer;
        pub use reactor::{event, pattern, Reactor, ReactorConfig, Registrar, StopHandle};
        pub use sigflow::SigFlow;
        pub use timer::{SweepStats, Timer, TimerRegistry};
        pub use trie::CbTrie;
    } else {
        compile_error!("fnet requires Linux (epoll readiness multiplexing)");
    }
}

pub use fnet_core::{NetError, NetResult};
