//! TCP Echo Server
//!
//! Edge-triggered echo on a single reactor thread. Ctrl-C (SIGINT) stops
//! the loop cleanly through the signal bridge.
//!
//! Run: fnet-echo [ip] [port]      (defaults: 0.0.0.0 9090)
//! Try: ncat 127.0.0.1 9090

use std::net::SocketAddrV4;
use std::process::ExitCode;
use std::time::Duration;

use fnet::{event, pattern, util, NetResult, Reactor, ReactorConfig, SigFlow, TcpAcceptor};
use fnet_core::kinfo;

fn main() -> ExitCode {
    fnet_core::klog::init();
    match serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fnet-echo: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn serve() -> NetResult<()> {
    let mut args = std::env::args().skip(1);
    let ip = args.next().unwrap_or_else(|| "0.0.0.0".into());
    let port = args.next().unwrap_or_else(|| "9090".into());
    let addr: SocketAddrV4 = match format!("{}:{}", ip, port).parse() {
        Ok(a) => a,
        Err(_) => {
            eprintln!("Usage: fnet-echo [ip] [port]");
            std::process::exit(2);
        }
    };

    let acceptor = TcpAcceptor::new()?;
    util::set_reuse_address(acceptor.as_raw_fd())?;
    acceptor.bind(addr)?;
    acceptor.listen(TcpAcceptor::DEFAULT_BACKLOG)?;
    kinfo!("echo server listening on {}", acceptor.local_addr()?);

    let mut reactor = Reactor::with_config(ReactorConfig::from_env())?;

    let registrar = reactor.registrar()?;
    reactor.register_acceptor(acceptor, move |cfd| {
        if let Ok(peer) = util::peer_addr(cfd) {
            kinfo!("connected: fd {} from {}", cfd, peer);
        }
        if let Err(e) = registrar.register(cfd, event::READABLE, pattern::ET) {
            kinfo!("register fd {} failed: {}", cfd, e);
            unsafe { libc::close(cfd) };
        }
    })?;

    // Edge-triggered: drain until the read would block.
    reactor.set_readable_cb(|fd| {
        let mut buf = [0u8; 4096];
        loop {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n <= 0 {
                break;
            }
            let mut off = 0usize;
            while off < n as usize {
                let w = unsafe {
                    libc::write(
                        fd,
                        buf[off..].as_ptr() as *const libc::c_void,
                        n as usize - off,
                    )
                };
                if w <= 0 {
                    return;
                }
                off += w as usize;
            }
        }
    });

    reactor.set_disconnect_cb(|fd| {
        kinfo!("disconnected: fd {}", fd);
        unsafe { libc::close(fd) };
    });

    let mut flow = SigFlow::new()?;
    let stopper = reactor.stop_handle();
    flow.add_signal(
        libc::SIGINT,
        move || {
            kinfo!("SIGINT: shutting down");
            stopper.stop();
        },
        false,
    )?;
    reactor.register_sigflow(flow)?;

    // Quiet-period heartbeat so idle servers still show signs of life.
    reactor.set_timeout(Duration::from_secs(30), || {
        kinfo!("idle");
    });

    reactor.run()
}
