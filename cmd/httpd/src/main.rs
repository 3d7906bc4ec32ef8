//! Minimal HTTP Server
//!
//! One reactor thread, one parser, one buffer per connection. Requests are
//! answered with a small plain-text page naming the URL; pipelined and
//! partially-delivered requests are handled by the resumable parser.
//!
//! Run: fnet-httpd [ip] [port]      (defaults: 0.0.0.0 8080)
//! Try: curl http://127.0.0.1:8080/hello

use std::cell::RefCell;
use std::collections::HashMap;
use std::net::SocketAddrV4;
use std::os::fd::RawFd;
use std::process::ExitCode;
use std::rc::Rc;

use fnet::http::{HttpParser, HttpRequest, ParseStatus};
use fnet::{event, pattern, util, NetResult, Reactor, SigFlow, TcpAcceptor};
use fnet_core::{kdebug, kinfo};

const REQ_BUF_SZ: usize = 8 * 1024;

fn write_all(fd: RawFd, bytes: &[u8]) {
    let mut off = 0usize;
    while off < bytes.len() {
        let n = unsafe {
            libc::write(
                fd,
                bytes[off..].as_ptr() as *const libc::c_void,
                bytes.len() - off,
            )
        };
        if n <= 0 {
            return;
        }
        off += n as usize;
    }
}

fn respond(fd: RawFd, req: &HttpRequest) {
    let url = req
        .request_line()
        .map(|l| l.url.as_str())
        .unwrap_or("/");
    let body = format!("You requested {}\n", url);
    let head = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: {}\r\n\r\n",
        body.len()
    );
    write_all(fd, head.as_bytes());
    write_all(fd, body.as_bytes());
}

fn main() -> ExitCode {
    fnet_core::klog::init();
    let mut args = std::env::args().skip(1);
    let ip = args.next().unwrap_or_else(|| "0.0.0.0".into());
    let port = args.next().unwrap_or_else(|| "8080".into());
    let addr: SocketAddrV4 = match format!("{}:{}", ip, port).parse() {
        Ok(a) => a,
        Err(_) => {
            eprintln!("Usage: fnet-httpd [ip] [port]");
            return ExitCode::from(2);
        }
    };
    match serve(addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fnet-httpd: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn serve(addr: SocketAddrV4) -> NetResult<()> {
    let acceptor = TcpAcceptor::new()?;
    util::set_reuse_address(acceptor.as_raw_fd())?;
    acceptor.bind(addr)?;
    acceptor.listen(TcpAcceptor::DEFAULT_BACKLOG)?;
    kinfo!("httpd listening on {}", acceptor.local_addr()?);

    let mut parser = HttpParser::new();
    parser.on_field("Content-Length", |req, value| {
        if let Ok(n) = std::str::from_utf8(value).unwrap_or("").parse() {
            req.set_content_length(n);
        }
    })?;
    parser.on_request_line(|line| kdebug!("{:?} {}", line.method, line.url));

    let requests: Rc<RefCell<HashMap<RawFd, HttpRequest>>> =
        Rc::new(RefCell::new(HashMap::new()));

    let mut reactor = Reactor::new()?;
    let registrar = reactor.registrar()?;

    {
        let requests = requests.clone();
        reactor.register_acceptor(acceptor, move |cfd| {
            if registrar.register(cfd, event::READABLE, pattern::ET).is_err() {
                unsafe { libc::close(cfd) };
                return;
            }
            requests
                .borrow_mut()
                .insert(cfd, HttpRequest::new(cfd, REQ_BUF_SZ));
        })?;
    }

    {
        let requests = requests.clone();
        reactor.set_readable_cb(move |fd| {
            let mut map = requests.borrow_mut();
            let req = match map.get_mut(&fd) {
                Some(r) => r,
                None => return,
            };
            let mut bad = false;
            loop {
                match parser.process(req) {
                    ParseStatus::Completed => respond(fd, req),
                    ParseStatus::Suspended => break,
                    ParseStatus::Error => {
                        bad = true;
                        break;
                    }
                }
            }
            if bad {
                kinfo!("bad request on fd {}", fd);
                map.remove(&fd);
                unsafe { libc::close(fd) };
            }
        });
    }

    {
        let requests = requests.clone();
        reactor.set_disconnect_cb(move |fd| {
            requests.borrow_mut().remove(&fd);
            unsafe { libc::close(fd) };
        });
    }

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

    reactor.run()
}
