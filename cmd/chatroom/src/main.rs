//! Chatroom Server
//!
//! Every byte a client sends is broadcast to all other connected clients,
//! prefixed with the sender's descriptor. SIGALRM drives a once-a-minute
//! occupancy report and SIGINT says goodbye to everyone before stopping.
//!
//! Run: fnet-chatroom <ip> <port>
//! Try: ncat 127.0.0.1 9091   (from two terminals)

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::net::SocketAddrV4;
use std::os::fd::RawFd;
use std::process::ExitCode;
use std::rc::Rc;

use fnet::{event, pattern, util, NetResult, Reactor, SigFlow, TcpAcceptor};
use fnet_core::kinfo;

const TICK_SECS: u32 = 60;

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

fn broadcast(members: &BTreeSet<RawFd>, from: Option<RawFd>, msg: &[u8]) {
    for &fd in members {
        if Some(fd) != from {
            write_all(fd, msg);
        }
    }
}

fn main() -> ExitCode {
    fnet_core::klog::init();
    let args: Vec<String> = std::env::args().collect();
    if args.len() != 3 {
        eprintln!("Usage: {} <ip> <port>", args[0]);
        return ExitCode::from(2);
    }
    let addr: SocketAddrV4 = match format!("{}:{}", args[1], args[2]).parse() {
        Ok(a) => a,
        Err(_) => {
            eprintln!("bad address: {} {}", args[1], args[2]);
            return ExitCode::from(2);
        }
    };
    match serve(addr) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("fnet-chatroom: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn serve(addr: SocketAddrV4) -> NetResult<()> {
    let acceptor = TcpAcceptor::new()?;
    util::set_reuse_address(acceptor.as_raw_fd())?;
    acceptor.bind(addr)?;
    acceptor.listen(TcpAcceptor::DEFAULT_BACKLOG)?;
    kinfo!("chatroom open on {}", acceptor.local_addr()?);

    let members: Rc<RefCell<BTreeSet<RawFd>>> = Rc::new(RefCell::new(BTreeSet::new()));

    let mut reactor = Reactor::new()?;
    let registrar = reactor.registrar()?;

    {
        let members = members.clone();
        reactor.register_acceptor(acceptor, move |cfd| {
            if registrar.register(cfd, event::READABLE, pattern::LT).is_err() {
                unsafe { libc::close(cfd) };
                return;
            }
            let room = members.borrow();
            broadcast(&room, None, format!("* [fd {}] joined\n", cfd).as_bytes());
            drop(room);
            members.borrow_mut().insert(cfd);
            write_all(cfd, b"* welcome to the room\n");
        })?;
    }

    {
        let members = members.clone();
        reactor.set_readable_cb(move |fd| {
            let mut buf = [0u8; 1024];
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n <= 0 {
                return;
            }
            let mut msg = format!("[fd {}] ", fd).into_bytes();
            msg.extend_from_slice(&buf[..n as usize]);
            broadcast(&members.borrow(), Some(fd), &msg);
        });
    }

    {
        let members = members.clone();
        reactor.set_disconnect_cb(move |fd| {
            members.borrow_mut().remove(&fd);
            unsafe { libc::close(fd) };
            broadcast(
                &members.borrow(),
                None,
                format!("* [fd {}] left\n", fd).as_bytes(),
            );
        });
    }

    let mut flow = SigFlow::new()?;
    {
        let members = members.clone();
        let stopper = reactor.stop_handle();
        flow.add_signal(
            libc::SIGINT,
            move || {
                broadcast(&members.borrow(), None, b"* server shutting down\n");
                stopper.stop();
            },
            false,
        )?;
    }
    {
        let members = members.clone();
        flow.add_signal(
            libc::SIGALRM,
            move || {
                kinfo!("{} online", members.borrow().len());
                unsafe { libc::alarm(TICK_SECS) };
            },
            true,
        )?;
    }
    reactor.register_sigflow(flow)?;
    unsafe { libc::alarm(TICK_SECS) };

    reactor.run()
}
