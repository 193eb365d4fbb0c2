//! Blocking front end on `std::net::UdpSocket`.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::observe;
use crate::server::Bmc;
use crate::transport::MAX_DATAGRAM_SIZE;

/// How often an idle endpoint checks for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Blocking UDP server: one thread per endpoint, datagrams handled in arrival order.
pub struct UdpServer {
    bmc: Arc<Bmc>,
    sockets: Vec<UdpSocket>,
    shutdown: Arc<AtomicBool>,
}

impl UdpServer {
    /// Bind every endpoint of `bmc`.
    pub fn bind(bmc: Arc<Bmc>) -> Result<Self> {
        let endpoints = bmc.endpoints();
        Self::bind_to(bmc, &endpoints)
    }

    /// Bind explicit addresses, e.g. port 0 in tests.
    pub fn bind_to(bmc: Arc<Bmc>, addrs: &[SocketAddr]) -> Result<Self> {
        if addrs.is_empty() {
            return Err(Error::InvalidArgument("no endpoints to bind"));
        }
        let mut sockets = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let socket = UdpSocket::bind(addr)?;
            socket.set_read_timeout(Some(POLL_INTERVAL))?;
            sockets.push(socket);
        }
        Ok(Self {
            bmc,
            sockets,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Bound addresses, in bind order.
    pub fn local_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.sockets
            .iter()
            .map(|s| s.local_addr().map_err(Error::from))
            .collect()
    }

    /// Flag that makes [`Self::serve`] return once set.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Serve until the shutdown flag is set.
    pub fn serve(self) -> Result<()> {
        let mut threads = Vec::with_capacity(self.sockets.len());
        for socket in self.sockets {
            let bmc = Arc::clone(&self.bmc);
            let shutdown = Arc::clone(&self.shutdown);
            threads.push(thread::spawn(move || serve_socket(&bmc, &socket, &shutdown)));
        }

        let mut result = Ok(());
        for t in threads {
            match t.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => result = Err(e),
                Err(_) => result = Err(Error::Io(io::Error::other("endpoint thread panicked"))),
            }
        }
        result
    }
}

fn serve_socket(bmc: &Bmc, socket: &UdpSocket, shutdown: &AtomicBool) -> Result<()> {
    let local = socket.local_addr()?;
    observe::endpoint_listening(local);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    while !shutdown.load(Ordering::Relaxed) {
        let (n, peer) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if is_timeout(&e) => continue,
            Err(e) => {
                observe::recv_failed(local, &e);
                continue;
            }
        };

        if let Some(reply) = bmc.handle_datagram(local, peer, &buf[..n]) {
            if let Err(e) = socket.send_to(&reply, peer) {
                observe::send_failed(peer, &e);
            }
        }
    }
    Ok(())
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
    )
}
