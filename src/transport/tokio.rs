//! Tokio front end.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::task::JoinSet;

use crate::error::{Error, Result};
use crate::observe;
use crate::server::Bmc;
use crate::transport::MAX_DATAGRAM_SIZE;

/// Tokio UDP server.
///
/// Each datagram becomes its own task; handling runs on the blocking pool because target
/// operations may shell out. Replies are sent fire-and-forget.
pub struct UdpServer {
    bmc: Arc<Bmc>,
    sockets: Vec<Arc<UdpSocket>>,
}

impl UdpServer {
    /// Bind every endpoint of `bmc`.
    pub async fn bind(bmc: Arc<Bmc>) -> Result<Self> {
        let endpoints = bmc.endpoints();
        Self::bind_to(bmc, &endpoints).await
    }

    /// Bind explicit addresses, e.g. port 0 in tests.
    pub async fn bind_to(bmc: Arc<Bmc>, addrs: &[SocketAddr]) -> Result<Self> {
        if addrs.is_empty() {
            return Err(Error::InvalidArgument("no endpoints to bind"));
        }
        let mut sockets = Vec::with_capacity(addrs.len());
        for addr in addrs {
            sockets.push(Arc::new(UdpSocket::bind(addr).await?));
        }
        Ok(Self { bmc, sockets })
    }

    /// Bound addresses, in bind order.
    pub fn local_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.sockets
            .iter()
            .map(|s| s.local_addr().map_err(Error::from))
            .collect()
    }

    /// Serve forever. Returns only if an endpoint task fails.
    pub async fn serve(self) -> Result<()> {
        let mut endpoints = JoinSet::new();
        for socket in self.sockets {
            endpoints.spawn(serve_socket(Arc::clone(&self.bmc), socket));
        }

        while let Some(joined) = endpoints.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => return Err(Error::Io(std::io::Error::other(e))),
            }
        }
        Ok(())
    }
}

async fn serve_socket(bmc: Arc<Bmc>, socket: Arc<UdpSocket>) -> Result<()> {
    let local = socket.local_addr()?;
    observe::endpoint_listening(local);
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (n, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                observe::recv_failed(local, &e);
                continue;
            }
        };
        let datagram = buf[..n].to_vec();
        let bmc = Arc::clone(&bmc);
        let socket = Arc::clone(&socket);

        tokio::spawn(async move {
            let handled =
                tokio::task::spawn_blocking(move || bmc.handle_datagram(local, peer, &datagram))
                    .await;
            if let Ok(Some(reply)) = handled {
                if let Err(e) = socket.send_to(&reply, peer).await {
                    observe::send_failed(peer, &e);
                }
            }
        });
    }
}
