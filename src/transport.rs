use std::future::Future;
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::io::unix::AsyncFd;
use tokio::time::{timeout_at, Instant};
use tracing::debug;

use crate::error::ProbeError;

/// Large enough for an IP header with options plus any echo reply we send.
const RECV_BUFFER_SIZE: usize = 1024;

/// Datagram send and bounded receive, as seen by the prober.
pub trait Transport {
    /// Send one datagram; failures are per-probe, never fatal.
    fn send_to(
        &self,
        packet: &[u8],
        destination: Ipv4Addr,
    ) -> impl Future<Output = io::Result<usize>> + Send;

    /// Wait at most `budget` for the next datagram. `Ok(None)` means the budget ran out.
    fn recv_within(
        &self,
        budget: Duration,
    ) -> impl Future<Output = io::Result<Option<Vec<u8>>>> + Send;
}

/// Raw IPv4 ICMP socket registered with the tokio reactor.
///
/// Dropping it closes the descriptor, so every exit path of a run releases it.
#[derive(Debug)]
pub struct IcmpSocket {
    inner: AsyncFd<Socket>,
}

impl IcmpSocket {
    pub fn open() -> Result<Self, ProbeError> {
        let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4))
            .map_err(ProbeError::from_socket_error)?;
        let opened = Self::from_socket(socket).map_err(ProbeError::Socket)?;
        debug!("raw icmp socket opened");
        Ok(opened)
    }

    /// Register an already created socket with the reactor.
    pub(crate) fn from_socket(socket: Socket) -> io::Result<Self> {
        socket.set_nonblocking(true)?;
        let inner = AsyncFd::new(socket)?;
        Ok(Self { inner })
    }
}

impl Transport for IcmpSocket {
    async fn send_to(&self, packet: &[u8], destination: Ipv4Addr) -> io::Result<usize> {
        // port is meaningless for ICMP
        let addr = SockAddr::from(SocketAddrV4::new(destination, 0));
        loop {
            let mut guard = self.inner.writable().await?;
            match guard.try_io(|inner| inner.get_ref().send_to(packet, &addr)) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    async fn recv_within(&self, budget: Duration) -> io::Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + budget;
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            let mut guard = match timeout_at(deadline, self.inner.readable()).await {
                Ok(guard) => guard?,
                Err(_elapsed) => return Ok(None),
            };
            let read = guard.try_io(|inner| {
                let mut socket: &Socket = inner.get_ref();
                socket.read(&mut buf)
            });
            match read {
                Ok(result) => {
                    let n = result?;
                    buf.truncate(n);
                    return Ok(Some(buf));
                }
                // spurious readiness, poll again with what is left of the budget
                Err(_would_block) => continue,
            }
        }
    }
}

impl Drop for IcmpSocket {
    fn drop(&mut self) {
        debug!("raw icmp socket closed");
    }
}
