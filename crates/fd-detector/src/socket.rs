use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;

use crate::error::{FailureDetectorError, Result};

/// Bind a UDP socket to exactly `addr`.
///
/// Address reuse is left off so a port held by anyone else (another
/// responder, a monitor, an unrelated process) is reported as unavailable.
/// Must be called from within a Tokio runtime.
pub(crate) fn bind_udp(addr: SocketAddr) -> Result<UdpSocket> {
    let unavailable = |source| FailureDetectorError::PortUnavailable { addr, source };

    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))
        .map_err(unavailable)?;
    socket.bind(&addr.into()).map_err(unavailable)?;
    socket.set_nonblocking(true).map_err(unavailable)?;

    UdpSocket::from_std(socket.into()).map_err(unavailable)
}
