//! Local port selection

use std::net::{IpAddr, SocketAddr, TcpListener};

use crate::errors::TunnelError;

/// Find an available local port on `address`
///
/// Binds port 0, reads back the port the OS picked and releases it again. The
/// port is only known to be free at the moment of return; another process may
/// take it before the tunnel binds.
pub fn allocate_free_port(address: IpAddr) -> Result<u16, TunnelError> {
    let listener = TcpListener::bind(SocketAddr::new(address, 0))
        .map_err(TunnelError::PortAllocation)?;

    let port = listener.local_addr()
        .map_err(TunnelError::PortAllocation)?
        .port();

    drop(listener);

    Ok(port)
}
