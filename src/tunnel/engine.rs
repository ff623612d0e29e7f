//! Forwarding engine: local listener relaying into dialed pod streams

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::errors::TunnelError;
use crate::k8s::StreamDialer;
use crate::signals::{ReadySignal, StopSignal};

use super::spec::PortMapping;

/// Pause after a failed accept, e.g. when the process is out of descriptors
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Runs a tunnel for its whole lifetime
///
/// Implementations bind the local end, fire `ready` only once connections are
/// accepted, and return when `stop` is raised. An error return means the
/// tunnel could not start or died.
#[async_trait]
pub trait ForwardingEngine: Send + Sync {
    async fn forward(
        &self,
        dialer: Arc<dyn StreamDialer>,
        ports: PortMapping,
        stop: StopSignal,
        ready: ReadySignal,
    ) -> Result<(), TunnelError>;
}

/// TCP listener that opens one dialed stream per accepted connection
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpForwarder;

#[async_trait]
impl ForwardingEngine for TcpForwarder {
    async fn forward(
        &self,
        dialer: Arc<dyn StreamDialer>,
        ports: PortMapping,
        stop: StopSignal,
        ready: ReadySignal,
    ) -> Result<(), TunnelError> {
        let addr = ports.local_addr();
        let listener = TcpListener::bind(addr).await
            .map_err(|e| TunnelError::EngineFailure(format!("unable to listen on {}: {}", addr, e)))?;

        tokio::select! {
            biased;
            _ = stop.raised() => return Ok(()),
            negotiated = dialer.negotiate(ports.remote_port) => {
                negotiated.map_err(|e| TunnelError::EngineFailure(e.to_string()))?;
            }
        }

        info!(local = %addr, remote_port = ports.remote_port, pod = %dialer.target(), "Forwarding");
        ready.fire();

        loop {
            tokio::select! {
                biased;
                _ = stop.raised() => {
                    info!(local = %addr, "Port forward stopping");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((socket, peer)) => {
                            let dialer = Arc::clone(&dialer);
                            let cancel = stop.child_token();
                            tokio::spawn(relay(socket, peer, dialer, ports.remote_port, cancel));
                        }
                        Err(e) => {
                            warn!(local = %addr, error = %e, "Failed to accept connection");
                            accept_backoff(&stop).await;
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Sleep for [`ACCEPT_BACKOFF`], or less if `stop` is raised meanwhile
async fn accept_backoff(stop: &StopSignal) {
    tokio::select! {
        _ = stop.raised() => {}
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
    }
}

/// Copy bytes both ways between one local connection and a new pod stream
async fn relay(
    mut socket: TcpStream,
    peer: SocketAddr,
    dialer: Arc<dyn StreamDialer>,
    remote_port: u16,
    cancel: CancellationToken,
) {
    debug!(%peer, "Handling connection");

    let mut upstream = tokio::select! {
        _ = cancel.cancelled() => return,
        dialed = dialer.dial(remote_port) => match dialed {
            Ok(stream) => stream,
            Err(e) => {
                warn!(%peer, error = %e, "Could not open stream to pod");
                return;
            }
        },
    };

    tokio::select! {
        _ = cancel.cancelled() => debug!(%peer, "Connection closed by stop"),
        copied = tokio::io::copy_bidirectional(&mut socket, &mut upstream) => match copied {
            Ok((sent, received)) => debug!(%peer, sent, received, "Connection closed"),
            Err(e) => warn!(%peer, error = %e, "Relay error"),
        },
    }
}
