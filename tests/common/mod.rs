//! Common test utilities for kubetunnel integration tests
//!
//! This module provides shared test infrastructure including:
//! - Tracing setup
//! - Fixed and slow pod directories
//! - A loopback dialer that "forwards" to a local echo server
//! - Forwarding engines that delay, never become ready, or drop readiness

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use kubetunnel::k8s::{DialerFactory, PodDirectory, PodSummary, StreamDialer, TunnelStream};
use kubetunnel::selector::LabelQuery;
use kubetunnel::signals::{ReadySignal, StopSignal};
use kubetunnel::tunnel::{ForwardingEngine, PortMapping, ResolvedTarget, TcpForwarder};
use kubetunnel::TunnelError;

static TRACING: Once = Once::new();

/// Install a test subscriber once; honours RUST_LOG
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Directory
// ============================================================================

/// Directory returning the same pods for every query
pub struct StaticDirectory {
    pods: Vec<PodSummary>,
    calls: AtomicUsize,
}

impl StaticDirectory {
    pub fn new(pods: Vec<PodSummary>) -> Arc<Self> {
        Arc::new(Self { pods, calls: AtomicUsize::new(0) })
    }

    pub fn running(names: &[&str], namespace: &str) -> Arc<Self> {
        Self::new(names.iter().map(|n| PodSummary::new(*n, namespace, "Running")).collect())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PodDirectory for StaticDirectory {
    async fn list_running(
        &self,
        _namespace: Option<&str>,
        _selector: &LabelQuery,
    ) -> Result<Vec<PodSummary>, TunnelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.pods.clone())
    }
}

/// Directory that answers with one running pod after a delay
pub struct SlowDirectory {
    pub delay: Duration,
    calls: AtomicUsize,
}

impl SlowDirectory {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self { delay, calls: AtomicUsize::new(0) })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PodDirectory for SlowDirectory {
    async fn list_running(
        &self,
        _namespace: Option<&str>,
        _selector: &LabelQuery,
    ) -> Result<Vec<PodSummary>, TunnelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        Ok(vec![PodSummary::new("web-7f9c", "ns1", "Running")])
    }
}

/// Directory that always fails, for checking that lookups are skipped
pub struct UnreachableDirectory;

#[async_trait]
impl PodDirectory for UnreachableDirectory {
    async fn list_running(
        &self,
        _namespace: Option<&str>,
        _selector: &LabelQuery,
    ) -> Result<Vec<PodSummary>, TunnelError> {
        Err(TunnelError::Directory("directory unreachable".to_string()))
    }
}

// ============================================================================
// Dialers
// ============================================================================

/// Dialer that connects to a local TCP server instead of a pod
pub struct LoopbackDialer {
    target: ResolvedTarget,
    upstream: SocketAddr,
}

#[async_trait]
impl StreamDialer for LoopbackDialer {
    fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    async fn negotiate(&self, _remote_port: u16) -> Result<(), TunnelError> {
        TcpStream::connect(self.upstream).await
            .map(drop)
            .map_err(|e| TunnelError::Stream(e.to_string()))
    }

    async fn dial(&self, _remote_port: u16) -> Result<TunnelStream, TunnelError> {
        let stream = TcpStream::connect(self.upstream).await
            .map_err(|e| TunnelError::Stream(e.to_string()))?;
        Ok(Box::new(stream))
    }
}

pub struct LoopbackDialerFactory {
    upstream: SocketAddr,
}

impl LoopbackDialerFactory {
    pub fn new(upstream: SocketAddr) -> Arc<Self> {
        Arc::new(Self { upstream })
    }
}

impl DialerFactory for LoopbackDialerFactory {
    fn build(&self, target: &ResolvedTarget) -> Result<Arc<dyn StreamDialer>, TunnelError> {
        Ok(Arc::new(LoopbackDialer { target: target.clone(), upstream: self.upstream }))
    }
}

/// Factory whose transport negotiation always fails
pub struct BrokenDialerFactory;

impl DialerFactory for BrokenDialerFactory {
    fn build(&self, _target: &ResolvedTarget) -> Result<Arc<dyn StreamDialer>, TunnelError> {
        Err(TunnelError::DialerConstruction("no credentials".into()))
    }
}

// ============================================================================
// Engines
// ============================================================================

/// Waits before handing over to the real TCP forwarder
pub struct DelayedEngine {
    pub delay: Duration,
}

#[async_trait]
impl ForwardingEngine for DelayedEngine {
    async fn forward(
        &self,
        dialer: Arc<dyn StreamDialer>,
        ports: PortMapping,
        stop: StopSignal,
        ready: ReadySignal,
    ) -> Result<(), TunnelError> {
        tokio::time::sleep(self.delay).await;
        TcpForwarder.forward(dialer, ports, stop, ready).await
    }
}

/// Never becomes ready; exits when stopped
pub struct StalledEngine;

#[async_trait]
impl ForwardingEngine for StalledEngine {
    async fn forward(
        &self,
        _dialer: Arc<dyn StreamDialer>,
        _ports: PortMapping,
        stop: StopSignal,
        _ready: ReadySignal,
    ) -> Result<(), TunnelError> {
        stop.raised().await;
        Ok(())
    }
}

/// Drops its ready signal without firing it, then forwards nothing until stopped
pub struct SilentEngine;

#[async_trait]
impl ForwardingEngine for SilentEngine {
    async fn forward(
        &self,
        _dialer: Arc<dyn StreamDialer>,
        _ports: PortMapping,
        stop: StopSignal,
        ready: ReadySignal,
    ) -> Result<(), TunnelError> {
        drop(ready);
        stop.raised().await;
        Ok(())
    }
}

// ============================================================================
// Upstream
// ============================================================================

/// Start a TCP echo server standing in for the pod's port
pub async fn spawn_echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind echo server");
    let addr = listener.local_addr().expect("echo server address");

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if socket.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });

    addr
}

/// Send `payload` through the tunnel at `addr` and return what comes back
pub async fn round_trip(addr: SocketAddr, payload: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.expect("connect to tunnel");
    stream.write_all(payload).await.expect("write to tunnel");

    let mut buf = vec![0u8; payload.len()];
    stream.read_exact(&mut buf).await.expect("read from tunnel");
    buf
}
