//! Tunnel session lifecycle
//!
//! A session goes `New -> Starting -> Ready | Failed`, and `Starting | Ready
//! -> Stopped`. `start` is the only call that waits; `stop` only raises the
//! stop signal and lets the background engine task wind down on its own.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::TunnelConfig;
use crate::errors::TunnelError;
use crate::k8s::{DialerFactory, KubeDialerFactory, KubeDirectory, PodDirectory, StreamDialer};
use crate::signals::{self, StopSignal};

use super::engine::{ForwardingEngine, TcpForwarder};
use super::port::allocate_free_port;
use super::resolver::TargetResolver;
use super::spec::{PortMapping, ResolvedTarget, SessionState, TunnelSpec};

type EngineTask = JoinHandle<Result<(), TunnelError>>;

#[derive(Debug)]
struct SessionInner {
    state: SessionState,
    /// Set while `start` runs its setup steps, which happen in `New`
    setting_up: bool,
    local_port: Option<u16>,
    target: Option<ResolvedTarget>,
    task: Option<EngineTask>,
}

/// How the wait inside `start` ended
enum StartOutcome {
    Ready,
    EngineExited(Result<Result<(), TunnelError>, RecvError>),
    Cancelled,
    TimedOut,
}

/// Clears `setting_up` however `start` leaves its setup steps, including
/// when its future is dropped
struct SetupClaim<'a> {
    inner: &'a Mutex<SessionInner>,
}

impl Drop for SetupClaim<'_> {
    fn drop(&mut self) {
        lock(self.inner).setting_up = false;
    }
}

fn lock(inner: &Mutex<SessionInner>) -> MutexGuard<'_, SessionInner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A port forward from a local listener to one pod
pub struct TunnelSession {
    spec: TunnelSpec,
    config: TunnelConfig,
    resolver: TargetResolver,
    dialers: Arc<dyn DialerFactory>,
    engine: Arc<dyn ForwardingEngine>,
    stop: StopSignal,
    inner: Mutex<SessionInner>,
}

impl TunnelSession {
    /// Create a session talking to the cluster described by `config`
    pub async fn connect(spec: TunnelSpec, config: TunnelConfig) -> Result<Self, TunnelError> {
        let kube_config = config.kube_config().await?;
        let client = kube::Client::try_from(kube_config.clone())
            .map_err(|e| TunnelError::Config(format!("Could not create kubernetes client: {}", e)))?;

        Ok(Self::from_parts(
            spec,
            config,
            Arc::new(KubeDirectory::new(client)),
            Arc::new(KubeDialerFactory::new(kube_config)),
            Arc::new(TcpForwarder),
        ))
    }

    /// Create a session from explicit collaborators
    pub fn from_parts(
        spec: TunnelSpec,
        config: TunnelConfig,
        directory: Arc<dyn PodDirectory>,
        dialers: Arc<dyn DialerFactory>,
        engine: Arc<dyn ForwardingEngine>,
    ) -> Self {
        Self {
            resolver: TargetResolver::new(directory, config.lookup_scope),
            spec,
            config,
            dialers,
            engine,
            stop: StopSignal::new(),
            inner: Mutex::new(SessionInner {
                state: SessionState::New,
                setting_up: false,
                local_port: None,
                target: None,
                task: None,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        lock(&self.inner)
    }

    /// Move to `next` if the state machine allows it
    fn transition(&self, next: SessionState) -> bool {
        let mut inner = self.inner();
        if inner.state.can_transition_to(next) {
            debug!(from = %inner.state, to = %next, "Session state change");
            inner.state = next;
            true
        } else {
            false
        }
    }

    pub fn state(&self) -> SessionState {
        self.inner().state
    }

    /// The local port, known once `start` has chosen it
    pub fn local_port(&self) -> Option<u16> {
        self.inner().local_port
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_port().map(|port| SocketAddr::new(self.config.listen_address, port))
    }

    /// The pod the session forwards to, known once `start` has resolved it
    pub fn target(&self) -> Option<ResolvedTarget> {
        self.inner().target.clone()
    }

    /// Start the port forward and wait until it accepts connections.
    ///
    /// Returns once the tunnel is usable, once it has definitely failed, or
    /// when `cancel` fires. A cancelled (or timed out) session keeps its
    /// background task and must still be stopped. Dropping the returned
    /// future during setup leaves the session `New`.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<(), TunnelError> {
        let claim = {
            let mut inner = self.inner();
            if inner.setting_up {
                return Err(TunnelError::InvalidState(SessionState::Starting));
            }
            if inner.state != SessionState::New {
                return Err(TunnelError::InvalidState(inner.state));
            }
            if self.stop.is_raised() {
                return Err(TunnelError::StoppedBeforeReady);
            }
            inner.setting_up = true;
            SetupClaim { inner: &self.inner }
        };

        let (ports, target, dialer) = self.setup().await?;

        {
            let mut inner = self.inner();
            if self.stop.is_raised() {
                return Err(TunnelError::StoppedBeforeReady);
            }
            inner.state = SessionState::Starting;
            inner.local_port = Some(ports.local_port);
            inner.target = Some(target);
        }
        drop(claim);

        // The handle is stored before waiting so a dropped `start` cannot
        // detach it; the result goes to `start` if it is still listening.
        let (ready, waiter) = signals::ready_pair();
        let (done_tx, mut done_rx) = oneshot::channel();
        let engine = Arc::clone(&self.engine);
        let stop = self.stop.clone();
        let task: EngineTask = tokio::spawn(async move {
            let result = engine.forward(dialer, ports, stop, ready).await;
            match done_tx.send(result) {
                Ok(()) => Ok(()),
                Err(unclaimed) => unclaimed,
            }
        });
        self.inner().task = Some(task);

        let ready_timeout = self.config.ready_timeout();
        let timeout = async move {
            match ready_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(timeout);

        let ready = waiter.wait();
        tokio::pin!(ready);
        let mut ready_pending = true;

        let outcome = loop {
            tokio::select! {
                biased;
                fired = &mut ready, if ready_pending => {
                    if fired {
                        break StartOutcome::Ready;
                    }
                    ready_pending = false;
                }
                finished = &mut done_rx => break StartOutcome::EngineExited(finished),
                _ = cancel.cancelled() => break StartOutcome::Cancelled,
                _ = &mut timeout => break StartOutcome::TimedOut,
            }
        };

        match outcome {
            StartOutcome::Ready => {
                if !self.transition(SessionState::Ready) {
                    return Err(TunnelError::StoppedBeforeReady);
                }
                info!(local_port = ports.local_port, remote_port = ports.remote_port, "Started tunnel");
                Ok(())
            }
            StartOutcome::EngineExited(finished) => Err(self.engine_exited(finished)),
            StartOutcome::Cancelled => Err(TunnelError::Cancelled),
            StartOutcome::TimedOut => {
                let secs = ready_timeout.map(|d| d.as_secs_f64()).unwrap_or_default();
                Err(TunnelError::Timeout(secs))
            }
        }
    }

    /// Steps that run before the engine: port, target, dialer
    async fn setup(&self) -> Result<(PortMapping, ResolvedTarget, Arc<dyn StreamDialer>), TunnelError> {
        let local_port = match self.spec.listen_port {
            Some(port) => port,
            None => allocate_free_port(self.config.listen_address)?,
        };

        let target = self.resolver.resolve(&self.spec).await?;
        let dialer = self.dialers.build(&target)?;

        let ports = PortMapping {
            listen_address: self.config.listen_address,
            local_port,
            remote_port: self.spec.destination_port,
        };
        debug!(ports = %ports, pod = %target, "Tunnel setup complete");

        Ok((ports, target, dialer))
    }

    /// Map an engine that ended before readiness to the error `start` returns
    fn engine_exited(&self, finished: Result<Result<(), TunnelError>, RecvError>) -> TunnelError {
        let err = match finished {
            Ok(Ok(())) if self.stop.is_raised() => return TunnelError::StoppedBeforeReady,
            Ok(Ok(())) => TunnelError::EngineFailure("forwarding engine exited before becoming ready".to_string()),
            Ok(Err(err @ TunnelError::EngineFailure(_))) => err,
            Ok(Err(err)) => TunnelError::EngineFailure(err.to_string()),
            Err(_) => TunnelError::EngineFailure("forwarding task aborted".to_string()),
        };

        if self.transition(SessionState::Failed) {
            warn!(error = %err, "Port forward failed");
        }
        err
    }

    /// Request teardown. Never blocks; repeated calls are no-ops.
    pub fn stop(&self) {
        self.stop.raise();
        if self.transition(SessionState::Stopped) {
            info!(local_port = self.local_port(), "Stopping tunnel");
        }
    }

    /// Wait for the background engine task to finish.
    ///
    /// Only returns early for a running tunnel after `stop` has been called.
    pub async fn wait_stopped(&self) -> Result<(), TunnelError> {
        let task = self.inner().task.take();
        match task {
            Some(task) => task.await
                .map_err(|e| TunnelError::EngineFailure(format!("forwarding task aborted: {}", e)))?,
            None => Ok(()),
        }
    }
}

impl Drop for TunnelSession {
    fn drop(&mut self) {
        self.stop.raise();
    }
}
