//! Stream dialing into a pod's port-forward sub-resource

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::Api;
use kube::Client;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

use crate::errors::TunnelError;
use crate::tunnel::ResolvedTarget;

/// Byte stream relayed between a local connection and the pod
pub trait TunnelIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> TunnelIo for T {}

pub type TunnelStream = Box<dyn TunnelIo>;

/// Opens streams to one resolved pod
#[async_trait]
pub trait StreamDialer: Send + Sync {
    /// The pod this dialer is bound to
    fn target(&self) -> &ResolvedTarget;

    /// Complete one upgrade round trip without keeping a stream open.
    ///
    /// Used before readiness is announced so that a successful start implies
    /// the remote side is reachable.
    async fn negotiate(&self, remote_port: u16) -> Result<(), TunnelError>;

    /// Open a new stream to `remote_port` inside the pod
    async fn dial(&self, remote_port: u16) -> Result<TunnelStream, TunnelError>;
}

/// Builds a dialer for a resolved target
pub trait DialerFactory: Send + Sync {
    fn build(&self, target: &ResolvedTarget) -> Result<Arc<dyn StreamDialer>, TunnelError>;
}

/// [`StreamDialer`] speaking the websocket port-forward protocol
pub struct KubeDialer {
    target: ResolvedTarget,
    upgrade_url: String,
    pods: Api<Pod>,
}

impl KubeDialer {
    /// Negotiate the upgrade transport from `config` and bind it to `target`.
    ///
    /// No retries happen here; a failure is reported once.
    pub fn build(config: &kube::Config, target: &ResolvedTarget) -> Result<Self, TunnelError> {
        let client = Client::try_from(config.clone())
            .map_err(|e| TunnelError::DialerConstruction(Box::new(e)))?;

        let upgrade_url = format!(
            "{}/api/v1/namespaces/{}/pods/{}/portforward",
            config.cluster_url.to_string().trim_end_matches('/'),
            target.namespace,
            target.name,
        );

        Ok(Self {
            target: target.clone(),
            upgrade_url,
            pods: Api::namespaced(client, &target.namespace),
        })
    }

    /// URL of the port-forward sub-resource the upgrade is sent to
    pub fn upgrade_url(&self) -> &str {
        &self.upgrade_url
    }

    fn stream_error(&self, e: impl std::fmt::Display) -> TunnelError {
        TunnelError::Stream(format!("port forward to {} failed: {}", self.target, e))
    }
}

#[async_trait]
impl StreamDialer for KubeDialer {
    fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    async fn negotiate(&self, remote_port: u16) -> Result<(), TunnelError> {
        debug!(url = %self.upgrade_url, "Negotiating port forward upgrade");
        let forwarder = self.pods.portforward(&self.target.name, &[remote_port]).await
            .map_err(|e| self.stream_error(e))?;
        drop(forwarder);
        Ok(())
    }

    async fn dial(&self, remote_port: u16) -> Result<TunnelStream, TunnelError> {
        let mut forwarder = self.pods.portforward(&self.target.name, &[remote_port]).await
            .map_err(|e| self.stream_error(e))?;

        let stream = forwarder.take_stream(remote_port)
            .ok_or_else(|| self.stream_error(format!("port {} not found in forwarder", remote_port)))?;
        let remote_error = forwarder.take_error(remote_port);

        let target = self.target.clone();
        tokio::spawn(async move {
            if let Some(remote_error) = remote_error {
                if let Some(message) = remote_error.await {
                    warn!(pod = %target, remote_port, error = %message, "Pod reported port forward error");
                }
            }
            if let Err(e) = forwarder.join().await {
                debug!(pod = %target, error = %e, "Port forward stream closed with error");
            }
        });

        Ok(Box::new(stream))
    }
}

/// [`DialerFactory`] producing [`KubeDialer`]s from one cluster config
#[derive(Clone)]
pub struct KubeDialerFactory {
    config: kube::Config,
}

impl KubeDialerFactory {
    pub fn new(config: kube::Config) -> Self {
        Self { config }
    }
}

impl DialerFactory for KubeDialerFactory {
    fn build(&self, target: &ResolvedTarget) -> Result<Arc<dyn StreamDialer>, TunnelError> {
        Ok(Arc::new(KubeDialer::build(&self.config, target)?))
    }
}
