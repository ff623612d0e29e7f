//! Tunnel inputs, resolved targets and session states

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::selector::LabelQuery;

/// What to forward to: a pod picked by name or by labels, and the ports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    /// Exact pod name; takes precedence over `labels` when non-empty
    pub name: Option<String>,
    /// Label query used when no name is given
    pub labels: LabelQuery,
    /// Port inside the pod
    pub destination_port: u16,
    /// Namespace of the pod
    pub namespace: String,
    /// Fixed local port; a free one is picked when unset
    pub listen_port: Option<u16>,
}

impl TunnelSpec {
    /// Forward to a pod by its exact name
    pub fn by_name(name: impl Into<String>, namespace: impl Into<String>, destination_port: u16) -> Self {
        Self {
            name: Some(name.into()),
            labels: LabelQuery::default(),
            destination_port,
            namespace: namespace.into(),
            listen_port: None,
        }
    }

    /// Forward to the single running pod matching `labels`
    pub fn by_labels(labels: LabelQuery, namespace: impl Into<String>, destination_port: u16) -> Self {
        Self {
            name: None,
            labels,
            destination_port,
            namespace: namespace.into(),
            listen_port: None,
        }
    }

    pub fn with_listen_port(mut self, port: u16) -> Self {
        self.listen_port = Some(port);
        self
    }

    pub fn with_labels(mut self, labels: LabelQuery) -> Self {
        self.labels = labels;
        self
    }

    /// The pod name, if one was given and is non-empty
    pub fn exact_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|n| !n.is_empty())
    }
}

/// A single pod the tunnel will be dialed to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub name: String,
    pub namespace: String,
}

impl ResolvedTarget {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self { name: name.into(), namespace: namespace.into() }
    }
}

impl fmt::Display for ResolvedTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Local and remote ends of a tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub listen_address: IpAddr,
    pub local_port: u16,
    pub remote_port: u16,
}

impl PortMapping {
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_address, self.local_port)
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.local_port, self.remote_port)
    }
}

/// Lifecycle of a [`TunnelSession`](super::TunnelSession)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    New,
    Starting,
    Ready,
    Failed,
    Stopped,
}

impl SessionState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (New, Starting) | (Starting, Ready) | (Starting, Failed) | (Starting, Stopped) | (Ready, Stopped)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::New => "new",
            SessionState::Starting => "starting",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
            SessionState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}
