//! Error types for kubetunnel

use std::fmt;
use thiserror::Error;

use crate::tunnel::SessionState;

/// Setup step of a tunnel that an error originated from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupPhase {
    /// Choosing the local port
    ListenPort,
    /// Turning a `TunnelSpec` into a single pod
    ResolveTarget,
    /// Negotiating the upgrade transport
    BuildDialer,
    /// Running the forwarding engine
    Forward,
}

impl fmt::Display for SetupPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SetupPhase::ListenPort => "listen-port",
            SetupPhase::ResolveTarget => "resolve-target",
            SetupPhase::BuildDialer => "build-dialer",
            SetupPhase::Forward => "forward",
        };
        f.write_str(name)
    }
}

/// Main error type for kubetunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Invalid tunnel spec: {0}")]
    InvalidSpec(String),

    #[error("Could not find a port to bind to: {0}")]
    PortAllocation(#[source] std::io::Error),

    #[error("Could not get pod name: could not find running pod for selector: labels \"{selector}\"")]
    NotFound { selector: String },

    #[error("Could not get pod name: ambiguous pod: found {count} pods for selector: labels \"{selector}\"")]
    AmbiguousTarget { selector: String, count: usize },

    #[error("Could not get pod name: listing pods in kubernetes: {0}")]
    Directory(String),

    #[error("Could not create a dialer: {0}")]
    DialerConstruction(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Could not create port forward: {0}")]
    EngineFailure(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Port forward start cancelled")]
    Cancelled,

    #[error("Port forward stopped before it became ready")]
    StoppedBeforeReady,

    #[error("Timeout after {0:.1} seconds waiting for port forward")]
    Timeout(f64),

    #[error("Session is {0}; start requires a new session")]
    InvalidState(SessionState),

    #[error("Config error: {0}")]
    Config(String),
}

impl TunnelError {
    /// The setup step this error belongs to, if it came from one
    pub fn phase(&self) -> Option<SetupPhase> {
        match self {
            TunnelError::PortAllocation(_) => Some(SetupPhase::ListenPort),
            TunnelError::InvalidSpec(_)
            | TunnelError::NotFound { .. }
            | TunnelError::AmbiguousTarget { .. }
            | TunnelError::Directory(_) => Some(SetupPhase::ResolveTarget),
            TunnelError::DialerConstruction(_) => Some(SetupPhase::BuildDialer),
            TunnelError::EngineFailure(_)
            | TunnelError::Cancelled
            | TunnelError::StoppedBeforeReady
            | TunnelError::Timeout(_) => Some(SetupPhase::Forward),
            TunnelError::Stream(_)
            | TunnelError::InvalidState(_)
            | TunnelError::Config(_) => None,
        }
    }
}

impl From<kube::Error> for TunnelError {
    fn from(err: kube::Error) -> Self {
        TunnelError::Directory(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TunnelError>;
