//! Tunnel setup and lifecycle
//!
//! [`TunnelSession`] ties together local port selection, target resolution,
//! dialer construction and the forwarding engine.

pub mod engine;
pub mod port;
pub mod resolver;
pub mod session;
pub mod spec;

pub use engine::{ForwardingEngine, TcpForwarder};
pub use port::allocate_free_port;
pub use resolver::TargetResolver;
pub use session::TunnelSession;
pub use spec::{PortMapping, ResolvedTarget, SessionState, TunnelSpec};
