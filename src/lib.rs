//! kubetunnel library interface
//!
//! Port-forwards a local TCP port to a port inside a single Kubernetes pod,
//! chosen by exact name or by a label query.
//!
//! # Module Organization
//!
//! - [`tunnel`] - Session lifecycle, target resolution, forwarding engine
//! - [`k8s`] - Pod directory and port-forward dialer backed by the cluster API
//! - [`selector`] - Label queries (LabelQuery)
//! - [`signals`] - Stop and readiness signals
//! - [`config`] - Configuration (TunnelConfig)
//! - [`errors`] - Error types (TunnelError, Result)
//!
//! # Example
//! ```no_run
//! use kubetunnel::{LabelQuery, TunnelConfig, TunnelSession, TunnelSpec};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> kubetunnel::Result<()> {
//! let spec = TunnelSpec::by_labels(LabelQuery::new().label("app", "web"), "ns1", 80);
//! let session = TunnelSession::connect(spec, TunnelConfig::load_default()?).await?;
//! session.start(&CancellationToken::new()).await?;
//! println!("listening on {:?}", session.local_addr());
//! session.stop();
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod errors;
pub mod k8s;
pub mod selector;
pub mod signals;
pub mod tunnel;

pub use config::{LookupScope, TunnelConfig};
pub use errors::{Result, SetupPhase, TunnelError};
pub use selector::{LabelExpression, LabelOperator, LabelQuery};
pub use tunnel::{ResolvedTarget, SessionState, TunnelSession, TunnelSpec};
