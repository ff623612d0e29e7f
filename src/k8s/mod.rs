//! Kubernetes integration module
//!
//! Pod lookup by label query and stream dialing through the pod
//! `portforward` sub-resource. Both sit behind traits so the tunnel logic can
//! run against in-process doubles.

pub mod dialer;
pub mod directory;

pub use dialer::{DialerFactory, KubeDialer, KubeDialerFactory, StreamDialer, TunnelIo, TunnelStream};
pub use directory::{KubeDirectory, PodDirectory, PodSummary, RUNNING_PHASE};
