//! Turning a tunnel spec into exactly one pod

use std::sync::Arc;

use tracing::debug;

use crate::config::LookupScope;
use crate::errors::TunnelError;
use crate::k8s::PodDirectory;

use super::spec::{ResolvedTarget, TunnelSpec};

/// Resolves specs against a [`PodDirectory`]
#[derive(Clone)]
pub struct TargetResolver {
    directory: Arc<dyn PodDirectory>,
    scope: LookupScope,
}

impl TargetResolver {
    pub fn new(directory: Arc<dyn PodDirectory>, scope: LookupScope) -> Self {
        Self { directory, scope }
    }

    /// Resolve `spec` to a single pod.
    ///
    /// A non-empty name is returned as-is without a lookup. Otherwise the
    /// label query must match exactly one running pod; zero and several
    /// matches are both errors.
    pub async fn resolve(&self, spec: &TunnelSpec) -> Result<ResolvedTarget, TunnelError> {
        if let Some(name) = spec.exact_name() {
            return Ok(ResolvedTarget::new(name, &spec.namespace));
        }

        if spec.labels.is_empty() {
            return Err(TunnelError::InvalidSpec(
                "no selection criteria: neither pod name nor labels specified".to_string(),
            ));
        }
        spec.labels.validate()?;

        let namespace = match self.scope {
            LookupScope::Namespace => Some(spec.namespace.as_str()),
            LookupScope::AllNamespaces => None,
        };

        let mut running: Vec<_> = self.directory.list_running(namespace, &spec.labels).await?
            .into_iter()
            .filter(|pod| pod.is_running())
            .collect();

        let selector = spec.labels.to_string();
        debug!(selector = %selector, matches = running.len(), "Resolved label query");

        match running.len() {
            0 => Err(TunnelError::NotFound { selector }),
            1 => {
                let pod = running.remove(0);
                let namespace = if pod.namespace.is_empty() { spec.namespace.clone() } else { pod.namespace };
                Ok(ResolvedTarget::new(pod.name, namespace))
            }
            count => Err(TunnelError::AmbiguousTarget { selector, count }),
        }
    }
}
