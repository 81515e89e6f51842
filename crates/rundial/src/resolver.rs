//! Environment-aware endpoint resolution.
//!
//! A resolver picks its strategy once, at construction, and keeps it for its whole lifetime:
//!
//! * **Managed platform**: targets are derived from the service name, project and region as
//!   `<service>-<project>-<region>.run.app:<port>`. No network access is involved.
//! * **Local**: a caller-supplied function maps names to endpoints. Without one, every service
//!   resolves to the placeholder [`DEFAULT_LOCAL_TARGET`].

use crate::error::DialerError;
use crate::service::{Endpoint, ServiceName};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Placeholder target used by the local strategy when nothing else is configured.
pub const DEFAULT_LOCAL_TARGET: &str = "service:443";
/// Port used when neither configuration nor `PORT` provide one.
pub const DEFAULT_PORT: &str = "443";
const MANAGED_DOMAIN: &str = ".run.app";

/// Maps a service name to an endpoint in local/dev environments.
pub type LocalResolveFn = Arc<dyn Fn(&ServiceName) -> Endpoint + Send + Sync>;

/// Naming parameters of the managed platform.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ManagedPlatform {
    project_id: String,
    region: String,
    port: String,
}

impl ManagedPlatform {
    /// # Errors
    /// Returns [`DialerError::Resolution`] when the project, region or port is empty.
    pub fn new(
        project_id: impl Into<String>,
        region: impl Into<String>,
        port: impl Into<String>,
    ) -> Result<Self, DialerError> {
        let platform =
            Self { project_id: project_id.into(), region: region.into(), port: port.into() };

        for (field, value) in [
            ("project_id", &platform.project_id),
            ("region", &platform.region),
            ("port", &platform.port),
        ] {
            if value.trim().is_empty() {
                return Err(DialerError::Resolution {
                    message: format!("{field} is required for managed-platform resolution").into(),
                    context: None,
                });
            }
        }

        Ok(platform)
    }

    fn target_for(&self, service: &ServiceName) -> String {
        let mut target = String::with_capacity(
            service.as_str().len()
                + self.project_id.len()
                + self.region.len()
                + self.port.len()
                + MANAGED_DOMAIN.len()
                + 3,
        );
        target.push_str(service.as_str());
        target.push('-');
        target.push_str(&self.project_id);
        target.push('-');
        target.push_str(&self.region);
        target.push_str(MANAGED_DOMAIN);
        target.push(':');
        target.push_str(&self.port);
        target
    }
}

#[derive(Clone)]
enum Strategy {
    Managed(ManagedPlatform),
    Local(LocalResolveFn),
}

/// Resolves logical service names into dialable endpoints.
#[derive(Clone)]
pub struct EndpointResolver {
    strategy: Strategy,
}

impl fmt::Debug for EndpointResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.strategy {
            Strategy::Managed(platform) => {
                f.debug_tuple("EndpointResolver::Managed").field(platform).finish()
            },
            Strategy::Local(_) => f.write_str("EndpointResolver::Local(..)"),
        }
    }
}

impl Default for EndpointResolver {
    fn default() -> Self {
        Self::local_default()
    }
}

impl EndpointResolver {
    #[must_use]
    pub const fn managed(platform: ManagedPlatform) -> Self {
        Self { strategy: Strategy::Managed(platform) }
    }

    pub fn local(resolve: impl Fn(&ServiceName) -> Endpoint + Send + Sync + 'static) -> Self {
        Self { strategy: Strategy::Local(Arc::new(resolve)) }
    }

    /// Local strategy that sends every service to [`DEFAULT_LOCAL_TARGET`].
    #[must_use]
    pub fn local_default() -> Self {
        Self::local(|service| Endpoint::new(service, DEFAULT_LOCAL_TARGET))
    }

    /// Local strategy backed by a static `service -> target` table.
    ///
    /// Services missing from the table resolve to `fallback`.
    pub fn local_table(targets: HashMap<String, String>, fallback: impl Into<String>) -> Self {
        let fallback = fallback.into();
        Self::local(move |service| {
            let target = targets.get(service.as_str()).unwrap_or(&fallback);
            Endpoint::new(service, target.as_str())
        })
    }

    #[must_use]
    pub const fn is_managed(&self) -> bool {
        matches!(self.strategy, Strategy::Managed(_))
    }

    pub fn resolve(&self, service: &ServiceName) -> Endpoint {
        let endpoint = match &self.strategy {
            Strategy::Managed(platform) => Endpoint::new(service, platform.target_for(service)),
            Strategy::Local(resolve) => resolve(service),
        };
        trace!(service = %service, target = endpoint.target(), "Resolved endpoint");
        endpoint
    }

    /// Resolves every name independently, preserving input order.
    pub fn resolve_all<I>(&self, services: I) -> Vec<Endpoint>
    where
        I: IntoIterator,
        I::Item: Into<ServiceName>,
    {
        services.into_iter().map(|s| self.resolve(&s.into())).collect()
    }
}
