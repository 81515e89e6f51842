//! Multi-service dial orchestration.

use crate::auth::{MetadataTokenProvider, TokenProvider};
use crate::config::DialerConfig;
use crate::connection::Connection;
use crate::context::CallContext;
use crate::error::DialerError;
use crate::factory::ConnectionFactory;
use crate::registry::ConnectionRegistry;
use crate::release::Release;
use crate::resolver::{DEFAULT_PORT, EndpointResolver, ManagedPlatform};
use crate::service::{Endpoint, ServiceName};
use crate::tls::TlsPolicy;
use crate::transport::{DialOptions, GrpcTransport, Transport};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

#[derive(Debug)]
struct DialerInner<T, P> {
    resolver: EndpointResolver,
    factory: ConnectionFactory<T, P>,
    defaults: DialOptions,
}

/// Resolves service names and dials them, one or many at a time.
///
/// Cloning is cheap: clones share the resolver, the transport and the token provider.
#[derive(Debug)]
pub struct Dialer<T = GrpcTransport, P = MetadataTokenProvider> {
    inner: Arc<DialerInner<T, P>>,
}

impl<T, P> Clone for Dialer<T, P> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl Dialer {
    /// Creates a new [`DialerBuilder`] with the production transport and token provider.
    pub fn builder() -> DialerBuilder {
        DialerBuilder::new()
    }

    /// Builds a production dialer from loaded configuration.
    ///
    /// # Errors
    /// Returns [`DialerError::Resolution`] when the managed platform is selected but not fully
    /// configured.
    pub fn from_config(config: &DialerConfig) -> Result<Self, DialerError> {
        Self::builder()
            .resolver(config.resolver()?)
            .token_provider(config.token_provider())
            .tls_policy(config.tls_policy())
            .default_options(config.dial_options())
            .build()
    }
}

impl<T: Transport, P: TokenProvider> Dialer<T, P> {
    #[must_use]
    pub fn resolver(&self) -> &EndpointResolver {
        &self.inner.resolver
    }

    pub fn factory(&self) -> &ConnectionFactory<T, P> {
        &self.inner.factory
    }

    /// Options every dial starts from; per-call options override them.
    #[must_use]
    pub fn default_options(&self) -> &DialOptions {
        &self.inner.defaults
    }

    /// Resolves and dials a single service.
    ///
    /// The returned [`Release`] closes the connection; it is a no-op when the dial failed.
    /// Errors carry the service name and resolved target as context.
    pub async fn dial_service(
        &self,
        ctx: &CallContext,
        service: impl Into<ServiceName>,
        use_tls: bool,
        auth_required: bool,
        options: &DialOptions,
    ) -> (Release, Result<Connection<T::Handle>, DialerError>) {
        let endpoint = self.inner.resolver.resolve(&service.into());
        let options = options.with_defaults(&self.inner.defaults);
        self.dial_endpoint(ctx, endpoint, use_tls, auth_required, &options).await
    }

    /// Dials every service in order and collects the connections into a registry.
    ///
    /// Dialing stops at the first failure, and later services are never attempted. Whatever
    /// the outcome, the returned [`Release`] owns every connection opened so far, so a
    /// partial failure never leaks. On failure the error names the failing service and no
    /// registry is returned.
    ///
    /// Dropping the returned future before it completes releases the connections it had
    /// already opened.
    pub async fn dial_services<I>(
        &self,
        ctx: &CallContext,
        services: I,
        use_tls: bool,
        auth_required: bool,
        options: &DialOptions,
    ) -> (Release, Result<ConnectionRegistry<T::Handle>, DialerError>)
    where
        I: IntoIterator,
        I::Item: Into<ServiceName>,
    {
        let services = services.into_iter();
        let options = options.with_defaults(&self.inner.defaults);
        let mut release = Release::noop();
        let mut registry = ConnectionRegistry::with_capacity(services.size_hint().0);

        for service in services {
            let endpoint = self.inner.resolver.resolve(&service.into());
            let (opened, result) =
                self.dial_endpoint(ctx, endpoint, use_tls, auth_required, &options).await;
            release.absorb(opened);

            match result {
                Ok(connection) => registry.push(connection),
                Err(e) => {
                    if !registry.is_empty() {
                        warn!(
                            opened = registry.len(),
                            "Dialing stopped early, opened connections are left to the release"
                        );
                    }
                    return (release, Err(e));
                },
            }
        }

        (release, Ok(registry))
    }

    /// Builds a fresh authenticated context for an already dialed connection.
    ///
    /// Identity tokens expire while channels stay open; call this before a batch of requests
    /// instead of reusing the dial-time context forever.
    ///
    /// # Errors
    /// Returns [`DialerError::Auth`] when the token cannot be obtained, or
    /// [`DialerError::Dial`] when the deadline of `ctx` passes first.
    pub async fn authenticate<H>(
        &self,
        ctx: &CallContext,
        connection: &Connection<H>,
        auth_required: bool,
    ) -> Result<CallContext, DialerError> {
        ctx.run(self.inner.factory.auth().attach(ctx.clone(), connection.target(), auth_required))
            .await
            .map_err(|e| e.wrap_context(format!("service '{}'", connection.service())))
    }

    #[instrument(skip_all, fields(service = %endpoint.service()))]
    async fn dial_endpoint(
        &self,
        ctx: &CallContext,
        endpoint: Endpoint,
        use_tls: bool,
        auth_required: bool,
        options: &DialOptions,
    ) -> (Release, Result<Connection<T::Handle>, DialerError>) {
        let context = format!("service '{}' ({})", endpoint.service(), endpoint.target());
        let (release, result) =
            self.inner.factory.dial(ctx, endpoint, use_tls, auth_required, options).await;

        match result {
            Ok(connection) => {
                info!(target = connection.target(), "Connection established");
                (release, Ok(connection))
            },
            Err(e) => {
                let e = e.wrap_context(context);
                warn!(error = %e, "Dial failed");
                (release, Err(e))
            },
        }
    }
}

#[derive(Debug, Default)]
enum Resolution {
    #[default]
    LocalDefault,
    Managed {
        project_id: String,
        region: String,
    },
    Custom(EndpointResolver),
}

/// A fluent builder for [`Dialer`].
///
/// Defaults: local resolution to `service:443`, [`GrpcTransport`], [`MetadataTokenProvider`]
/// against `metadata.google.internal`, a TLS policy that skips peer verification and empty
/// default dial options. The last resolution strategy set wins.
#[must_use = "builders do nothing unless you call .build()"]
#[derive(Debug)]
pub struct DialerBuilder<T = GrpcTransport, P = MetadataTokenProvider> {
    resolution: Resolution,
    port: Option<String>,
    transport: T,
    provider: P,
    tls: TlsPolicy,
    defaults: DialOptions,
}

impl Default for DialerBuilder {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            port: None,
            transport: GrpcTransport,
            provider: MetadataTokenProvider::default(),
            tls: TlsPolicy::default(),
            defaults: DialOptions::default(),
        }
    }
}

impl DialerBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Transport, P: TokenProvider> DialerBuilder<T, P> {
    /// Resolves through the managed platform naming scheme.
    pub fn managed(mut self, project_id: impl Into<String>, region: impl Into<String>) -> Self {
        self.resolution =
            Resolution::Managed { project_id: project_id.into(), region: region.into() };
        self
    }

    /// Port used by managed targets. Defaults to `443`.
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.port = Some(port.into());
        self
    }

    /// Resolves locally through `resolve`.
    pub fn local(
        mut self,
        resolve: impl Fn(&ServiceName) -> Endpoint + Send + Sync + 'static,
    ) -> Self {
        self.resolution = Resolution::Custom(EndpointResolver::local(resolve));
        self
    }

    /// Resolves locally through a static table, falling back to `fallback`.
    pub fn local_table(
        mut self,
        targets: HashMap<String, String>,
        fallback: impl Into<String>,
    ) -> Self {
        self.resolution = Resolution::Custom(EndpointResolver::local_table(targets, fallback));
        self
    }

    /// Uses a prebuilt resolver.
    pub fn resolver(mut self, resolver: EndpointResolver) -> Self {
        self.resolution = Resolution::Custom(resolver);
        self
    }

    pub const fn tls_policy(mut self, tls: TlsPolicy) -> Self {
        self.tls = tls;
        self
    }

    /// Options applied to every dial unless the call sets them itself.
    pub fn default_options(mut self, options: DialOptions) -> Self {
        self.defaults = options;
        self
    }

    /// Replaces the transport, e.g. with a test double.
    pub fn transport<U: Transport>(self, transport: U) -> DialerBuilder<U, P> {
        DialerBuilder {
            resolution: self.resolution,
            port: self.port,
            transport,
            provider: self.provider,
            tls: self.tls,
            defaults: self.defaults,
        }
    }

    /// Replaces the identity-token provider.
    pub fn token_provider<Q: TokenProvider>(self, provider: Q) -> DialerBuilder<T, Q> {
        DialerBuilder {
            resolution: self.resolution,
            port: self.port,
            transport: self.transport,
            provider,
            tls: self.tls,
            defaults: self.defaults,
        }
    }

    /// # Errors
    /// Returns [`DialerError::Resolution`] when managed resolution is selected with an empty
    /// project, region or port.
    pub fn build(self) -> Result<Dialer<T, P>, DialerError> {
        let resolver = match self.resolution {
            Resolution::LocalDefault => EndpointResolver::local_default(),
            Resolution::Managed { project_id, region } => {
                let port = self.port.as_deref().unwrap_or(DEFAULT_PORT);
                EndpointResolver::managed(ManagedPlatform::new(project_id, region, port)?)
            },
            Resolution::Custom(resolver) => resolver,
        };

        Ok(Dialer {
            inner: Arc::new(DialerInner {
                resolver,
                factory: ConnectionFactory::new(self.transport, self.provider, self.tls),
                defaults: self.defaults,
            }),
        })
    }
}
