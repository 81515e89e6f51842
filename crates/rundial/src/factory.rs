//! Opens a single authenticated connection to a resolved endpoint.

use crate::auth::{AuthInjector, TokenProvider};
use crate::connection::Connection;
use crate::context::CallContext;
use crate::error::DialerError;
use crate::release::Release;
use crate::service::Endpoint;
use crate::tls::TlsPolicy;
use crate::transport::{DialOptions, Security, Transport};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Dials endpoints through a [`Transport`], attaching credentials first.
#[derive(Debug)]
pub struct ConnectionFactory<T, P> {
    transport: Arc<T>,
    auth: AuthInjector<P>,
    tls: TlsPolicy,
}

impl<T: Transport, P: TokenProvider> ConnectionFactory<T, P> {
    pub fn new(transport: T, provider: P, tls: TlsPolicy) -> Self {
        Self { transport: Arc::new(transport), auth: AuthInjector::new(provider), tls }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub const fn auth(&self) -> &AuthInjector<P> {
        &self.auth
    }

    pub const fn tls_policy(&self) -> TlsPolicy {
        self.tls
    }

    /// Authenticates `ctx` for the endpoint and opens a transport handle to it.
    ///
    /// On success the returned [`Release`] closes the handle exactly once. On failure no
    /// handle exists and the release is a no-op. Both steps run under the deadline of `ctx`.
    #[instrument(
        skip_all,
        fields(
            service = %endpoint.service(),
            target = endpoint.target(),
            tls = use_tls,
            auth = auth_required,
        )
    )]
    pub async fn dial(
        &self,
        ctx: &CallContext,
        endpoint: Endpoint,
        use_tls: bool,
        auth_required: bool,
        options: &DialOptions,
    ) -> (Release, Result<Connection<T::Handle>, DialerError>) {
        match self.open(ctx, endpoint, use_tls, auth_required, options).await {
            Ok(connection) => {
                let transport = Arc::clone(&self.transport);
                let handle = connection.handle().clone();
                let release = Release::from_fn(move || transport.close(handle));
                (release, Ok(connection))
            },
            Err(e) => (Release::noop(), Err(e)),
        }
    }

    async fn open(
        &self,
        ctx: &CallContext,
        endpoint: Endpoint,
        use_tls: bool,
        auth_required: bool,
        options: &DialOptions,
    ) -> Result<Connection<T::Handle>, DialerError> {
        let (service, target) = endpoint.into_parts();

        let context = ctx.run(self.auth.attach(ctx.clone(), &target, auth_required)).await?;

        let security = if use_tls {
            if !self.tls.verifies_peer() {
                debug!("TLS peer verification is disabled");
            }
            Security::Tls(self.tls)
        } else {
            Security::Plaintext
        };

        let handle = ctx.run(self.transport.connect(&target, security, options)).await?;
        debug!(lazy = options.lazy, "Transport handle opened");

        Ok(Connection::new(service, target, handle, context))
    }
}
