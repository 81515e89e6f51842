//! Environment-aware gRPC dialing for peer services on a managed serverless platform.
//!
//! This crate resolves logical service names to `host:port` targets, opens authenticated
//! (and optionally encrypted) `tonic` channels to them, and hands back the connections in a
//! registry together with a single [`Release`] guard that closes them all.
//!
//! ## Resolution
//!
//! The strategy is fixed when the [`Dialer`] is built:
//!
//! * **managed** (`ENVIRONMENT=production`): `<service>-<project>-<region>.run.app:<port>`;
//! * **local**: a caller-supplied function or a static table. Without either, every service
//!   resolves to `service:443`.
//!
//! ## Authentication
//!
//! When a dial requires auth, an identity token is fetched for the audience
//! `https://<target host>` and installed as `authorization: Bearer <token>`. Installing the
//! token **replaces** the outgoing metadata of the call context.
//!
//! ## Partial failure
//!
//! [`Dialer::dial_services`] dials in order and stops at the first failure. The returned
//! [`Release`] always owns every connection opened before the failure, and releasing it twice
//! is harmless.
//!
//! ## Example
//!
//! ```rust,no_run
//! use rundial::prelude::*;
//!
//! # async fn run() -> Result<(), DialerError> {
//! let dialer = Dialer::builder().managed("proj1", "us-central1").build()?;
//! let ctx = CallContext::new().with_timeout(std::time::Duration::from_secs(10));
//!
//! let (release, registry) =
//!     dialer.dial_services(&ctx, ["users", "orders"], true, true, &DialOptions::default()).await;
//! let registry = registry?;
//!
//! let users = registry.find("users")?;
//! let _channel = users.channel();
//! let _request = users.request(());
//!
//! release.release();
//! # Ok(())
//! # }
//! ```

mod auth;
pub mod config;
mod connection;
mod context;
mod dialer;
mod error;
mod factory;
mod registry;
mod release;
mod resolver;
mod service;
mod tls;
mod transport;

pub use auth::{
    AuthInjector, DEFAULT_METADATA_HOST, MetadataTokenProvider, StaticTokenProvider,
    TokenProvider, audience_for,
};
pub use crate::config::{DialerConfig, load_config};
pub use connection::Connection;
pub use context::CallContext;
pub use dialer::{Dialer, DialerBuilder};
pub use error::{BoxError, DialerError, DialerErrorExt, Result};
pub use factory::ConnectionFactory;
pub use registry::ConnectionRegistry;
pub use release::Release;
pub use resolver::{
    DEFAULT_LOCAL_TARGET, DEFAULT_PORT, EndpointResolver, LocalResolveFn, ManagedPlatform,
};
pub use service::{Endpoint, ServiceName};
pub use tls::TlsPolicy;
pub use transport::{
    DialOptions, GrpcChannel, GrpcTransport, Interceptor, SPAN_ID_HEADER, Security, SpanPropagation,
    Transport,
};

pub mod prelude {
    pub use crate::connection::Connection;
    pub use crate::context::CallContext;
    pub use crate::dialer::Dialer;
    pub use crate::error::{DialerError, DialerErrorExt};
    pub use crate::registry::ConnectionRegistry;
    pub use crate::release::Release;
    pub use crate::transport::DialOptions;
}
