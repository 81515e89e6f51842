//! Bearer-token injection for outgoing calls.
//!
//! The audience of a managed service is its bare host over HTTPS: for a target
//! `users-proj1-us1.run.app:443` the identity token is requested for
//! `https://users-proj1-us1.run.app`.
//!
//! ## Known limitation
//! Attaching a token **replaces** the outgoing metadata of the context instead of merging
//! into it. Anything the caller attached before is dropped (a debug event records it).

use crate::context::CallContext;
use crate::error::DialerError;
use crate::service::host_of;
use std::future::Future;
use std::time::Duration;
use tokio::sync::OnceCell;
use tonic::metadata::{MetadataMap, MetadataValue};
use tracing::{debug, instrument};

const AUTHORIZATION: &str = "authorization";
const METADATA_FLAVOR: &str = "Metadata-Flavor";
const IDENTITY_PATH: &str = "/computeMetadata/v1/instance/service-accounts/default/identity";
/// Metadata server host used when `GCE_METADATA_HOST` is not set.
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";
const DEFAULT_TOKEN_TIMEOUT: Duration = Duration::from_secs(10);

/// Source of identity tokens for a given audience.
pub trait TokenProvider: Send + Sync {
    /// Fetches an ID token whose audience is `audience`.
    fn id_token(&self, audience: &str) -> impl Future<Output = Result<String, DialerError>> + Send;
}

/// Issuer audience for `target`: `https://` plus everything before the first `:`.
#[must_use]
pub fn audience_for(target: &str) -> String {
    format!("https://{}", host_of(target))
}

/// Attaches bearer credentials to call contexts on demand.
#[derive(Debug, Clone)]
pub struct AuthInjector<P> {
    provider: P,
}

impl<P: TokenProvider> AuthInjector<P> {
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }

    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Returns `ctx` untouched when `auth_required` is false; otherwise fetches a token for
    /// the target's audience and installs it as the only outgoing metadata entry.
    ///
    /// # Errors
    /// Returns [`DialerError::Auth`] if the token cannot be obtained or is not a valid
    /// metadata value.
    #[instrument(skip(self, ctx), fields(audience = tracing::field::Empty))]
    pub async fn attach(
        &self,
        ctx: CallContext,
        target: &str,
        auth_required: bool,
    ) -> Result<CallContext, DialerError> {
        if !auth_required {
            return Ok(ctx);
        }

        let audience = audience_for(target);
        tracing::Span::current().record("audience", audience.as_str());

        let token = self
            .provider
            .id_token(&audience)
            .await
            .map_err(|e| e.wrap_context(audience.clone()))?;
        let value = MetadataValue::try_from(format!("Bearer {token}")).map_err(|e| {
            DialerError::Auth {
                message: format!("token is not a valid metadata value: {e}").into(),
                context: Some(audience.into()),
            }
        })?;

        if !ctx.metadata().is_empty() {
            debug!(dropped = ctx.metadata().len(), "Replacing caller metadata with credentials");
        }

        let mut metadata = MetadataMap::new();
        metadata.insert(AUTHORIZATION, value);
        Ok(ctx.with_metadata(metadata))
    }
}

/// Fetches ID tokens from the platform metadata server.
///
/// The HTTP client is built on first use; failing to build it is reported as a
/// token-source failure, separately from the token fetch itself.
#[derive(Debug)]
pub struct MetadataTokenProvider {
    host: String,
    timeout: Duration,
    client: OnceCell<reqwest::Client>,
}

impl Default for MetadataTokenProvider {
    fn default() -> Self {
        Self::new(DEFAULT_METADATA_HOST)
    }
}

impl MetadataTokenProvider {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into(), timeout: DEFAULT_TOKEN_TIMEOUT, client: OnceCell::new() }
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    async fn client(&self) -> Result<&reqwest::Client, DialerError> {
        self.client
            .get_or_try_init(|| async {
                reqwest::Client::builder().timeout(self.timeout).build().map_err(|e| {
                    DialerError::Auth {
                        message: e.to_string().into(),
                        context: Some("Building token source".into()),
                    }
                })
            })
            .await
    }

    fn identity_url(&self, audience: &str) -> Result<reqwest::Url, DialerError> {
        reqwest::Url::parse_with_params(
            &format!("http://{}{IDENTITY_PATH}", self.host),
            &[("audience", audience), ("format", "full")],
        )
        .map_err(|e| DialerError::Auth {
            message: e.to_string().into(),
            context: Some("Building token source".into()),
        })
    }
}

impl TokenProvider for MetadataTokenProvider {
    async fn id_token(&self, audience: &str) -> Result<String, DialerError> {
        let url = self.identity_url(audience)?;
        let client = self.client().await?;

        let fetch_failed = |e: reqwest::Error| DialerError::Auth {
            message: e.to_string().into(),
            context: Some("Fetching identity token".into()),
        };

        let token = client
            .get(url)
            .header(METADATA_FLAVOR, "Google")
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(fetch_failed)?
            .text()
            .await
            .map_err(fetch_failed)?;

        let token = token.trim();
        if token.is_empty() {
            return Err(DialerError::auth("metadata server returned an empty token"));
        }
        Ok(token.to_owned())
    }
}

/// Hands out a fixed token regardless of audience. Meant for local development.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl std::fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenProvider").field("token", &"<redacted>").finish()
    }
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl TokenProvider for StaticTokenProvider {
    async fn id_token(&self, _audience: &str) -> Result<String, DialerError> {
        Ok(self.token.clone())
    }
}
