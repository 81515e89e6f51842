//! Transport collaborator: opens and closes channel handles.
//!
//! [`GrpcTransport`] is the production implementation on top of `tonic` channels. Every dial,
//! plaintext or TLS, goes through the custom-connector hook: TCP comes from hyper's connector,
//! TLS from a `tokio-rustls` stream configured by the [`TlsPolicy`], and each stream is tied to
//! the close signal of its [`GrpcChannel`]. Closing a channel therefore ends its HTTP/2
//! connection even while clones of the channel are still alive.

use crate::error::{BoxError, DialerError};
use crate::tls::TlsPolicy;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use std::fmt;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio_rustls::TlsConnector;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tonic::body::Body;
use tonic::codegen::http;
use tonic::metadata::{MetadataMap, MetadataValue};
use tonic::transport::{Channel, Endpoint, Uri};
use tower::{Service, ServiceExt};

/// Metadata key carrying the id of the span a request was sent from.
pub const SPAN_ID_HEADER: &str = "x-rundial-span-id";

/// Security applied to a single dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Tls(TlsPolicy),
    Plaintext,
}

impl Security {
    #[must_use]
    pub const fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }
}

/// Adjusts the metadata of every request sent over a [`GrpcChannel`].
pub trait Interceptor: Send + Sync + 'static {
    fn intercept(&self, metadata: &mut MetadataMap);
}

impl<F> Interceptor for F
where
    F: Fn(&mut MetadataMap) + Send + Sync + 'static,
{
    fn intercept(&self, metadata: &mut MetadataMap) {
        self(metadata);
    }
}

/// Tags each request with the id of the current `tracing` span, if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanPropagation;

impl Interceptor for SpanPropagation {
    fn intercept(&self, metadata: &mut MetadataMap) {
        if let Some(id) = tracing::Span::current().id() {
            metadata.insert(SPAN_ID_HEADER, MetadataValue::from(id.into_u64()));
        }
    }
}

/// Caller-supplied dial options, merged with the selected [`Security`].
#[derive(Clone, Default)]
pub struct DialOptions {
    pub connect_timeout: Option<Duration>,
    /// Per-request timeout applied by the channel.
    pub timeout: Option<Duration>,
    pub tcp_keepalive: Option<Duration>,
    pub user_agent: Option<String>,
    /// Return immediately and connect on first use.
    pub lazy: bool,
    /// Run in order on every request of the dialed channel.
    pub interceptors: Vec<Arc<dyn Interceptor>>,
}

impl fmt::Debug for DialOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialOptions")
            .field("connect_timeout", &self.connect_timeout)
            .field("timeout", &self.timeout)
            .field("tcp_keepalive", &self.tcp_keepalive)
            .field("user_agent", &self.user_agent)
            .field("lazy", &self.lazy)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

/// Interceptors compare by identity.
impl PartialEq for DialOptions {
    fn eq(&self, other: &Self) -> bool {
        self.connect_timeout == other.connect_timeout
            && self.timeout == other.timeout
            && self.tcp_keepalive == other.tcp_keepalive
            && self.user_agent == other.user_agent
            && self.lazy == other.lazy
            && self.interceptors.len() == other.interceptors.len()
            && self.interceptors.iter().zip(&other.interceptors).all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

impl Eq for DialOptions {}

impl DialOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub const fn tcp_keepalive(mut self, interval: Duration) -> Self {
        self.tcp_keepalive = Some(interval);
        self
    }

    #[must_use]
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    #[must_use]
    pub const fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    #[must_use]
    pub fn interceptor(mut self, interceptor: impl Interceptor) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Fills every option left unset here from `defaults`.
    ///
    /// `lazy` is set if either side sets it. Interceptors of `defaults` run before these.
    #[must_use]
    pub fn with_defaults(&self, defaults: &Self) -> Self {
        Self {
            connect_timeout: self.connect_timeout.or(defaults.connect_timeout),
            timeout: self.timeout.or(defaults.timeout),
            tcp_keepalive: self.tcp_keepalive.or(defaults.tcp_keepalive),
            user_agent: self.user_agent.clone().or_else(|| defaults.user_agent.clone()),
            lazy: self.lazy || defaults.lazy,
            interceptors: defaults.interceptors.iter().chain(&self.interceptors).cloned().collect(),
        }
    }

    fn configure(&self, target: &str) -> Result<Endpoint, DialerError> {
        let invalid = |e: tonic::transport::Error| DialerError::InvalidConfiguration {
            message: e.to_string().into(),
            context: Some(target.to_owned().into()),
        };

        let mut endpoint = Endpoint::from_shared(format!("http://{target}")).map_err(invalid)?;
        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }
        if let Some(timeout) = self.timeout {
            endpoint = endpoint.timeout(timeout);
        }
        if let Some(user_agent) = &self.user_agent {
            endpoint = endpoint.user_agent(user_agent.as_str()).map_err(invalid)?;
        }
        Ok(endpoint)
    }

    fn tcp_connector(&self) -> HttpConnector {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);
        http.set_keepalive(self.tcp_keepalive);
        http
    }
}

/// Opens transport handles to `host:port` targets and releases them.
pub trait Transport: Send + Sync + 'static {
    type Handle: Clone + Send + Sync + 'static;

    /// Connects to `target` with the given security and options.
    fn connect(
        &self,
        target: &str,
        security: Security,
        options: &DialOptions,
    ) -> impl Future<Output = Result<Self::Handle, DialerError>> + Send;

    /// Releases a handle. Must tolerate handles whose peer is already gone.
    fn close(&self, handle: Self::Handle);
}

/// A closable `tonic` channel.
///
/// Pass it to a generated client like a plain [`Channel`]; the dial-time interceptors run on
/// every request. Once closed, the live connection is torn down and no new one is opened, so
/// requests on any clone fail.
#[derive(Clone)]
pub struct GrpcChannel {
    channel: Channel,
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    closed: CancellationToken,
}

impl GrpcChannel {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn close(&self) {
        self.closed.cancel();
    }

    fn intercept(&self, headers: &mut http::HeaderMap) {
        if self.interceptors.is_empty() {
            return;
        }
        let mut metadata = MetadataMap::from_headers(std::mem::take(headers));
        for interceptor in self.interceptors.iter() {
            interceptor.intercept(&mut metadata);
        }
        *headers = metadata.into_headers();
    }
}

impl fmt::Debug for GrpcChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrpcChannel")
            .field("interceptors", &self.interceptors.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl Service<http::Request<Body>> for GrpcChannel {
    type Response = http::Response<Body>;
    type Error = tonic::transport::Error;
    type Future = <Channel as Service<http::Request<Body>>>::Future;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.channel.poll_ready(cx)
    }

    fn call(&mut self, mut request: http::Request<Body>) -> Self::Future {
        self.intercept(request.headers_mut());
        self.channel.call(request)
    }
}

/// `tonic` channel transport.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcTransport;

impl Transport for GrpcTransport {
    type Handle = GrpcChannel;

    async fn connect(
        &self,
        target: &str,
        security: Security,
        options: &DialOptions,
    ) -> Result<GrpcChannel, DialerError> {
        let endpoint = options.configure(target)?;
        let tls = match security {
            Security::Tls(policy) => Some(TlsConnector::from(policy.client_config()?)),
            Security::Plaintext => None,
        };
        let tcp = options.tcp_connector();
        let closed = CancellationToken::new();

        let signal = closed.clone();
        let connector = tower::service_fn(move |uri: Uri| {
            let (tcp, tls, closed) = (tcp.clone(), tls.clone(), signal.clone());
            async move {
                if closed.is_cancelled() {
                    return Err::<_, BoxError>("channel is closed".into());
                }
                let stream = tcp.oneshot(uri.clone()).await?.into_inner();
                let stream: Box<dyn Stream> = match tls {
                    Some(tls) => Box::new(tls.connect(server_name(&uri)?, stream).await?),
                    None => Box::new(stream),
                };
                Ok(TokioIo::new(ClosableStream::new(stream, closed)))
            }
        });

        let channel = if options.lazy {
            endpoint.connect_with_connector_lazy(connector)
        } else {
            endpoint.connect_with_connector(connector).await.map_err(DialerError::dial)?
        };

        Ok(GrpcChannel { channel, interceptors: options.interceptors.clone().into(), closed })
    }

    fn close(&self, handle: GrpcChannel) {
        handle.close();
    }
}

fn server_name(uri: &Uri) -> Result<ServerName<'static>, BoxError> {
    let host = uri.host().ok_or("target is missing a host")?;
    let host = host.trim_start_matches('[').trim_end_matches(']').to_owned();
    Ok(ServerName::try_from(host)?)
}

trait Stream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<S: AsyncRead + AsyncWrite + Send + Unpin> Stream for S {}

/// Reports end-of-stream once the channel is closed, which ends the HTTP/2 connection task
/// and drops the socket.
struct ClosableStream<S> {
    inner: S,
    closed: Pin<Box<WaitForCancellationFutureOwned>>,
}

impl<S> ClosableStream<S> {
    fn new(inner: S, closed: CancellationToken) -> Self {
        Self { inner, closed: Box::pin(closed.cancelled_owned()) }
    }

    fn poll_closed(&mut self, cx: &mut Context<'_>) -> bool {
        self.closed.as_mut().poll(cx).is_ready()
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for ClosableStream<S> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.poll_closed(cx) {
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for ClosableStream<S> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.poll_closed(cx) {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
