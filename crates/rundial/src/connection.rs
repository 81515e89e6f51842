//! An established connection to one peer service.

use crate::context::CallContext;
use crate::service::ServiceName;
use crate::transport::GrpcChannel;

/// A dialed transport handle together with the service and target it was opened for.
///
/// The handle is closed by the [`Release`](crate::Release) returned alongside the connection,
/// not by dropping the connection itself.
#[derive(Debug)]
pub struct Connection<H = GrpcChannel> {
    service: ServiceName,
    target: String,
    handle: H,
    context: CallContext,
}

impl<H> Connection<H> {
    pub(crate) const fn new(
        service: ServiceName,
        target: String,
        handle: H,
        context: CallContext,
    ) -> Self {
        Self { service, target, handle, context }
    }

    #[must_use]
    pub const fn service(&self) -> &ServiceName {
        &self.service
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub const fn handle(&self) -> &H {
        &self.handle
    }

    /// The call context produced while dialing, including credentials when auth was required.
    #[must_use]
    pub const fn context(&self) -> &CallContext {
        &self.context
    }

    /// Wraps `message` into a request carrying the dial-time metadata and deadline.
    pub fn request<T>(&self, message: T) -> tonic::Request<T> {
        self.context.request(message)
    }

    pub fn into_parts(self) -> (ServiceName, String, H, CallContext) {
        (self.service, self.target, self.handle, self.context)
    }
}

impl Connection<GrpcChannel> {
    /// A clone of the channel, ready to hand to a generated gRPC client.
    #[must_use]
    pub fn channel(&self) -> GrpcChannel {
        self.handle.clone()
    }
}
