//! Explicit call context threaded through authentication and dialing.

use crate::error::DialerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tonic::metadata::MetadataMap;

/// Outgoing call metadata plus an optional deadline.
///
/// The deadline bounds the token round trip and the transport dial. Requests built with
/// [`CallContext::request`] carry the metadata and the remaining time as the gRPC timeout.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    metadata: MetadataMap,
    deadline: Option<Instant>,
}

impl CallContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: MetadataMap) -> Self {
        self.metadata = metadata;
        self
    }

    #[must_use]
    pub const fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    pub const fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when no deadline is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Wraps `message` into a request carrying this context's metadata and deadline.
    pub fn request<T>(&self, message: T) -> tonic::Request<T> {
        let mut request = tonic::Request::new(message);
        *request.metadata_mut() = self.metadata.clone();
        if let Some(remaining) = self.remaining() {
            request.set_timeout(remaining);
        }
        request
    }

    /// Runs `fut` under this context's deadline.
    ///
    /// # Errors
    /// Returns [`DialerError::Dial`] when the deadline passes first, otherwise the
    /// future's own result.
    pub(crate) async fn run<F, T>(&self, fut: F) -> Result<T, DialerError>
    where
        F: Future<Output = Result<T, DialerError>>,
    {
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => {
                Err(DialerError::dial("deadline exceeded"))
            },
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .unwrap_or_else(|_| Err(DialerError::dial("deadline exceeded"))),
            None => fut.await,
        }
    }
}
