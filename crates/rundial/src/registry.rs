//! Ordered lookup of dialed connections by service name.

use crate::connection::Connection;
use crate::error::DialerError;
use crate::service::ServiceName;
use crate::transport::GrpcChannel;

/// Connections in the order their services were requested.
///
/// Duplicate service names keep duplicate entries; [`ConnectionRegistry::find`] returns the
/// first one.
#[derive(Debug)]
pub struct ConnectionRegistry<H = GrpcChannel> {
    connections: Vec<Connection<H>>,
}

impl<H> Default for ConnectionRegistry<H> {
    fn default() -> Self {
        Self { connections: Vec::new() }
    }
}

impl<H> ConnectionRegistry<H> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self { connections: Vec::with_capacity(capacity) }
    }

    pub(crate) fn push(&mut self, connection: Connection<H>) {
        self.connections.push(connection);
    }

    /// First connection dialed for `service`.
    ///
    /// # Errors
    /// Returns [`DialerError::NotFound`] when no connection matches.
    pub fn find(&self, service: impl AsRef<str>) -> Result<&Connection<H>, DialerError> {
        let service = service.as_ref();
        self.connections.iter().find(|c| c.service() == service).ok_or_else(|| {
            DialerError::NotFound {
                message: format!("no connection dialed for service '{service}'").into(),
                context: None,
            }
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Connection<H>> {
        self.connections.iter()
    }

    pub fn services(&self) -> impl Iterator<Item = &ServiceName> {
        self.connections.iter().map(Connection::service)
    }
}

impl<H> From<Vec<Connection<H>>> for ConnectionRegistry<H> {
    fn from(connections: Vec<Connection<H>>) -> Self {
        Self { connections }
    }
}

impl<H> IntoIterator for ConnectionRegistry<H> {
    type Item = Connection<H>;
    type IntoIter = std::vec::IntoIter<Connection<H>>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.into_iter()
    }
}

impl<'a, H> IntoIterator for &'a ConnectionRegistry<H> {
    type Item = &'a Connection<H>;
    type IntoIter = std::slice::Iter<'a, Connection<H>>;

    fn into_iter(self) -> Self::IntoIter {
        self.connections.iter()
    }
}
