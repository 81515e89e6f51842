//! Service identity and resolved endpoints.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Logical name of a peer service, independent of where it runs.
///
/// Cheap to clone; used only as a lookup and formatting key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ServiceName(Arc<str>);

impl ServiceName {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ServiceName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ServiceName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for ServiceName {
    fn from(name: String) -> Self {
        Self(Arc::from(name))
    }
}

impl From<&String> for ServiceName {
    fn from(name: &String) -> Self {
        Self::new(name)
    }
}

impl From<&Self> for ServiceName {
    fn from(name: &Self) -> Self {
        name.clone()
    }
}

impl PartialEq<str> for ServiceName {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ServiceName {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// A resolved `host:port` target for a logical service.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct Endpoint {
    service: ServiceName,
    target: String,
}

impl Endpoint {
    pub fn new(service: impl Into<ServiceName>, target: impl Into<String>) -> Self {
        Self { service: service.into(), target: target.into() }
    }

    #[must_use]
    pub const fn service(&self) -> &ServiceName {
        &self.service
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Host part of the target: everything before the first `:`.
    #[must_use]
    pub fn host(&self) -> &str {
        host_of(&self.target)
    }

    pub fn into_parts(self) -> (ServiceName, String) {
        (self.service, self.target)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.service, self.target)
    }
}

pub(crate) fn host_of(target: &str) -> &str {
    target.split_once(':').map_or(target, |(host, _)| host)
}
