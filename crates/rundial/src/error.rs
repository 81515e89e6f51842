//! # Dialer Errors
//!
//! This module defines the [`DialerError`] enum used by every stage of the dialing pipeline,
//! from endpoint resolution to registry lookups.

use std::borrow::Cow;

/// Boxed error type produced by transport collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result type alias for this crate.
pub type Result<T, E = DialerError> = std::result::Result<T, E>;

/// A specialized [`DialerError`] enum of this crate.
#[derive(Debug, thiserror::Error)]
pub enum DialerError {
    /// The resolver could not be built or could not produce a target.
    #[error("Endpoint resolution failed{}: {message}", format_context(.context))]
    Resolution { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Token-source acquisition or the token fetch failed.
    #[error("Authentication failed{}: {message}", format_context(.context))]
    Auth { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The transport could not establish a connection (including an exceeded deadline).
    #[error("Dial failed{}: {source}", format_context(.context))]
    Dial {
        #[source]
        source: BoxError,
        context: Option<Cow<'static, str>>,
    },

    /// No connection was dialed for the requested service.
    #[error("No connection dialed{}: {message}", format_context(.context))]
    NotFound { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Layered configuration could not be built or deserialized.
    #[error("Config error{}: {source}", format_context(.context))]
    Config {
        #[source]
        source: config::ConfigError,
        context: Option<Cow<'static, str>>,
    },

    /// A builder or configuration value is not usable.
    #[error("Invalid configuration{}: {message}", format_context(.context))]
    InvalidConfiguration { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl DialerError {
    pub(crate) fn auth(message: impl Into<Cow<'static, str>>) -> Self {
        Self::Auth { message: message.into(), context: None }
    }

    pub(crate) fn dial(source: impl Into<BoxError>) -> Self {
        Self::Dial { source: source.into(), context: None }
    }

    /// Returns the context attached to this error, if any.
    pub fn context_str(&self) -> Option<&str> {
        match self {
            Self::Resolution { context, .. }
            | Self::Auth { context, .. }
            | Self::Dial { context, .. }
            | Self::NotFound { context, .. }
            | Self::Config { context, .. }
            | Self::InvalidConfiguration { context, .. } => context.as_deref(),
        }
    }

    /// Puts `outer` in front of the existing context instead of replacing it.
    pub(crate) fn wrap_context(mut self, outer: impl Into<Cow<'static, str>>) -> Self {
        let outer = outer.into();
        let context = match self.context_str() {
            Some(inner) => Cow::Owned(format!("{outer}, {inner}")),
            None => outer,
        };
        self.set_context(context);
        self
    }

    fn set_context(&mut self, value: Cow<'static, str>) {
        match self {
            Self::Resolution { context, .. }
            | Self::Auth { context, .. }
            | Self::Dial { context, .. }
            | Self::NotFound { context, .. }
            | Self::Config { context, .. }
            | Self::InvalidConfiguration { context, .. } => *context = Some(value),
        }
    }
}

/// Adds `.context()` to results whose error converts into [`DialerError`].
pub trait DialerErrorExt<T> {
    /// Attaches (or replaces) the human-readable context of the error.
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, DialerError>;
}

impl<T> DialerErrorExt<T> for Result<T, DialerError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut e| {
            e.set_context(context.into());
            e
        })
    }
}

impl<T> DialerErrorExt<T> for Result<T, config::ConfigError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, DialerError> {
        self.map_err(|source| DialerError::Config { source, context: Some(context.into()) })
    }
}

impl<T> DialerErrorExt<T> for Result<T, BoxError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, DialerError> {
        self.map_err(|source| DialerError::Dial { source, context: Some(context.into()) })
    }
}

impl From<config::ConfigError> for DialerError {
    #[inline]
    fn from(source: config::ConfigError) -> Self {
        Self::Config { source, context: None }
    }
}

impl From<BoxError> for DialerError {
    #[inline]
    fn from(source: BoxError) -> Self {
        Self::Dial { source, context: None }
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
