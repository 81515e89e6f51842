//! Layered dialer configuration.
//!
//! Values are merged in this order, later sources winning:
//!
//! 1. built-in defaults (see [`DialerConfig::default`]);
//! 2. the platform variables `PORT`, `ENVIRONMENT` and `GCE_METADATA_HOST`;
//! 3. an optional configuration file (format picked from its extension, usually TOML);
//! 4. `RUNDIAL__*` variables, with `__` separating nested keys
//!    (e.g. `RUNDIAL__LOCAL__DEFAULT_TARGET` maps to `local.default_target`).

use crate::auth::{DEFAULT_METADATA_HOST, MetadataTokenProvider};
use crate::error::{DialerError, DialerErrorExt};
use crate::resolver::{DEFAULT_LOCAL_TARGET, DEFAULT_PORT, EndpointResolver, ManagedPlatform};
use crate::tls::TlsPolicy;
use crate::transport::{DialOptions, SpanPropagation};
use config::{Config, Environment, File};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

const ENV_PREFIX: &str = "RUNDIAL";
/// Value of `ENVIRONMENT` that selects managed-platform resolution.
pub const PRODUCTION: &str = "production";

/// Everything needed to build a production [`Dialer`](crate::Dialer).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DialerConfig {
    pub environment: String,
    pub project_id: String,
    pub region: String,
    pub port: String,
    pub tls: TlsConfig,
    pub auth: AuthConfig,
    pub local: LocalConfig,
    pub dial: DialConfig,
}

impl Default for DialerConfig {
    fn default() -> Self {
        Self {
            environment: String::new(),
            project_id: String::new(),
            region: String::new(),
            port: DEFAULT_PORT.to_owned(),
            tls: TlsConfig::default(),
            auth: AuthConfig::default(),
            local: LocalConfig::default(),
            dial: DialConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Default transport security for dials that do not choose explicitly.
    pub enabled: bool,
    pub verify_peer: bool,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self { enabled: true, verify_peer: false }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub required: bool,
    pub metadata_host: String,
    pub timeout_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self { required: true, metadata_host: DEFAULT_METADATA_HOST.to_owned(), timeout_secs: 10 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub default_target: String,
    /// Per-service overrides, e.g. `users = "localhost:50051"`.
    pub targets: HashMap<String, String>,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self { default_target: DEFAULT_LOCAL_TARGET.to_owned(), targets: HashMap::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DialConfig {
    pub connect_timeout_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub lazy: bool,
    /// Tag outgoing requests with the current span id.
    pub propagate_span: bool,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self { connect_timeout_secs: None, timeout_secs: None, lazy: false, propagate_span: true }
    }
}

impl DialerConfig {
    #[must_use]
    pub fn is_managed(&self) -> bool {
        self.environment == PRODUCTION
    }

    /// Resolver matching the configured environment.
    ///
    /// # Errors
    /// Returns [`DialerError::Resolution`] when the managed platform is selected but the
    /// project, region or port is missing.
    pub fn resolver(&self) -> Result<EndpointResolver, DialerError> {
        let placeholder_only =
            self.local.targets.is_empty() && self.local.default_target == DEFAULT_LOCAL_TARGET;

        if self.is_managed() {
            let platform = ManagedPlatform::new(&self.project_id, &self.region, &self.port)?;
            Ok(EndpointResolver::managed(platform))
        } else if placeholder_only {
            Ok(EndpointResolver::local_default())
        } else {
            Ok(EndpointResolver::local_table(
                self.local.targets.clone(),
                self.local.default_target.clone(),
            ))
        }
    }

    #[must_use]
    pub const fn tls_policy(&self) -> TlsPolicy {
        if self.tls.verify_peer { TlsPolicy::verified() } else { TlsPolicy::unverified() }
    }

    #[must_use]
    pub fn token_provider(&self) -> MetadataTokenProvider {
        MetadataTokenProvider::new(self.auth.metadata_host.as_str())
            .timeout(Duration::from_secs(self.auth.timeout_secs))
    }

    /// Default dial options for a [`Dialer`](crate::Dialer) built from this configuration.
    #[must_use]
    pub fn dial_options(&self) -> DialOptions {
        let mut options = DialOptions::new().lazy(self.dial.lazy);
        if self.dial.propagate_span {
            options = options.interceptor(SpanPropagation);
        }
        if let Some(secs) = self.dial.connect_timeout_secs {
            options = options.connect_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.dial.timeout_secs {
            options = options.timeout(Duration::from_secs(secs));
        }
        options
    }
}

/// Loads a configuration section from an optional file and the process environment.
///
/// # Errors
/// Fails if the file is given but missing or malformed, or if the merged values do not
/// deserialize into `T`.
pub fn load_config<T>(path: Option<impl AsRef<Path>>) -> Result<T, DialerError>
where
    T: DeserializeOwned,
{
    load_config_with_env(path, std::env::vars().collect())
}

/// Same as [`load_config`], reading variables from `env` instead of the process environment.
///
/// # Errors
/// See [`load_config`].
pub fn load_config_with_env<T>(
    path: Option<impl AsRef<Path>>,
    env: config::Map<String, String>,
) -> Result<T, DialerError>
where
    T: DeserializeOwned,
{
    let mut builder = Config::builder()
        .set_default("port", default_port(env.get("PORT").map(String::as_str)))
        .context("Setting default port")?
        .set_default("environment", env.get("ENVIRONMENT").cloned().unwrap_or_default())
        .context("Setting default environment")?
        .set_default(
            "auth.metadata_host",
            env.get("GCE_METADATA_HOST")
                .filter(|host| !host.is_empty())
                .map_or(DEFAULT_METADATA_HOST, String::as_str),
        )
        .context("Setting default metadata host")?;

    let path: Option<&Path> = path.as_ref().map(AsRef::as_ref);
    if let Some(path) = path {
        info!("Loading config from {}", path.display());
        builder = builder.add_source(File::from(path).required(true));
    }

    builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .source(Some(env)),
        )
        .build()
        .context("Failed to build config")?
        .try_deserialize::<T>()
        .context("Failed to deserialize config")
}

/// `PORT` when set and non-empty, [`DEFAULT_PORT`] otherwise.
#[must_use]
pub fn default_port(port: Option<&str>) -> &str {
    port.filter(|p| !p.trim().is_empty()).unwrap_or(DEFAULT_PORT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect()
    }

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn port_defaults_when_unset_or_empty() {
        assert_eq!(default_port(None), "443");
        assert_eq!(default_port(Some("")), "443");
        assert_eq!(default_port(Some("8080")), "8080");
    }

    #[test]
    fn defaults_without_any_source() {
        let config: DialerConfig = load_config_with_env(None::<&Path>, env(&[])).unwrap();

        assert_eq!(config, DialerConfig::default());
        assert!(!config.is_managed());
        assert_eq!(config.resolver().unwrap().resolve(&"x".into()).target(), "service:443");
        assert_eq!(config.dial_options().interceptors.len(), 1);
    }

    #[test]
    fn platform_variables_seed_defaults() {
        let config: DialerConfig = load_config_with_env(
            None::<&Path>,
            env(&[("PORT", "8443"), ("ENVIRONMENT", "production"), ("GCE_METADATA_HOST", "md:80")]),
        )
        .unwrap();

        assert_eq!(config.port, "8443");
        assert!(config.is_managed());
        assert_eq!(config.auth.metadata_host, "md:80");

        // Managed without project and region is rejected.
        assert!(matches!(config.resolver().unwrap_err(), DialerError::Resolution { .. }));
    }

    #[test]
    fn file_then_prefixed_env_override() {
        let file = write_toml(
            r#"
            environment = "production"
            project_id = "proj1"
            region = "us1"

            [tls]
            verify_peer = true

            [local.targets]
            users = "localhost:50051"

            [dial]
            connect_timeout_secs = 3
            propagate_span = false
            "#,
        );

        let config: DialerConfig = load_config_with_env(
            Some(file.path()),
            env(&[("PORT", "9000"), ("RUNDIAL__REGION", "eu2"), ("RUNDIAL__DIAL__LAZY", "true")]),
        )
        .unwrap();

        assert_eq!(config.region, "eu2");
        assert_eq!(config.local.targets["users"], "localhost:50051");
        assert!(config.tls.enabled);
        assert_eq!(config.tls_policy(), TlsPolicy::verified());
        assert_eq!(
            config.dial_options(),
            DialOptions::new().lazy(true).connect_timeout(Duration::from_secs(3))
        );
        assert_eq!(
            config.resolver().unwrap().resolve(&"users".into()).target(),
            "users-proj1-eu2.run.app:9000"
        );
    }

    #[test]
    fn local_table_from_file() {
        let file = write_toml(
            r#"
            [local]
            default_target = "localhost:8080"

            [local.targets]
            users = "localhost:50051"
            "#,
        );

        let config: DialerConfig = load_config_with_env(Some(file.path()), env(&[])).unwrap();
        let resolver = config.resolver().unwrap();

        assert_eq!(resolver.resolve(&"users".into()).target(), "localhost:50051");
        assert_eq!(resolver.resolve(&"orders".into()).target(), "localhost:8080");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load_config_with_env::<DialerConfig>(Some("/nonexistent/rundial.toml"), env(&[]))
            .unwrap_err();

        assert!(matches!(err, DialerError::Config { .. }));
        assert_eq!(err.context_str(), Some("Failed to build config"));
    }
}
