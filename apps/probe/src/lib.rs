//! Operator probe for rundial: resolves service names and dials them with the same
//! configuration, credentials and transport a rundial client would use.

pub mod args;

use crate::args::{Cli, Command, DialArgs};
use anyhow::Context;
use rundial::config::{DialerConfig, load_config};
use rundial::{CallContext, DialOptions, Dialer};
use rundial_logger::LoggingConfig;
use serde::Deserialize;
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// The `[logging]` table of the probe configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub logging: LoggingConfig,
}

/// Loads the logger settings from the same sources as the dialer settings.
///
/// # Errors
/// Fails when the file is given but cannot be read or parsed.
pub fn logging_config(path: Option<&Path>) -> anyhow::Result<LoggingConfig> {
    let section: LoggingSection = load_config(path).context("Loading logging configuration")?;
    Ok(section.logging)
}

/// Runs the parsed command, writing the report to `out`.
///
/// # Errors
/// Fails on invalid configuration, on the first service that cannot be dialed, or when the
/// report cannot be written.
pub async fn run(cli: Cli, out: &mut impl Write) -> anyhow::Result<()> {
    let config: DialerConfig =
        load_config(cli.config.as_deref()).context("Loading dialer configuration")?;

    match cli.command {
        Command::Resolve { services } => resolve(&config, &services, out),
        Command::Dial(args) => dial(&config, args, out).await,
    }
}

/// Prints `service  target` for every service, in input order.
///
/// # Errors
/// Fails when the managed platform is selected but incomplete.
pub fn resolve(
    config: &DialerConfig,
    services: &[String],
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let resolver = config.resolver()?;
    for endpoint in resolver.resolve_all(services) {
        writeln!(out, "{}  {}", endpoint.service(), endpoint.target())?;
    }
    Ok(())
}

/// Dials every service and prints one line per established connection.
///
/// Connections are closed before returning, whether dialing succeeded or not.
///
/// # Errors
/// Fails with the first dial error, which names the failing service.
pub async fn dial(
    config: &DialerConfig,
    args: DialArgs,
    out: &mut impl Write,
) -> anyhow::Result<()> {
    let dialer = Dialer::from_config(config)?;

    let options = DialOptions::new().lazy(args.lazy);
    let use_tls = config.tls.enabled && !args.plaintext;
    let auth_required = config.auth.required && !args.no_auth;

    let mut ctx = CallContext::new();
    if let Some(secs) = args.timeout_secs {
        ctx = ctx.with_timeout(Duration::from_secs(secs));
    }

    info!(services = args.services.len(), use_tls, auth_required, "Dialing services");
    let (release, registry) =
        dialer.dial_services(&ctx, &args.services, use_tls, auth_required, &options).await;

    let report = registry.map_err(anyhow::Error::from).and_then(|registry| {
        for connection in &registry {
            writeln!(
                out,
                "{}  {}  tls={use_tls} auth={}",
                connection.service(),
                connection.target(),
                !connection.context().metadata().is_empty(),
            )?;
        }
        Ok(())
    });

    if release.pending() > 0 {
        info!(connections = release.pending(), "Closing connections");
    }
    release.release();

    report.inspect_err(|e| warn!(error = %e, "Dial probe failed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prints_targets_in_order() {
        let config = DialerConfig {
            environment: "production".to_owned(),
            project_id: "proj1".to_owned(),
            region: "us1".to_owned(),
            ..DialerConfig::default()
        };
        let mut out = Vec::new();

        resolve(&config, &["users".to_owned(), "orders".to_owned()], &mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "users  users-proj1-us1.run.app:443\norders  orders-proj1-us1.run.app:443\n"
        );
    }

    #[test]
    fn resolve_rejects_incomplete_managed_config() {
        let config =
            DialerConfig { environment: "production".to_owned(), ..DialerConfig::default() };
        assert!(resolve(&config, &["users".to_owned()], &mut Vec::new()).is_err());
    }

    #[tokio::test]
    async fn lazy_plaintext_dial_reports_connections() {
        let mut config = DialerConfig::default();
        config.local.default_target = "127.0.0.1:1".to_owned();
        let args = DialArgs {
            services: vec!["users".to_owned()],
            plaintext: true,
            no_auth: true,
            timeout_secs: Some(5),
            lazy: true,
        };
        let mut out = Vec::new();

        dial(&config, args, &mut out).await.unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "users  127.0.0.1:1  tls=false auth=false\n"
        );
    }

    #[test]
    fn logging_section_is_read_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"\nformat = \"json\"").unwrap();

        let logging = logging_config(Some(file.path())).unwrap();
        assert_eq!(logging.level, "debug");
        assert_eq!(logging.format, rundial_logger::ConsoleFormat::Json);
    }
}
