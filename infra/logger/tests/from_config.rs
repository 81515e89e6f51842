use rundial_logger::{ConsoleFormat, Logger, LoggingConfig};
use serial_test::serial;
use tempfile::tempdir;

#[test]
#[serial]
fn unusable_directory_fails_before_installing() -> Result<(), Box<dyn std::error::Error>> {
    let tmp_dir = tempdir()?;
    let blocker = tmp_dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file in the way")?;

    let config =
        LoggingConfig { directory: Some(blocker.join("logs")), ..LoggingConfig::default() };
    let err = Logger::from_config(&config).expect_err("directory below a file cannot be created");
    assert!(err.to_string().contains("Log directory error"), "unexpected error: {err}");

    Ok(())
}

#[test]
#[serial]
fn config_installs_subscriber() {
    let config = LoggingConfig {
        level: "debug".to_owned(),
        filter: Some("rundial=trace".to_owned()),
        format: ConsoleFormat::Pretty,
        ..LoggingConfig::default()
    };

    let logger = Logger::from_config(&config).expect("logger should initialize from config");
    assert!(logger.guard().is_none());
    tracing::debug!("configured");
}
