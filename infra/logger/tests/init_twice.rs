use rundial_logger::{LevelFilter, Logger, LoggerError};

#[test]
fn second_init_is_a_subscriber_error() {
    let logger = Logger::builder()
        .name("rundial-init-twice")
        .level(LevelFilter::INFO)
        .init()
        .expect("first init should succeed");
    assert!(logger.guard().is_none(), "console-only logger should not create a file guard");

    let err = Logger::builder()
        .name("rundial-init-twice-second")
        .level(LevelFilter::DEBUG)
        .init()
        .expect_err("second init should fail");

    assert!(matches!(err, LoggerError::Subscriber { .. }), "expected subscriber error, got {err}");
}
