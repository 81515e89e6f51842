pub mod fixtures;

use fixtures::{
    MockTransport, PanickingTokenProvider, RecordingTokenProvider, ctx, local_dialer,
};
use rundial::{CallContext, DialOptions, Dialer, DialerError, Endpoint, Security, TlsPolicy};
use std::time::Duration;

#[tokio::test]
async fn dial_services_preserves_input_order() {
    let transport = MockTransport::new();
    let dialer = local_dialer(transport.clone(), RecordingTokenProvider::default());

    let (release, registry) =
        dialer.dial_services(&ctx(), ["c", "a", "b"], true, false, &DialOptions::default()).await;
    let registry = registry.unwrap();

    let names: Vec<_> = registry.services().map(ToString::to_string).collect();
    assert_eq!(names, ["c", "a", "b"]);
    assert_eq!(transport.dialed(), ["c:443", "a:443", "b:443"]);
    assert_eq!(release.pending(), 3);
}

#[tokio::test]
async fn partial_failure_releases_opened_connections_once() {
    let transport = MockTransport::new().fail_on("b:443");
    let dialer = local_dialer(transport.clone(), RecordingTokenProvider::default());

    let (release, registry) =
        dialer.dial_services(&ctx(), ["a", "b", "c"], true, true, &DialOptions::default()).await;

    let err = registry.unwrap_err();
    assert!(matches!(err, DialerError::Dial { .. }));
    assert!(err.to_string().contains("service 'b'"), "unexpected error: {err}");

    // `c` is never attempted.
    assert_eq!(transport.dialed(), ["a:443", "b:443"]);
    assert_eq!(transport.total_closes(), 0);

    release.release();
    release.release();
    drop(release);

    assert_eq!(transport.closes("a:443"), 1);
    assert_eq!(transport.closes("b:443"), 0);
    assert_eq!(transport.total_closes(), 1);
}

#[tokio::test]
async fn release_twice_closes_every_connection_once() {
    let transport = MockTransport::new();
    let dialer = local_dialer(transport.clone(), RecordingTokenProvider::default());

    let (release, registry) =
        dialer.dial_services(&ctx(), ["a", "b"], false, false, &DialOptions::default()).await;
    assert_eq!(registry.unwrap().len(), 2);

    release.release();
    release.release();

    assert_eq!(transport.closes("a:443"), 1);
    assert_eq!(transport.closes("b:443"), 1);
}

#[tokio::test]
async fn dropping_the_release_closes_connections() {
    let transport = MockTransport::new();
    let dialer = local_dialer(transport.clone(), RecordingTokenProvider::default());

    {
        let (_release, connection) =
            dialer.dial_service(&ctx(), "users", true, false, &DialOptions::default()).await;
        assert_eq!(connection.unwrap().target(), "users:443");
        assert_eq!(transport.total_closes(), 0);
    }

    assert_eq!(transport.closes("users:443"), 1);
}

#[tokio::test]
async fn dropping_an_in_flight_dial_releases_opened_connections() {
    let transport = MockTransport::new().stall_on("b:443");
    let dialer = local_dialer(transport.clone(), PanickingTokenProvider);
    let (ctx, options) = (ctx(), DialOptions::default());

    let dial = dialer.dial_services(&ctx, ["a", "b", "c"], true, false, &options);
    let outcome = tokio::time::timeout(Duration::from_millis(50), dial).await;

    assert!(outcome.is_err(), "dial should still be waiting on `b`");
    assert_eq!(transport.dialed(), ["a:443", "b:443"]);
    assert_eq!(transport.closes("a:443"), 1);
    assert_eq!(transport.closes("b:443"), 0);
}

#[tokio::test]
async fn default_options_fill_unset_call_options() {
    let transport = MockTransport::new();
    let dialer = Dialer::builder()
        .local(|service| Endpoint::new(service, format!("{service}:443")))
        .default_options(
            DialOptions::new()
                .connect_timeout(Duration::from_secs(3))
                .timeout(Duration::from_secs(30))
                .lazy(true),
        )
        .transport(transport.clone())
        .token_provider(PanickingTokenProvider)
        .build()
        .unwrap();

    let call = DialOptions::new().timeout(Duration::from_secs(5));
    let (_release, registry) = dialer.dial_services(&ctx(), ["a", "b"], true, false, &call).await;
    assert_eq!(registry.unwrap().len(), 2);

    let expected = DialOptions::new()
        .connect_timeout(Duration::from_secs(3))
        .timeout(Duration::from_secs(5))
        .lazy(true);
    assert_eq!(transport.options(), [expected.clone(), expected]);
}

#[tokio::test]
async fn find_looks_up_by_service_name() {
    let dialer = local_dialer(MockTransport::new(), RecordingTokenProvider::default());

    let (_release, registry) =
        dialer.dial_services(&ctx(), ["a", "b"], true, false, &DialOptions::default()).await;
    let registry = registry.unwrap();

    assert_eq!(registry.find("b").unwrap().service().as_str(), "b");
    assert!(matches!(registry.find("c").unwrap_err(), DialerError::NotFound { .. }));
}

#[tokio::test]
async fn empty_service_list_yields_empty_registry() {
    let transport = MockTransport::new();
    let dialer = local_dialer(transport.clone(), PanickingTokenProvider);

    let (release, registry) = dialer
        .dial_services(&ctx(), Vec::<String>::new(), true, true, &DialOptions::default())
        .await;
    let registry = registry.unwrap();

    assert!(registry.is_empty());
    assert!(matches!(registry.find("a").unwrap_err(), DialerError::NotFound { .. }));
    assert_eq!(release.pending(), 0);
    assert!(transport.dialed().is_empty());
}

#[tokio::test]
async fn auth_not_required_never_requests_tokens() {
    let dialer = local_dialer(MockTransport::new(), PanickingTokenProvider);

    let mut caller = CallContext::new();
    caller.metadata_mut().insert("x-trace", "t-1".parse().unwrap());

    let (_release, connection) =
        dialer.dial_service(&caller, "users", true, false, &DialOptions::default()).await;
    let connection = connection.unwrap();

    assert!(connection.context().metadata().get("x-trace").is_some());
    assert!(connection.context().metadata().get("authorization").is_none());
}

#[tokio::test]
async fn auth_uses_host_audience_and_bearer_token() {
    let provider = RecordingTokenProvider::default();
    let dialer = local_dialer(MockTransport::new(), provider.clone());

    let (_release, connection) =
        dialer.dial_service(&ctx(), "users", true, true, &DialOptions::default()).await;
    let connection = connection.unwrap();

    assert_eq!(provider.audiences(), ["https://users"]);
    let request = connection.request(());
    assert_eq!(
        request.metadata().get("authorization").and_then(|v| v.to_str().ok()),
        Some("Bearer token-for-users")
    );
}

#[tokio::test]
async fn authenticate_refreshes_context_for_dialed_connection() {
    let provider = RecordingTokenProvider::default();
    let dialer = local_dialer(MockTransport::new(), provider.clone());

    let (_release, connection) =
        dialer.dial_service(&ctx(), "orders", true, false, &DialOptions::default()).await;
    let connection = connection.unwrap();
    assert!(provider.audiences().is_empty());

    let fresh = dialer.authenticate(&ctx(), &connection, true).await.unwrap();
    assert_eq!(provider.audiences(), ["https://orders"]);
    assert_eq!(fresh.metadata().len(), 1);
}

#[tokio::test]
async fn tls_flag_selects_security() {
    let transport = MockTransport::new();
    let dialer = local_dialer(transport.clone(), PanickingTokenProvider);

    let (_r1, first) = dialer.dial_service(&ctx(), "a", true, false, &DialOptions::default()).await;
    let (_r2, second) =
        dialer.dial_service(&ctx(), "b", false, false, &DialOptions::default()).await;
    first.unwrap();
    second.unwrap();

    assert_eq!(
        transport.securities(),
        [Security::Tls(TlsPolicy::unverified()), Security::Plaintext]
    );
}

#[tokio::test]
async fn expired_deadline_is_a_dial_failure() {
    let transport = MockTransport::new();
    let dialer = local_dialer(transport.clone(), RecordingTokenProvider::default());
    let ctx = CallContext::new().with_timeout(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(5)).await;

    let (release, registry) =
        dialer.dial_services(&ctx, ["a", "b"], true, true, &DialOptions::default()).await;

    let err = registry.unwrap_err();
    assert!(matches!(err, DialerError::Dial { .. }));
    assert!(err.to_string().contains("service 'a'"));
    assert_eq!(release.pending(), 0);
}
