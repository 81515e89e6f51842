#![allow(dead_code, unreachable_pub)]

use parking_lot::Mutex;
use rundial::{
    CallContext, DialOptions, Dialer, DialerError, Endpoint, Security, TokenProvider, Transport,
};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Handle produced by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockHandle {
    pub id: usize,
    pub target: String,
}

#[derive(Debug, Default)]
struct MockState {
    connects: Vec<(String, Security, DialOptions)>,
    closes: HashMap<String, usize>,
    fail_on: HashSet<String>,
    stall_on: HashSet<String>,
}

/// Records every connect and close; fails targets registered with [`MockTransport::fail_on`]
/// and never finishes connecting to those registered with [`MockTransport::stall_on`].
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn fail_on(self, target: &str) -> Self {
        self.state.lock().fail_on.insert(target.to_owned());
        self
    }

    #[must_use]
    pub fn stall_on(self, target: &str) -> Self {
        self.state.lock().stall_on.insert(target.to_owned());
        self
    }

    /// Targets dialed so far, in order (including failed attempts).
    #[must_use]
    pub fn dialed(&self) -> Vec<String> {
        self.state.lock().connects.iter().map(|(t, ..)| t.clone()).collect()
    }

    #[must_use]
    pub fn securities(&self) -> Vec<Security> {
        self.state.lock().connects.iter().map(|(_, s, _)| *s).collect()
    }

    /// Effective options of every dial, in order.
    #[must_use]
    pub fn options(&self) -> Vec<DialOptions> {
        self.state.lock().connects.iter().map(|(.., o)| o.clone()).collect()
    }

    #[must_use]
    pub fn closes(&self, target: &str) -> usize {
        self.state.lock().closes.get(target).copied().unwrap_or_default()
    }

    #[must_use]
    pub fn total_closes(&self) -> usize {
        self.state.lock().closes.values().sum()
    }
}

impl Transport for MockTransport {
    type Handle = MockHandle;

    async fn connect(
        &self,
        target: &str,
        security: Security,
        options: &DialOptions,
    ) -> Result<MockHandle, DialerError> {
        let (id, stall) = {
            let mut state = self.state.lock();
            state.connects.push((target.to_owned(), security, options.clone()));
            if state.fail_on.contains(target) {
                return Err(DialerError::Dial {
                    source: format!("connection refused by {target}").into(),
                    context: None,
                });
            }
            (state.connects.len(), state.stall_on.contains(target))
        };
        if stall {
            std::future::pending::<()>().await;
        }
        Ok(MockHandle { id, target: target.to_owned() })
    }

    fn close(&self, handle: MockHandle) {
        *self.state.lock().closes.entry(handle.target).or_default() += 1;
    }
}

/// Hands out `token-for-<audience>` and records requested audiences.
#[derive(Debug, Clone, Default)]
pub struct RecordingTokenProvider {
    audiences: Arc<Mutex<Vec<String>>>,
}

impl RecordingTokenProvider {
    #[must_use]
    pub fn audiences(&self) -> Vec<String> {
        self.audiences.lock().clone()
    }
}

impl TokenProvider for RecordingTokenProvider {
    async fn id_token(&self, audience: &str) -> Result<String, DialerError> {
        self.audiences.lock().push(audience.to_owned());
        Ok(format!("token-for-{}", audience.trim_start_matches("https://")))
    }
}

/// Fails the test if a token is ever requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct PanickingTokenProvider;

impl TokenProvider for PanickingTokenProvider {
    async fn id_token(&self, audience: &str) -> Result<String, DialerError> {
        panic!("token requested for {audience} although auth was not required")
    }
}

/// A dialer resolving every service to `<service>:443` over the given doubles.
///
/// # Panics
/// * If the dialer cannot be built.
#[must_use]
pub fn local_dialer<P: TokenProvider>(
    transport: MockTransport,
    provider: P,
) -> Dialer<MockTransport, P> {
    Dialer::builder()
        .local(|service| Endpoint::new(service, format!("{service}:443")))
        .transport(transport)
        .token_provider(provider)
        .build()
        .expect("Dialer setup failed")
}

#[must_use]
pub fn ctx() -> CallContext {
    CallContext::new()
}
