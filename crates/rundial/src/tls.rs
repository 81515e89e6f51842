//! TLS client configuration for gRPC channels.
//!
//! # Trust model
//!
//! [`TlsPolicy::default`] encrypts traffic but does **not** verify the server certificate.
//! Managed front ends terminate TLS with platform certificates and local setups often use
//! self-signed ones; callers that need verification opt in with [`TlsPolicy::verified`],
//! which checks the chain against the bundled WebPKI roots.

use crate::error::BoxError;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;

const ALPN_H2: &[u8] = b"h2";

/// Whether the peer certificate is checked during the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlsPolicy {
    verify_peer: bool,
}

impl TlsPolicy {
    /// Encrypt without verifying the peer certificate.
    #[must_use]
    pub const fn unverified() -> Self {
        Self { verify_peer: false }
    }

    /// Verify the peer chain against the WebPKI roots.
    #[must_use]
    pub const fn verified() -> Self {
        Self { verify_peer: true }
    }

    #[must_use]
    pub const fn verifies_peer(&self) -> bool {
        self.verify_peer
    }

    /// Builds a rustls client configuration advertising HTTP/2 via ALPN.
    ///
    /// # Errors
    /// Fails if the crypto provider cannot satisfy the default protocol versions.
    pub fn client_config(&self) -> Result<Arc<ClientConfig>, BoxError> {
        let provider = Arc::new(ring::default_provider());
        let builder = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?;

        let mut config = if self.verify_peer {
            let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        } else {
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { provider }))
                .with_no_client_auth()
        };
        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        Ok(Arc::new(config))
    }
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct AcceptAnyServerCert {
    provider: Arc<CryptoProvider>,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.provider.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.provider.signature_verification_algorithms.supported_schemes()
    }
}
