//! TLS trust policy and client configuration.
//!
//! Both transports build their rustls configuration here, so the trust
//! decision is made once per transport from an explicit [`TrustPolicy`].

use crate::error::{Result, TransportError};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tracing::{debug, warn};

/// ALPN id negotiated by the multiplexed transport.
pub const ALPN_H2: &[u8] = b"h2";

/// ALPN id negotiated by the sequential transport.
pub const ALPN_HTTP11: &[u8] = b"http/1.1";

/// How server certificates are verified.
#[derive(Debug, Clone)]
pub enum TrustPolicy {
    /// Verify against the bundled Mozilla root store.
    WebPki,
    /// Verify with a caller-supplied verifier.
    Custom(Arc<dyn ServerCertVerifier>),
    /// Accept any certificate for any host name.
    ///
    /// Only for talking to test endpoints with self-signed certificates.
    InsecureAcceptAll,
}

static TLS12_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS12];
static TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Protocol versions selected by the `ssl_version` setting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SslVersion {
    /// TLS 1.2 and 1.3
    Any,
    /// TLS 1.2 only
    Tls12,
    /// TLS 1.3 only
    Tls13,
}

impl SslVersion {
    /// Parse `"TLS"`, `"TLSv1.2"` or `"TLSv1.3"`.
    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "TLS" => Ok(Self::Any),
            "TLSv1.2" => Ok(Self::Tls12),
            "TLSv1.3" => Ok(Self::Tls13),
            other => Err(TransportError::InvalidConfig(format!(
                "unsupported ssl_version {other:?}, expected TLS, TLSv1.2 or TLSv1.3"
            ))),
        }
    }

    fn protocol_versions(self) -> &'static [&'static rustls::SupportedProtocolVersion] {
        match self {
            Self::Any => rustls::ALL_VERSIONS,
            Self::Tls12 => TLS12_ONLY,
            Self::Tls13 => TLS13_ONLY,
        }
    }
}

/// Build a rustls client configuration.
pub fn client_config(
    policy: &TrustPolicy,
    ssl_version: &str,
    alpn: &[&[u8]],
) -> Result<ClientConfig> {
    let versions = SslVersion::parse(ssl_version)?.protocol_versions();
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
        .with_protocol_versions(versions)?;

    let mut config = match policy {
        TrustPolicy::WebPki => {
            let roots = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TrustPolicy::Custom(verifier) => builder
            .dangerous()
            .with_custom_certificate_verifier(Arc::clone(verifier))
            .with_no_client_auth(),
        TrustPolicy::InsecureAcceptAll => {
            warn!("TLS certificate verification is disabled; every server certificate is trusted");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert::new(&provider)))
                .with_no_client_auth()
        }
    };

    config.alpn_protocols = alpn.iter().map(|id| id.to_vec()).collect();
    debug!(ssl_version, alpn = ?config.alpn_protocols, "Built TLS client configuration");
    Ok(config)
}

/// Parse a host into a TLS server name.
pub(crate) fn server_name(host: &str) -> Result<ServerName<'static>> {
    ServerName::try_from(host.to_string())
        .map_err(|e| TransportError::Tls(format!("invalid server name {host:?}: {e}")))
}

/// Verifier that skips certificate and host name checks but still verifies
/// handshake signatures.
#[derive(Debug)]
pub struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyServerCert {
    /// Use the signature algorithms of `provider`.
    pub fn new(provider: &CryptoProvider) -> Self {
        Self {
            algorithms: provider.signature_verification_algorithms,
        }
    }
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("TLS", SslVersion::Any)]
    #[case("TLSv1.2", SslVersion::Tls12)]
    #[case("TLSv1.3", SslVersion::Tls13)]
    fn test_ssl_version_parse(#[case] input: &str, #[case] expected: SslVersion) {
        assert_eq!(SslVersion::parse(input).unwrap(), expected);
    }

    #[rstest]
    #[case(SslVersion::Any, 2)]
    #[case(SslVersion::Tls12, 1)]
    #[case(SslVersion::Tls13, 1)]
    fn test_protocol_versions(#[case] version: SslVersion, #[case] count: usize) {
        let versions = version.protocol_versions();
        assert_eq!(versions.len(), count);
        if version == SslVersion::Tls12 {
            assert_eq!(versions[0].version, rustls::ProtocolVersion::TLSv1_2);
        }
        if version == SslVersion::Tls13 {
            assert_eq!(versions[0].version, rustls::ProtocolVersion::TLSv1_3);
        }
    }

    #[test]
    fn test_unknown_ssl_version_rejected() {
        let err = SslVersion::parse("SSLv3").unwrap_err();
        assert!(matches!(err, TransportError::InvalidConfig(_)));
        assert!(client_config(&TrustPolicy::WebPki, "TLSv1.1", &[ALPN_H2]).is_err());
    }

    #[test]
    fn test_client_config_sets_alpn() {
        let config = client_config(&TrustPolicy::WebPki, "TLS", &[ALPN_H2]).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"h2".to_vec()]);
    }

    #[test]
    fn test_insecure_policy_builds() {
        let config =
            client_config(&TrustPolicy::InsecureAcceptAll, "TLSv1.2", &[ALPN_HTTP11]).unwrap();
        assert_eq!(config.alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_custom_policy_uses_verifier() {
        let provider = rustls::crypto::ring::default_provider();
        let verifier: Arc<dyn ServerCertVerifier> = Arc::new(AcceptAnyServerCert::new(&provider));
        assert!(!verifier.supported_verify_schemes().is_empty());
        assert!(client_config(&TrustPolicy::Custom(verifier), "TLSv1.3", &[]).is_ok());
    }

    #[test]
    fn test_server_name() {
        assert!(server_name("api.push.example.com").is_ok());
        assert!(server_name("127.0.0.1").is_ok());
        assert!(server_name("bad host").is_err());
    }
}
