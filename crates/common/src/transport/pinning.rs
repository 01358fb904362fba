//! Certificate pinning
//!
//! Pins are base64 SHA-256 digests of a certificate's DER
//! `SubjectPublicKeyInfo`, optionally written with a `sha256/` prefix. A
//! connection to the pinned host is accepted only if the chain validates
//! against the trust roots *and* a validated path from the leaf to a trust
//! anchor carries a pinned key. Keys on that path are the leaf, the
//! intermediates the path uses, and the anchor itself, whether or not the
//! server sent it. Certificates the server presents outside the path never
//! count. Connections to other hosts (after a redirect, say) get plain
//! WebPKI validation.

use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::{CertificateDer, ServerName, TrustAnchor, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use sha2::{Digest, Sha256};
use webpki::{EndEntityCert, KeyUsage, VerifiedPath};
use x509_cert::der::asn1::AnyRef;
use x509_cert::der::{Decode, Encode, Tag};
use x509_cert::Certificate;

use super::response::FetchError;
use super::target::strip_www;

const PIN_PREFIX: &str = "sha256/";

/// SHA-256 digest of a `SubjectPublicKeyInfo`
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pin([u8; 32]);

impl Pin {
    /// Parse `sha256/<base64>` or bare `<base64>`
    pub fn parse(pin: &str) -> Result<Self, FetchError> {
        let encoded = pin.trim();
        let encoded = encoded.strip_prefix(PIN_PREFIX).unwrap_or(encoded);
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|_| FetchError::InvalidPin(pin.to_string()))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|_| FetchError::InvalidPin(pin.to_string()))?;
        Ok(Self(digest))
    }

    /// Pin of a DER `SubjectPublicKeyInfo`, outer `SEQUENCE` included
    pub fn of_spki(spki: &[u8]) -> Self {
        Self(Sha256::digest(spki).into())
    }

    /// Pin of a DER certificate, or `None` if it cannot be parsed
    pub fn of_certificate(der: &[u8]) -> Option<Self> {
        let cert = Certificate::from_der(der).ok()?;
        let spki = cert.tbs_certificate.subject_public_key_info.to_der().ok()?;
        Some(Self::of_spki(&spki))
    }

    /// Pin of a trust anchor's key
    ///
    /// Anchors keep only the contents of the SPKI `SEQUENCE`, so it is
    /// wrapped again before hashing.
    pub fn of_trust_anchor(anchor: &TrustAnchor<'_>) -> Option<Self> {
        let spki = AnyRef::new(Tag::Sequence, anchor.subject_public_key_info.as_ref())
            .ok()?
            .to_der()
            .ok()?;
        Some(Self::of_spki(&spki))
    }
}

impl fmt::Display for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PIN_PREFIX}{}", STANDARD.encode(self.0))
    }
}

impl fmt::Debug for Pin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pin({self})")
    }
}

/// Expected pins for one host, built fresh for every request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinSet {
    hostname: String,
    pins: Vec<Pin>,
}

impl PinSet {
    /// Parse every pin, failing on the first invalid one
    pub fn new<S: AsRef<str>>(hostname: &str, pins: &[S]) -> Result<Self, FetchError> {
        let pins = pins
            .iter()
            .map(|p| Pin::parse(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            hostname: strip_www(hostname).to_ascii_lowercase(),
            pins,
        })
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn pins(&self) -> &[Pin] {
        &self.pins
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }

    /// Whether these pins govern a connection to `server_name`
    pub fn applies_to(&self, server_name: &ServerName<'_>) -> bool {
        let name = match server_name {
            ServerName::DnsName(dns) => dns.as_ref().to_ascii_lowercase(),
            ServerName::IpAddress(ip) => std::net::IpAddr::from(*ip).to_string(),
            _ => return false,
        };
        strip_www(&name) == self.hostname
    }

    /// Whether any key on a validated path matches a pin
    pub(crate) fn matches_path(&self, path: &VerifiedPath<'_>) -> bool {
        let end_entity = Pin::of_spki(path.end_entity().subject_public_key_info().as_ref());
        let intermediates = path
            .intermediate_certificates()
            .map(|cert| Pin::of_spki(cert.subject_public_key_info().as_ref()));
        let anchor = Pin::of_trust_anchor(path.anchor());

        std::iter::once(end_entity)
            .chain(intermediates)
            .chain(anchor)
            .any(|pin| self.pins.contains(&pin))
    }
}

/// WebPKI validation followed by a pin check over validated paths
#[derive(Debug)]
pub(crate) struct PinnedVerifier {
    inner: Arc<WebPkiServerVerifier>,
    roots: Arc<RootCertStore>,
    algorithms: WebPkiSupportedAlgorithms,
    pins: PinSet,
}

impl PinnedVerifier {
    fn new(
        roots: Arc<RootCertStore>,
        provider: Arc<CryptoProvider>,
        pins: PinSet,
    ) -> Result<Self, FetchError> {
        let algorithms = provider.signature_verification_algorithms;
        let inner = webpki_verifier(roots.clone(), provider)?;
        Ok(Self {
            inner,
            roots,
            algorithms,
            pins,
        })
    }

    /// Search the leaf's validated paths for one carrying a pinned key
    ///
    /// Each candidate path webpki builds is offered to the pin check, and a
    /// rejected path sends the builder on to the next candidate.
    fn find_pinned_path(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        now: UnixTime,
    ) -> bool {
        let Ok(cert) = EndEntityCert::try_from(end_entity) else {
            return false;
        };

        cert.verify_for_usage(
            self.algorithms.all,
            &self.roots.roots,
            intermediates,
            now,
            KeyUsage::server_auth(),
            None,
            Some(&|path: &VerifiedPath<'_>| {
                if self.pins.matches_path(path) {
                    Ok(())
                } else {
                    Err(webpki::Error::UnknownIssuer)
                }
            }),
        )
        .is_ok()
    }
}

impl ServerCertVerifier for PinnedVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        let verified = self.inner.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        )?;

        if !self.pins.applies_to(server_name) {
            return Ok(verified);
        }

        if self.find_pinned_path(end_entity, intermediates, now) {
            tracing::debug!(host = %self.pins.hostname, "certificate pin matched");
            return Ok(verified);
        }

        tracing::warn!(
            host = %self.pins.hostname,
            presented = %Pin::of_certificate(end_entity.as_ref())
                .map(|p| p.to_string())
                .unwrap_or_default(),
            "certificate pin mismatch"
        );
        Err(rustls::Error::InvalidCertificate(
            CertificateError::ApplicationVerificationFailure,
        ))
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        self.inner.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.inner.supported_verify_schemes()
    }
}

/// Build the rustls client configuration for one request
///
/// Trusts the bundled Mozilla roots plus `extra_roots`, and enforces `pins`
/// when present.
pub(crate) fn client_config(
    extra_roots: &[CertificateDer<'static>],
    pins: Option<PinSet>,
) -> Result<ClientConfig, FetchError> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    for root in extra_roots {
        roots
            .add(root.clone())
            .map_err(|e| FetchError::Tls(format!("bad root certificate: {e}")))?;
    }

    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| FetchError::Tls(e.to_string()))?;

    let config = match pins {
        Some(pins) => {
            let verifier = PinnedVerifier::new(Arc::new(roots), provider, pins)?;
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(verifier))
                .with_no_client_auth()
        }
        None => builder.with_root_certificates(roots).with_no_client_auth(),
    };

    Ok(config)
}

fn webpki_verifier(
    roots: Arc<RootCertStore>,
    provider: Arc<CryptoProvider>,
) -> Result<Arc<WebPkiServerVerifier>, FetchError> {
    WebPkiServerVerifier::builder_with_provider(roots, provider)
        .build()
        .map_err(|e| FetchError::Tls(e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    const LEAF_DER: &[u8] = include_bytes!("../../tests/fixtures/leaf.der");
    const CA_DER: &[u8] = include_bytes!("../../tests/fixtures/ca.der");
    const LEAF_PIN: &str = "P26FGgvWx6IDV4/EmJMN2pVCOWX9/6+3q5G5BDvQ4IU=";
    const CA_PIN: &str = "aBcMZgo/WeRV4vvrc+n/TuptS26UANM97GrZ820xNOg=";
    // Self-signed, unrelated to the test CA
    const STRAY_DER: &[u8] = include_bytes!("../../tests/fixtures/stray.der");
    const STRAY_PIN: &str = "0avqgKtRFcEFRN4RcEZ+pIGwTt71F2yzk6UchTErU9s=";

    #[test]
    fn test_pin_of_certificate() {
        assert_eq!(
            Pin::of_certificate(LEAF_DER).unwrap(),
            Pin::parse(LEAF_PIN).unwrap()
        );
        assert_eq!(Pin::of_certificate(CA_DER).unwrap().to_string(), format!("sha256/{CA_PIN}"));
        assert!(Pin::of_certificate(b"not a certificate").is_none());
    }

    #[test]
    fn test_prefix_is_optional() {
        assert_eq!(
            Pin::parse(&format!("sha256/{LEAF_PIN}")).unwrap(),
            Pin::parse(LEAF_PIN).unwrap()
        );
    }

    #[test]
    fn test_invalid_pins() {
        assert!(matches!(Pin::parse("sha256/!!!"), Err(FetchError::InvalidPin(_))));
        // valid base64, wrong length
        assert!(matches!(Pin::parse("AAAA"), Err(FetchError::InvalidPin(_))));
        assert!(PinSet::new("example.com", &[LEAF_PIN, "nope"]).is_err());
    }

    fn verifier(pins: &[&str]) -> PinnedVerifier {
        let mut roots = RootCertStore::empty();
        roots.add(CertificateDer::from(CA_DER.to_vec())).unwrap();
        PinnedVerifier::new(
            Arc::new(roots),
            Arc::new(rustls::crypto::ring::default_provider()),
            PinSet::new("localhost", pins).unwrap(),
        )
        .unwrap()
    }

    fn verify(verifier: &PinnedVerifier, intermediates: &[&[u8]]) -> Result<(), rustls::Error> {
        let leaf = CertificateDer::from(LEAF_DER);
        let intermediates: Vec<_> = intermediates
            .iter()
            .map(|der| CertificateDer::from(*der))
            .collect();
        // 2030-01-01, inside the fixtures' validity window
        let now = UnixTime::since_unix_epoch(std::time::Duration::from_secs(1_893_456_000));

        verifier
            .verify_server_cert(
                &leaf,
                &intermediates,
                &ServerName::try_from("localhost").unwrap(),
                &[],
                now,
            )
            .map(|_| ())
    }

    #[test]
    fn test_leaf_and_ca_pins_match_validated_path() {
        assert!(verify(&verifier(&[LEAF_PIN]), &[CA_DER]).is_ok());
        assert!(verify(&verifier(&[CA_PIN]), &[CA_DER]).is_ok());
        assert!(verify(&verifier(&[STRAY_PIN, LEAF_PIN]), &[]).is_ok());
    }

    #[test]
    fn test_anchor_pin_matches_when_server_omits_root() {
        assert!(verify(&verifier(&[CA_PIN]), &[]).is_ok());
    }

    #[test]
    fn test_presented_certificate_outside_path_does_not_match() {
        let err = verify(&verifier(&[STRAY_PIN]), &[CA_DER, STRAY_DER]).unwrap_err();
        assert_eq!(
            err,
            rustls::Error::InvalidCertificate(CertificateError::ApplicationVerificationFailure)
        );
    }

    #[test]
    fn test_unrelated_pin_fails() {
        let other = STANDARD.encode([0u8; 32]);
        assert!(verify(&verifier(&[other.as_str()]), &[CA_DER]).is_err());
    }

    #[test]
    fn test_trust_anchor_pin_matches_certificate_pin() {
        let ca = CertificateDer::from(CA_DER);
        let anchor = webpki::anchor_from_trusted_cert(&ca).unwrap();
        assert_eq!(
            Pin::of_trust_anchor(&anchor).unwrap(),
            Pin::of_certificate(CA_DER).unwrap()
        );
    }

    #[test]
    fn test_hostname_scope() {
        let pins = PinSet::new("www.example.com", &[LEAF_PIN]).unwrap();
        assert_eq!(pins.hostname(), "example.com");

        let name = |s: &'static str| ServerName::try_from(s).unwrap();
        assert!(pins.applies_to(&name("example.com")));
        assert!(pins.applies_to(&name("www.example.com")));
        assert!(pins.applies_to(&name("EXAMPLE.com")));
        assert!(!pins.applies_to(&name("api.example.com")));
    }

    #[test]
    fn test_client_config_builds() {
        let root = CertificateDer::from(CA_DER.to_vec());
        assert!(client_config(&[root.clone()], None).is_ok());

        let pins = PinSet::new("localhost", &[LEAF_PIN]).unwrap();
        assert!(client_config(&[root], Some(pins)).is_ok());
    }
}
