//! TLS configuration: loading an existing certificate/key pair and judging
//! whether it needs renewal. Actually provisioning a new pair is delegated
//! to an external `openssl` invocation — narrow interface, external
//! collaborator, out of this crate's scope.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig as RustlsServerConfig;
use thiserror::Error;

/// How long before expiry a certificate is considered due for renewal.
pub const RENEWAL_EPSILON: Duration = Duration::from_secs(60 * 60 * 24 * 14);

/// Errors from loading or validating a certificate/key pair.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The certificate or key file could not be read or parsed.
    #[error("failed to load TLS material: {0}")]
    Load(#[source] std::io::Error),
    /// rustls rejected the certificate/key pair.
    #[error("invalid TLS certificate or key: {0}")]
    Invalid(#[source] rustls::Error),
    /// No certificate was found in the PEM file.
    #[error("no certificate found at {0}")]
    MissingCertificate(String),
    /// No private key was found in the PEM file.
    #[error("no private key found at {0}")]
    MissingKey(String),
    /// The leaf certificate could not be parsed to inspect its validity
    /// window.
    #[error("failed to parse leaf certificate: {0}")]
    Parse(String),
}

/// A loaded certificate chain and its private key, ready to build a
/// [`rustls::ServerConfig`] from.
pub struct CertificatePair {
    chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl CertificatePair {
    /// Reads a PEM-encoded certificate chain from `cert_path` and a
    /// PEM-encoded private key from `key_path`.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, TlsError> {
        let cert_file = std::fs::File::open(cert_path).map_err(TlsError::Load)?;
        let chain: Vec<CertificateDer<'static>> = rustls_pemfile::certs(&mut BufReader::new(cert_file))
            .collect::<Result<_, _>>()
            .map_err(TlsError::Load)?;
        if chain.is_empty() {
            return Err(TlsError::MissingCertificate(cert_path.display().to_string()));
        }

        let key_file = std::fs::File::open(key_path).map_err(TlsError::Load)?;
        let key = rustls_pemfile::private_key(&mut BufReader::new(key_file))
            .map_err(TlsError::Load)?
            .ok_or_else(|| TlsError::MissingKey(key_path.display().to_string()))?;

        Ok(Self { chain, key })
    }

    /// Builds a [`rustls::ServerConfig`] negotiating HTTP/2 only (ALPN
    /// `h2`), as required for an HTTP/2-only server.
    pub fn into_rustls_config(self) -> Result<Arc<RustlsServerConfig>, TlsError> {
        let mut config = RustlsServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.chain, self.key)
            .map_err(TlsError::Invalid)?;
        config.alpn_protocols = vec![b"h2".to_vec()];
        Ok(Arc::new(config))
    }

    /// Whether the leaf certificate is within `window` of expiring (or
    /// already expired).
    pub fn expires_within(&self, window: Duration) -> Result<bool, TlsError> {
        let leaf = self.chain.first().ok_or_else(|| TlsError::Parse("empty certificate chain".into()))?;
        let (_, parsed) =
            x509_parser::parse_x509_certificate(leaf.as_ref()).map_err(|err| TlsError::Parse(err.to_string()))?;
        let not_after = parsed.validity().not_after.timestamp();
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;
        Ok(not_after - now <= window.as_secs() as i64)
    }

    pub fn chain(&self) -> &[CertificateDer<'static>] {
        &self.chain
    }
}

#[cfg(test)]
const VALID_CERT: &str = include_str!("../tests/fixtures/valid.crt");
#[cfg(test)]
const VALID_KEY: &str = include_str!("../tests/fixtures/valid.key");
#[cfg(test)]
const EXPIRING_CERT: &str = include_str!("../tests/fixtures/expiring.crt");
#[cfg(test)]
const EXPIRING_KEY: &str = include_str!("../tests/fixtures/expiring.key");

/// An external collaborator responsible for generating a self-signed
/// certificate/key pair when one is missing or due for renewal. The core
/// never shells out to `openssl` itself.
pub trait CertificateProvisioner: Send + Sync {
    /// Generates (or regenerates) a certificate/key pair for the given DNS
    /// names, valid for `days`, storing it at `<path>.crt` / `<path>.key`.
    fn provision(&self, path: &Path, dns_names: &[String], days: u32) -> Result<(), anyhow::Error>;
}

/// Loads the certificate at `path` (`<path>.crt` / `<path>.key`),
/// provisioning a fresh one via `provisioner` if missing or within
/// [`RENEWAL_EPSILON`] of expiring.
pub fn load_or_provision(
    path: &Path,
    dns_names: &[String],
    days: u32,
    provisioner: &dyn CertificateProvisioner,
) -> Result<CertificatePair, anyhow::Error> {
    let cert_path = path.with_extension("crt");
    let key_path = path.with_extension("key");

    if !cert_path.exists() || !key_path.exists() {
        provisioner.provision(path, dns_names, days)?;
        return Ok(CertificatePair::load(&cert_path, &key_path)?);
    }

    let existing = CertificatePair::load(&cert_path, &key_path)?;
    if existing.expires_within(RENEWAL_EPSILON)? {
        tracing::info!(path = %path.display(), "certificate due for renewal, regenerating");
        provisioner.provision(path, dns_names, days)?;
        return Ok(CertificatePair::load(&cert_path, &key_path)?);
    }

    Ok(existing)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tracing_test::traced_test;

    use super::*;

    struct RecordingProvisioner {
        calls: Arc<AtomicUsize>,
        cert: &'static str,
        key: &'static str,
    }

    impl CertificateProvisioner for RecordingProvisioner {
        fn provision(&self, path: &Path, _dns_names: &[String], _days: u32) -> Result<(), anyhow::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::fs::write(path.with_extension("crt"), self.cert)?;
            std::fs::write(path.with_extension("key"), self.key)?;
            Ok(())
        }
    }

    #[test]
    fn expires_within_is_false_for_a_long_lived_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.crt");
        let key_path = dir.path().join("cert.key");
        std::fs::write(&cert_path, VALID_CERT).unwrap();
        std::fs::write(&key_path, VALID_KEY).unwrap();

        let pair = CertificatePair::load(&cert_path, &key_path).unwrap();
        assert!(!pair.expires_within(RENEWAL_EPSILON).unwrap());
    }

    #[test]
    fn expires_within_is_true_for_a_certificate_expiring_tomorrow() {
        let dir = tempfile::tempdir().unwrap();
        let cert_path = dir.path().join("cert.crt");
        let key_path = dir.path().join("cert.key");
        std::fs::write(&cert_path, EXPIRING_CERT).unwrap();
        std::fs::write(&key_path, EXPIRING_KEY).unwrap();

        let pair = CertificatePair::load(&cert_path, &key_path).unwrap();
        assert!(pair.expires_within(RENEWAL_EPSILON).unwrap());
    }

    #[test]
    fn load_or_provision_provisions_once_when_files_are_missing() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cert");
        let calls = Arc::new(AtomicUsize::new(0));
        let provisioner = RecordingProvisioner { calls: calls.clone(), cert: VALID_CERT, key: VALID_KEY };

        load_or_provision(&base, &["localhost".to_string()], 825, &provisioner).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn load_or_provision_leaves_a_healthy_certificate_alone() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cert");
        std::fs::write(base.with_extension("crt"), VALID_CERT).unwrap();
        std::fs::write(base.with_extension("key"), VALID_KEY).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let provisioner = RecordingProvisioner { calls: calls.clone(), cert: VALID_CERT, key: VALID_KEY };

        load_or_provision(&base, &["localhost".to_string()], 825, &provisioner).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[traced_test]
    #[test]
    fn load_or_provision_logs_and_regenerates_a_near_expiry_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("cert");
        std::fs::write(base.with_extension("crt"), EXPIRING_CERT).unwrap();
        std::fs::write(base.with_extension("key"), EXPIRING_KEY).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let provisioner = RecordingProvisioner { calls: calls.clone(), cert: VALID_CERT, key: VALID_KEY };

        load_or_provision(&base, &["localhost".to_string()], 825, &provisioner).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(logs_contain("due for renewal"));
    }
}
