//! Certificate authority: root CA lifecycle and per-host leaf issuance.
//!
//! The root CA is an ECDSA P-256 certificate persisted as two PEM files;
//! it is created on first use and loaded on every run after that. Leaf
//! certificates are minted per host, signed by the root, and live only in
//! the certificate cache.

use std::fs;
use std::path::{Path, PathBuf};

use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SerialNumber,
};
use rand::RngCore;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio_rustls::rustls::pki_types::CertificateDer;

use crate::cert_cache::LeafCert;

/// Leaf validity period (1 year).
const LEAF_TTL: Duration = Duration::days(365);
/// Leaf not-before skew, to tolerate client clock drift.
const LEAF_NOT_BEFORE_SKEW: Duration = Duration::hours(1);

/// Errors from CA operations.
#[derive(Debug, Error)]
pub enum CaError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse certificate or key: {0}")]
    Parse(String),

    #[error("private key is not ECDSA P-256")]
    NotEcdsa,

    #[error("certificate generation failed: {0}")]
    Generation(String),
}

/// CA certificate subject configuration.
#[derive(Debug, Clone)]
pub struct CaConfig {
    pub organization: String,
    pub common_name: String,
    /// Root validity in days (default 10 years).
    pub valid_days: i64,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            organization: "OmniProxy".to_string(),
            common_name: "OmniProxy Root CA".to_string(),
            valid_days: 10 * 365,
        }
    }
}

/// The root certificate authority.
pub struct Ca {
    issuer: Issuer<'static, KeyPair>,
    cert_pem: String,
    cert_der: CertificateDer<'static>,
}

impl std::fmt::Debug for Ca {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ca").finish_non_exhaustive()
    }
}

impl Ca {
    /// Loads the CA from the given PEM files if both exist, otherwise
    /// generates a new one and persists it (certificate world-readable,
    /// key owner-only).
    pub fn load_or_create(
        cert_path: impl AsRef<Path>,
        key_path: impl AsRef<Path>,
        config: &CaConfig,
    ) -> Result<Self, CaError> {
        let cert_path = cert_path.as_ref();
        let key_path = key_path.as_ref();

        if cert_path.exists() && key_path.exists() {
            return Self::load(cert_path, key_path);
        }

        let (cert_pem, key_pem) = Self::generate(config)?;
        Self::save(cert_path, key_path, &cert_pem, &key_pem)?;
        tracing::info!(path = %cert_path.display(), "generated new root CA");
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Loads an existing CA from PEM files.
    pub fn load(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> Result<Self, CaError> {
        let cert_pem = fs::read_to_string(cert_path)?;
        let key_pem = fs::read_to_string(key_path)?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Builds a CA from PEM-encoded certificate and key.
    pub fn from_pem(cert_pem: &str, key_pem: &str) -> Result<Self, CaError> {
        let key_pair = KeyPair::from_pem(key_pem).map_err(|e| CaError::Parse(e.to_string()))?;
        if !key_pair.is_compatible(&rcgen::PKCS_ECDSA_P256_SHA256) {
            return Err(CaError::NotEcdsa);
        }

        let issuer = Issuer::from_ca_cert_pem(cert_pem, key_pair)
            .map_err(|e| CaError::Parse(e.to_string()))?;

        let cert_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| CaError::Parse("no certificate in PEM".to_string()))?
            .map_err(|e| CaError::Parse(e.to_string()))?;

        Ok(Self {
            issuer,
            cert_pem: cert_pem.to_string(),
            cert_der,
        })
    }

    /// Generates a fresh self-signed root CA, returning (cert_pem, key_pem).
    fn generate(config: &CaConfig) -> Result<(String, String), CaError> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        let mut params = CertificateParams::new(Vec::<String>::new())
            .map_err(|e| CaError::Generation(e.to_string()))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::OrganizationName, config.organization.clone());
        dn.push(DnType::CommonName, config.common_name.clone());
        params.distinguished_name = dn;

        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![
            KeyUsagePurpose::KeyCertSign,
            KeyUsagePurpose::CrlSign,
            KeyUsagePurpose::DigitalSignature,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.serial_number = Some(random_serial());

        let now = OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + Duration::days(config.valid_days);

        let cert = params
            .self_signed(&key_pair)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        Ok((cert.pem(), key_pair.serialize_pem()))
    }

    /// Persists the CA pair: certificate 0644, private key 0600.
    fn save(cert_path: &Path, key_path: &Path, cert_pem: &str, key_pem: &str) -> Result<(), CaError> {
        if let Some(dir) = cert_path.parent() {
            fs::create_dir_all(dir)?;
        }
        if let Some(dir) = key_path.parent() {
            fs::create_dir_all(dir)?;
        }

        fs::write(cert_path, cert_pem)?;
        fs::write(key_path, key_pem)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(cert_path, fs::Permissions::from_mode(0o644))?;
            fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// The root certificate in PEM format, for client trust-store install.
    pub fn cert_pem(&self) -> &str {
        &self.cert_pem
    }

    /// The root certificate in DER format.
    pub fn cert_der(&self) -> &CertificateDer<'static> {
        &self.cert_der
    }

    /// Mints a leaf certificate for the given host, signed by this CA.
    /// Returns (cert_pem, key_pem).
    pub fn mint_leaf(&self, host: &str) -> Result<(String, String), CaError> {
        let key_pair = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        let mut params = CertificateParams::new(vec![host.to_string()])
            .map_err(|e| CaError::Generation(format!("invalid host {host:?}: {e}")))?;

        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, host);
        params.distinguished_name = dn;

        params.serial_number = Some(random_serial());
        params.key_usages = vec![
            KeyUsagePurpose::DigitalSignature,
            KeyUsagePurpose::KeyEncipherment,
        ];
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - LEAF_NOT_BEFORE_SKEW;
        params.not_after = now + LEAF_TTL;

        let cert = params
            .signed_by(&key_pair, &self.issuer)
            .map_err(|e| CaError::Generation(e.to_string()))?;

        Ok((cert.pem(), key_pair.serialize_pem()))
    }

    /// Mints a leaf and returns it parsed for TLS use: the chain is
    /// [leaf, root].
    pub fn mint_leaf_der(&self, host: &str) -> Result<LeafCert, CaError> {
        let (cert_pem, key_pem) = self.mint_leaf(host)?;

        let leaf_der = rustls_pemfile::certs(&mut cert_pem.as_bytes())
            .next()
            .ok_or_else(|| CaError::Parse("no certificate in minted PEM".to_string()))?
            .map_err(|e| CaError::Parse(e.to_string()))?;

        let key_der = rustls_pemfile::private_key(&mut key_pem.as_bytes())
            .map_err(|e| CaError::Parse(e.to_string()))?
            .ok_or_else(|| CaError::Parse("no private key in minted PEM".to_string()))?;

        Ok(LeafCert::new(
            vec![leaf_der, self.cert_der.clone()],
            key_der,
        ))
    }
}

/// 128-bit random serial number.
fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    // Clear the top bit so the DER integer stays positive without padding.
    bytes[0] &= 0x7F;
    SerialNumber::from(bytes.to_vec())
}

/// Default directory for CA files: `<home>/.omniproxy/ca`.
pub fn default_ca_dir() -> PathBuf {
    match directories::UserDirs::new() {
        Some(dirs) => dirs.home_dir().join(".omniproxy").join("ca"),
        None => PathBuf::from(".omniproxy").join("ca"),
    }
}

/// Default path for the CA certificate.
pub fn default_cert_path() -> PathBuf {
    default_ca_dir().join("omniproxy-ca.crt")
}

/// Default path for the CA private key.
pub fn default_key_path() -> PathBuf {
    default_ca_dir().join("omniproxy-ca.key")
}
