//! Signing certificate verification against the pinned fingerprints.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::apk;
use crate::app::App;
use crate::error::{Result, UpdaterError};
use crate::installed::PackageManager;

/// Outcome of a fingerprint check. Each variant with a digest carries the
/// lowercase hex SHA-256 of the examined certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FingerprintResult {
    Valid(String),
    Invalid(String),
    AppNotInstalled,
}

impl FingerprintResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, FingerprintResult::Valid(_))
    }

    pub fn hex_digest(&self) -> Option<&str> {
        match self {
            FingerprintResult::Valid(hex) | FingerprintResult::Invalid(hex) => Some(hex),
            FingerprintResult::AppNotInstalled => None,
        }
    }
}

impl fmt::Display for FingerprintResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FingerprintResult::Valid(hex) => write!(f, "valid ({hex})"),
            FingerprintResult::Invalid(hex) => write!(f, "INVALID ({hex})"),
            FingerprintResult::AppNotInstalled => f.write_str("not installed"),
        }
    }
}

/// SHA-256 of a certificate's encoded form.
pub fn certificate_fingerprint(certificate: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Sha256::digest(certificate));
    out
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check that `der` is exactly one DER SEQUENCE with a well-formed length.
fn check_der_sequence(der: &[u8]) -> Result<()> {
    let malformed = |msg: &str| UpdaterError::MalformedCertificate(msg.to_string());
    match der.first() {
        Some(0x30) => {}
        Some(_) => return Err(malformed("does not start with a SEQUENCE")),
        None => return Err(malformed("empty certificate")),
    }
    let first = *der.get(1).ok_or_else(|| malformed("missing length"))?;
    let (header, content) = if first < 0x80 {
        (2, first as usize)
    } else {
        let octets = (first & 0x7f) as usize;
        if octets == 0 || octets > 4 {
            return Err(malformed("unsupported length encoding"));
        }
        let bytes = der
            .get(2..2 + octets)
            .ok_or_else(|| malformed("truncated length"))?;
        if bytes[0] == 0 {
            return Err(malformed("non-minimal length"));
        }
        let len = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
        if len < 0x80 {
            return Err(malformed("non-minimal length"));
        }
        (2 + octets, len)
    };
    if header + content != der.len() {
        return Err(malformed("length does not match certificate size"));
    }
    Ok(())
}

/// Verifies signing certificates against each app's pinned fingerprint.
#[derive(Debug, Clone, Default)]
pub struct SignatureVerifier {
    overrides: HashMap<App, [u8; 32]>,
}

impl SignatureVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin `app` to `fingerprint` instead of the catalog value, e.g. for a
    /// self-signed build.
    pub fn with_pin(mut self, app: App, fingerprint: [u8; 32]) -> Self {
        self.overrides.insert(app, fingerprint);
        self
    }

    pub fn pinned(&self, app: App) -> [u8; 32] {
        self.overrides
            .get(&app)
            .copied()
            .unwrap_or(app.spec().signature_hash)
    }

    /// Compare the fingerprint of a DER certificate with the pin of `app`.
    pub fn verify_certificate(&self, app: App, certificate: &[u8]) -> Result<FingerprintResult> {
        check_der_sequence(certificate)?;
        let digest = certificate_fingerprint(certificate);
        let hex = hex::encode(digest);
        if constant_time_eq(&digest, &self.pinned(app)) {
            debug!(%app, fingerprint = %hex, "signing certificate matches");
            Ok(FingerprintResult::Valid(hex))
        } else {
            warn!(%app, fingerprint = %hex, expected = %hex::encode(self.pinned(app)), "signing certificate mismatch");
            Ok(FingerprintResult::Invalid(hex))
        }
    }

    /// Verify the signer of an APK held in memory.
    pub fn verify_apk(&self, app: App, apk: &[u8]) -> Result<FingerprintResult> {
        let certificate = apk::signing_certificate(apk)?;
        self.verify_certificate(app, &certificate)
    }

    /// Verify an APK on disk, reading and hashing it off the async executor.
    pub async fn verify_apk_file(&self, app: App, path: &Path) -> Result<FingerprintResult> {
        let verifier = self.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let apk = std::fs::read(&path)?;
            verifier.verify_apk(app, &apk)
        })
        .await
        .map_err(UpdaterError::from_join)?
    }

    /// Verify the signer of the installed package of `app`.
    pub fn verify_installed(
        &self,
        app: App,
        packages: &dyn PackageManager,
    ) -> Result<FingerprintResult> {
        let Some(info) = packages.package_info(app.package_name()) else {
            return Ok(FingerprintResult::AppNotInstalled);
        };
        let certificate = info.signing_certificates.first().ok_or_else(|| {
            UpdaterError::MalformedCertificate(format!("{} reports no signing certificate", app.package_name()))
        })?;
        self.verify_certificate(app, certificate)
    }
}
