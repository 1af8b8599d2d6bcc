//! On-disk state for accounts and certificates
//!
//! Everything lives under a per-domain directory rooted at a configurable
//! base path:
//!
//! ```text
//! webs/
//! └── example.com/
//!     ├── account.key        # ACME account credentials (0600)
//!     ├── account.json       # account record, no key material (0600)
//!     ├── example.com.key    # certificate key, PEM (0600)
//!     └── example.com.crt    # certificate chain, PEM (0644)
//! ```
//!
//! Deleting a domain directory and re-running acmed regenerates everything;
//! presence of each file is the source of truth for its artifact.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

use crate::error::AcmedError;

const CERTIFICATE_TAG: &str = "CERTIFICATE";

/// Persisted account record: CA-assigned state plus the configured contact.
///
/// The account signing key is deliberately absent — it lives next door in
/// `account.key` and the two are joined only at the point of use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredAccount {
    /// Contact list as registered (`mailto:` form)
    pub contact: Vec<String>,
    /// Account status as reported by the CA
    pub status: String,
    /// Terms-of-service acceptance sent with the registration
    pub terms_of_service_agreed: bool,
    /// CA directory URL the account was registered against
    pub ca: String,
    /// When the registration was persisted
    pub created: DateTime<Utc>,
}

/// A certificate read back from disk, decoded enough to drive the renewal
/// decision.
#[derive(Debug, Clone)]
pub struct LoadedCertificate {
    /// Expiry of the leaf certificate
    pub not_after: DateTime<Utc>,
}

/// Filesystem layout for one acmed installation
#[derive(Debug, Clone)]
pub struct Storage {
    base: PathBuf,
}

impl Storage {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    fn domain_dir(&self, domain: &str) -> PathBuf {
        self.base.join("webs").join(domain)
    }

    /// Path of the account credentials file for `domain`
    pub fn account_key_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join("account.key")
    }

    /// Path of the account record for `domain`
    pub fn account_record_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join("account.json")
    }

    /// Path of the certificate key for `domain`
    pub fn certificate_key_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join(format!("{domain}.key"))
    }

    /// Path of the certificate file for `domain`
    pub fn certificate_path(&self, domain: &str) -> PathBuf {
        self.domain_dir(domain).join(format!("{domain}.crt"))
    }

    // =========================================================================
    // Account operations
    // =========================================================================

    /// Load the persisted account record, if any.
    pub fn load_account(&self, domain: &str) -> Result<Option<StoredAccount>, AcmedError> {
        let path = self.account_record_path(domain);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(domain = %domain, "no stored account record");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let record: StoredAccount = serde_json::from_str(&content)?;
        debug!(domain = %domain, contact = ?record.contact, "loaded account record");
        Ok(Some(record))
    }

    /// Persist the account record (key material is never written here).
    pub fn save_account(&self, domain: &str, record: &StoredAccount) -> Result<(), AcmedError> {
        let path = self.account_record_path(domain);
        fs::create_dir_all(self.domain_dir(domain))?;
        write_restricted(&path, serde_json::to_string_pretty(record)?.as_bytes())?;
        info!(domain = %domain, contact = ?record.contact, "saved account record");
        Ok(())
    }

    /// Load the raw account credentials blob, if present.
    pub fn load_account_credentials(&self, domain: &str) -> Result<Option<String>, AcmedError> {
        let path = self.account_key_path(domain);
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(domain = %domain, "no stored account credentials");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Persist the account credentials blob with owner-only permissions.
    pub fn save_account_credentials(
        &self,
        domain: &str,
        credentials: &str,
    ) -> Result<(), AcmedError> {
        let path = self.account_key_path(domain);
        fs::create_dir_all(self.domain_dir(domain))?;
        write_restricted(&path, credentials.as_bytes())?;
        debug!(domain = %domain, "saved account credentials");
        Ok(())
    }

    // =========================================================================
    // Certificate operations
    // =========================================================================

    /// Read and decode the stored certificate for `domain`.
    ///
    /// Returns `Ok(None)` when no certificate exists — the common
    /// "never issued" case. Decode failures are surfaced; the caller treats
    /// them as "no valid certificate" and proceeds to reissue.
    pub fn load_certificate(&self, domain: &str) -> Result<Option<LoadedCertificate>, AcmedError> {
        let path = self.certificate_path(domain);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(domain = %domain, "no stored certificate");
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let block = pem::parse(&bytes)?;
        if block.tag() != CERTIFICATE_TAG {
            return Err(AcmedError::UnsupportedBlockType {
                tag: block.tag().to_string(),
                path,
            });
        }

        let (_, cert) = x509_parser::parse_x509_certificate(block.contents()).map_err(|e| {
            AcmedError::CertificateParse {
                path: path.clone(),
                reason: e.to_string(),
            }
        })?;
        let not_after = DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0)
            .ok_or_else(|| AcmedError::CertificateParse {
                path: path.clone(),
                reason: "not-after out of range".into(),
            })?;

        debug!(domain = %domain, not_after = %not_after, "loaded stored certificate");
        Ok(Some(LoadedCertificate { not_after }))
    }

    /// Persist a freshly issued certificate.
    ///
    /// The PEM is written to a temporary file in the domain directory and
    /// renamed into place, so a failed issuance never replaces a previously
    /// valid certificate with a partial write. Certificates are not secret:
    /// mode 0644.
    pub fn write_certificate(&self, domain: &str, pem: &str) -> Result<(), AcmedError> {
        let dir = self.domain_dir(domain);
        fs::create_dir_all(&dir)?;
        let path = self.certificate_path(domain);
        let tmp = dir.join(format!("{domain}.crt.tmp"));

        let mut file = fs::File::create(&tmp)?;
        file.write_all(pem.as_bytes())?;
        file.sync_all()?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o644))?;
        }
        fs::rename(&tmp, &path)?;

        info!(domain = %domain, path = %path.display(), "saved certificate");
        Ok(())
    }
}

fn write_restricted(path: &Path, bytes: &[u8]) -> Result<(), AcmedError> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Storage) {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        (dir, storage)
    }

    fn self_signed_pem(domain: &str, days: i64) -> String {
        let mut params = rcgen::CertificateParams::new(vec![domain.to_string()]).unwrap();
        params
            .distinguished_name
            .push(rcgen::DnType::CommonName, domain);
        params.not_before = time::OffsetDateTime::now_utc();
        params.not_after = time::OffsetDateTime::now_utc() + time::Duration::days(days);
        let key = rcgen::KeyPair::generate().unwrap();
        params.self_signed(&key).unwrap().pem()
    }

    #[test]
    fn test_missing_certificate_is_absent_not_error() {
        let (_dir, storage) = setup();
        assert!(storage.load_certificate("example.com").unwrap().is_none());
    }

    #[test]
    fn test_certificate_roundtrip_reads_not_after() {
        let (_dir, storage) = setup();
        storage
            .write_certificate("example.com", &self_signed_pem("example.com", 90))
            .unwrap();

        let cert = storage.load_certificate("example.com").unwrap().unwrap();
        let days_left = (cert.not_after - Utc::now()).num_days();
        assert!((89..=90).contains(&days_left), "days_left = {days_left}");
    }

    #[test]
    fn test_non_certificate_block_rejected() {
        let (_dir, storage) = setup();
        let path = storage.certificate_path("example.com");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let block = pem::Pem::new("RSA PRIVATE KEY", vec![1, 2, 3]);
        fs::write(&path, pem::encode(&block)).unwrap();

        let err = storage.load_certificate("example.com").unwrap_err();
        assert!(matches!(err, AcmedError::UnsupportedBlockType { .. }));
    }

    #[test]
    fn test_certificate_write_is_atomic_replacement() {
        let (_dir, storage) = setup();
        let first = self_signed_pem("example.com", 30);
        let second = self_signed_pem("example.com", 365);
        storage.write_certificate("example.com", &first).unwrap();
        storage.write_certificate("example.com", &second).unwrap();

        let on_disk = fs::read_to_string(storage.certificate_path("example.com")).unwrap();
        assert_eq!(on_disk, second);
        // No stray temp file left behind.
        assert!(!storage
            .domain_dir("example.com")
            .join("example.com.crt.tmp")
            .exists());
    }

    #[test]
    fn test_account_record_roundtrip() {
        let (_dir, storage) = setup();
        assert!(storage.load_account("example.com").unwrap().is_none());

        let record = StoredAccount {
            contact: vec!["mailto:ops@example.com".into()],
            status: "valid".into(),
            terms_of_service_agreed: true,
            ca: "https://ca.test/dir".into(),
            created: Utc::now(),
        };
        storage.save_account("example.com", &record).unwrap();

        let loaded = storage.load_account("example.com").unwrap().unwrap();
        assert_eq!(loaded.contact, record.contact);
        assert_eq!(loaded.status, "valid");
        assert!(loaded.terms_of_service_agreed);
    }

    #[test]
    fn test_credentials_roundtrip_with_restricted_mode() {
        let (_dir, storage) = setup();
        storage
            .save_account_credentials("example.com", r#"{"id":"test"}"#)
            .unwrap();
        let loaded = storage
            .load_account_credentials("example.com")
            .unwrap()
            .unwrap();
        assert_eq!(loaded, r#"{"id":"test"}"#);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(storage.account_key_path("example.com"))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }
}
