//! Signing key storage
//!
//! Keys are PEM files on disk; the file's presence is the source of truth.
//! A key file, once created, is never overwritten — absence triggers
//! generation of a fresh ECDSA P-256 key, which is durably persisted
//! (written, fsynced, 0600) before it is handed to the caller.
//!
//! Recognized PEM block types on read: `PRIVATE KEY` (PKCS#8, what we
//! generate), plus `EC PRIVATE KEY` (SEC1) and `RSA PRIVATE KEY` (PKCS#1)
//! for legacy material, which are re-encoded as PKCS#8 before being handed
//! to the crypto backend. Anything else fails with
//! [`AcmedError::UnsupportedKeyType`].

use std::fs;
use std::io::Write;
use std::path::Path;

use pkcs8::EncodePrivateKey;
use rcgen::KeyPair;
use rsa::pkcs1::DecodeRsaPrivateKey;
use tracing::{debug, info};

use crate::error::AcmedError;

const PKCS8_TAG: &str = "PRIVATE KEY";
const EC_TAG: &str = "EC PRIVATE KEY";
const RSA_TAG: &str = "RSA PRIVATE KEY";

/// Read the key at `path`, or generate and persist a new one if the file
/// does not exist.
///
/// Read errors other than "file absent" are fatal to the caller: an
/// unreadable or corrupt key must never be silently regenerated.
pub fn load_or_generate(path: &Path) -> Result<KeyPair, AcmedError> {
    match fs::read(path) {
        Ok(bytes) => read_key(&bytes, path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => generate(path),
        Err(e) => Err(e.into()),
    }
}

fn read_key(bytes: &[u8], path: &Path) -> Result<KeyPair, AcmedError> {
    let block = pem::parse(bytes)?;
    let der = match block.tag() {
        PKCS8_TAG => block.contents().to_vec(),
        EC_TAG => sec1_to_pkcs8(block.contents(), path)?,
        RSA_TAG => pkcs1_to_pkcs8(block.contents(), path)?,
        tag => {
            return Err(AcmedError::UnsupportedKeyType {
                tag: tag.to_string(),
                path: path.to_path_buf(),
            })
        }
    };
    let key = KeyPair::try_from(der.as_slice())?;
    debug!(path = %path.display(), tag = block.tag(), "loaded signing key");
    Ok(key)
}

/// Re-encode a SEC1 `EC PRIVATE KEY` body (P-256) as PKCS#8 DER.
fn sec1_to_pkcs8(der: &[u8], path: &Path) -> Result<Vec<u8>, AcmedError> {
    let legacy = |e: &dyn std::fmt::Display| AcmedError::LegacyKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let key = p256::SecretKey::from_sec1_der(der).map_err(|e| legacy(&e))?;
    let doc = key.to_pkcs8_der().map_err(|e| legacy(&e))?;
    Ok(doc.as_bytes().to_vec())
}

/// Re-encode a PKCS#1 `RSA PRIVATE KEY` body as PKCS#8 DER.
fn pkcs1_to_pkcs8(der: &[u8], path: &Path) -> Result<Vec<u8>, AcmedError> {
    let legacy = |e: &dyn std::fmt::Display| AcmedError::LegacyKey {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };
    let key = rsa::RsaPrivateKey::from_pkcs1_der(der).map_err(|e| legacy(&e))?;
    let doc = key.to_pkcs8_der().map_err(|e| legacy(&e))?;
    Ok(doc.as_bytes().to_vec())
}

fn generate(path: &Path) -> Result<KeyPair, AcmedError> {
    let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // Written and synced before the key is returned, so a crash here
    // cannot leave the caller holding a key that was never persisted.
    let mut file = fs::File::create(path)?;
    file.write_all(key.serialize_pem().as_bytes())?;
    file.sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    info!(path = %path.display(), "generated new P-256 signing key");
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_generate_then_load_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("webs/example.com/example.com.key");

        let first = load_or_generate(&path).unwrap();
        let bytes_after_first = fs::read(&path).unwrap();

        let second = load_or_generate(&path).unwrap();
        let bytes_after_second = fs::read(&path).unwrap();

        assert_eq!(bytes_after_first, bytes_after_second);
        assert_eq!(first.serialize_der(), second.serialize_der());
    }

    #[test]
    fn test_generated_key_has_owner_only_permissions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("key.pem");
        load_or_generate(&path).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_unsupported_block_type_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bogus.key");
        let block = pem::Pem::new("CERTIFICATE REQUEST", vec![1, 2, 3]);
        fs::write(&path, pem::encode(&block)).unwrap();

        let err = load_or_generate(&path).unwrap_err();
        assert!(matches!(err, AcmedError::UnsupportedKeyType { .. }));
    }

    #[test]
    fn test_sec1_ec_key_is_read() {
        use p256::elliptic_curve::sec1::ToEncodedPoint;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("legacy.key");

        let secret = p256::SecretKey::from_slice(&[0x11; 32]).unwrap();
        let sec1 = secret.to_sec1_der().unwrap();
        let block = pem::Pem::new("EC PRIVATE KEY", sec1.to_vec());
        fs::write(&path, pem::encode(&block)).unwrap();

        let key = load_or_generate(&path).unwrap();
        assert!(key.is_compatible(&rcgen::PKCS_ECDSA_P256_SHA256));
        // Same key, not a silently generated replacement.
        assert_eq!(
            key.public_key_raw(),
            secret.public_key().to_encoded_point(false).as_bytes()
        );
        // The legacy file itself is left as found.
        assert_eq!(fs::read_to_string(&path).unwrap(), pem::encode(&block));
    }

    #[test]
    fn test_legacy_tag_with_bad_payload_is_fatal() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.key");
        let block = pem::Pem::new("EC PRIVATE KEY", vec![0xde, 0xad, 0xbe, 0xef]);
        fs::write(&path, pem::encode(&block)).unwrap();

        let err = load_or_generate(&path).unwrap_err();
        assert!(matches!(err, AcmedError::LegacyKey { .. }));
        assert_eq!(fs::read_to_string(&path).unwrap(), pem::encode(&block));
    }

    #[test]
    fn test_garbage_file_is_fatal_not_regenerated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("garbage.key");
        fs::write(&path, "not a pem file").unwrap();

        assert!(load_or_generate(&path).is_err());
        // The file must be left untouched.
        assert_eq!(fs::read_to_string(&path).unwrap(), "not a pem file");
    }
}
