//! Order finalization and certificate download
//!
//! Finalizes an authorized order with a CSR the caller built up front,
//! polls until the CA has signed, downloads the chain and writes it to
//! disk. When bundling is disabled only the leaf certificate is kept.

use std::time::Duration;

use rcgen::{CertificateParams, DnType, KeyPair};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::client::{AcmeOrder, OrderPhase};
use crate::config::WebConfig;
use crate::error::AcmedError;
use crate::storage::Storage;

/// Overall bound on finalization plus download
pub const ISSUANCE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Build a CSR for `domain` signed with its certificate key.
pub fn certificate_request(key: &KeyPair, domain: &str) -> Result<Vec<u8>, AcmedError> {
    let mut params = CertificateParams::new(vec![domain.to_string()])?;
    params
        .distinguished_name
        .push(DnType::CommonName, domain);
    let csr = params.serialize_request(key)?;
    Ok(csr.der().to_vec())
}

/// Finalize an authorized order and persist the signed certificate.
pub async fn issue(
    order: &mut dyn AcmeOrder,
    web: &WebConfig,
    storage: &Storage,
    csr_der: &[u8],
    deadline: Instant,
) -> Result<(), AcmedError> {
    order.finalize(csr_der).await?;
    debug!(domain = %web.domain, "order finalized, awaiting certificate");

    loop {
        match order.refresh().await? {
            OrderPhase::Valid => break,
            OrderPhase::Invalid => {
                return Err(AcmedError::OrderInvalid(web.domain.clone()));
            }
            // Pending / Ready / Processing: the CA is still signing.
            _ => {}
        }

        let next = Instant::now() + POLL_INTERVAL;
        if next > deadline {
            return Err(AcmedError::Timeout("certificate issuance"));
        }
        sleep_until(next).await;
    }

    let chain = loop {
        if let Some(chain) = order.certificate_chain().await? {
            break chain;
        }
        let next = Instant::now() + POLL_INTERVAL;
        if next > deadline {
            return Err(AcmedError::Timeout("certificate download"));
        }
        sleep_until(next).await;
    };

    let pem = if web.bundle {
        chain
    } else {
        leaf_only(&chain)?
    };
    storage.write_certificate(&web.domain, &pem)?;
    info!(domain = %web.domain, bundle = web.bundle, "certificate written");
    Ok(())
}

/// Trim a PEM chain down to its first certificate.
fn leaf_only(chain: &str) -> Result<String, AcmedError> {
    let blocks = pem::parse_many(chain)?;
    let leaf = blocks
        .into_iter()
        .find(|b| b.tag() == "CERTIFICATE")
        .ok_or_else(|| AcmedError::OrderInvalid("empty certificate chain".to_string()))?;
    Ok(pem::encode(&leaf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csr_is_der_encoded() {
        let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
        let der = certificate_request(&key, "example.com").unwrap();
        // DER SEQUENCE header.
        assert_eq!(der[0], 0x30);
        assert!(der.len() > 100);
    }

    #[test]
    fn leaf_only_drops_intermediates() {
        let make = |domain: &str| {
            let key = KeyPair::generate_for(&rcgen::PKCS_ECDSA_P256_SHA256).unwrap();
            let params = CertificateParams::new(vec![domain.to_string()]).unwrap();
            params.self_signed(&key).unwrap().pem()
        };
        let chain = format!("{}{}", make("leaf.example.com"), make("intermediate.test"));

        let trimmed = leaf_only(&chain).unwrap();
        let blocks = pem::parse_many(&trimmed).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].tag(), "CERTIFICATE");
    }

    #[test]
    fn leaf_only_rejects_garbage() {
        assert!(leaf_only("not a pem").is_err());
    }
}
