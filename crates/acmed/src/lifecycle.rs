//! Per-domain certificate lifecycle
//!
//! Drives one domain from stored state to a valid certificate: check the
//! current certificate's remaining validity, ensure an account, open an
//! order, authorize, finalize, persist. Domains are processed strictly
//! one at a time; a failure is recorded against its domain and the run
//! continues with the next one.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::account;
use crate::authz::{self, AUTHORIZATION_TIMEOUT};
use crate::client::AcmeClient;
use crate::config::{AcmedConfig, WebConfig};
use crate::error::AcmedError;
use crate::issue::{self, ISSUANCE_TIMEOUT};
use crate::keys;
use crate::storage::Storage;

/// What happened to one domain during a run.
#[derive(Debug)]
pub enum Outcome {
    /// The stored certificate is still outside the renewal window.
    StillValid { not_after: DateTime<Utc> },
    /// A new certificate was obtained and written.
    Issued,
}

/// True when a certificate expiring at `not_after` must be renewed.
///
/// Renewal is due once the remaining validity drops to the threshold or
/// below, expired certificates included.
pub fn renewal_due(not_after: DateTime<Utc>, threshold_days: i64, now: DateTime<Utc>) -> bool {
    not_after - now <= Duration::days(threshold_days)
}

pub struct Lifecycle {
    client: Arc<dyn AcmeClient>,
    storage: Storage,
    listen_addr: SocketAddr,
}

impl Lifecycle {
    pub fn new(client: Arc<dyn AcmeClient>, storage: Storage, listen_addr: SocketAddr) -> Self {
        Self {
            client,
            storage,
            listen_addr,
        }
    }

    /// Process every configured domain once, sequentially.
    ///
    /// Returns one result per domain, in configuration order. Errors are
    /// collected, not propagated: one broken domain never blocks the
    /// rest.
    pub async fn run(&self, config: &AcmedConfig) -> Vec<(String, Result<Outcome, AcmedError>)> {
        let mut results = Vec::with_capacity(config.webs.len());
        for web in &config.webs {
            let result = self.process_domain(web).await;
            match &result {
                Ok(Outcome::StillValid { not_after }) => {
                    info!(domain = %web.domain, not_after = %not_after, "certificate still valid");
                }
                Ok(Outcome::Issued) => {
                    info!(domain = %web.domain, "certificate issued");
                }
                Err(err) => {
                    error!(domain = %web.domain, error = %err, "certificate run failed");
                }
            }
            results.push((web.domain.clone(), result));
        }
        results
    }

    /// Check one domain and renew its certificate if due.
    pub async fn process_domain(
        &self,
        web: &WebConfig,
    ) -> Result<Outcome, AcmedError> {
        // An unreadable certificate file means reissue, not give up: the
        // domain would otherwise stay broken on every future run.
        let stored = match self.storage.load_certificate(&web.domain) {
            Ok(stored) => stored,
            Err(err) => {
                warn!(
                    domain = %web.domain,
                    error = %err,
                    "stored certificate unreadable, treating as absent"
                );
                None
            }
        };

        if let Some(cert) = stored {
            if !renewal_due(cert.not_after, web.remaining, Utc::now()) {
                return Ok(Outcome::StillValid {
                    not_after: cert.not_after,
                });
            }
            info!(
                domain = %web.domain,
                not_after = %cert.not_after,
                remaining_days = web.remaining,
                "certificate inside renewal window"
            );
        } else {
            info!(domain = %web.domain, "no stored certificate");
        }

        let account = account::ensure_account(self.client.as_ref(), web, &self.storage).await?;
        let key = keys::load_or_generate(&self.storage.certificate_key_path(&web.domain))?;
        // Built before the order so a malformed request fails without
        // consuming an authorization.
        let csr = issue::certificate_request(&key, &web.domain)?;

        let mut order = self
            .client
            .new_order(&account.credentials, &web.domain)
            .await?;

        let deadline = Instant::now() + AUTHORIZATION_TIMEOUT;
        authz::authorize(order.as_mut(), &web.domain, self.listen_addr, deadline).await?;

        let deadline = Instant::now() + ISSUANCE_TIMEOUT;
        issue::issue(order.as_mut(), web, &self.storage, &csr, deadline).await?;

        Ok(Outcome::Issued)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    #[test]
    fn due_when_inside_window() {
        let now = at("2026-01-01T00:00:00Z");
        assert!(renewal_due(at("2026-01-20T00:00:00Z"), 21, now));
    }

    #[test]
    fn due_exactly_at_threshold() {
        let now = at("2026-01-01T00:00:00Z");
        assert!(renewal_due(at("2026-01-22T00:00:00Z"), 21, now));
    }

    #[test]
    fn not_due_outside_window() {
        let now = at("2026-01-01T00:00:00Z");
        assert!(!renewal_due(at("2026-03-01T00:00:00Z"), 21, now));
    }

    #[test]
    fn expired_certificate_is_due() {
        let now = at("2026-01-01T00:00:00Z");
        assert!(renewal_due(at("2025-12-01T00:00:00Z"), 21, now));
    }
}
