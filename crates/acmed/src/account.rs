//! ACME account management
//!
//! One account per configured domain, persisted as two files under the
//! domain's directory: the registration record (contact, status, CA) and
//! the account credentials. An existing account is reused only when its
//! first contact still matches the configured email; otherwise a fresh
//! registration replaces both files.

use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info};

use crate::client::AcmeClient;
use crate::config::WebConfig;
use crate::error::AcmedError;
use crate::storage::{Storage, StoredAccount};

/// Bound on the registration round-trip
const REGISTER_TIMEOUT: Duration = Duration::from_secs(60);

/// A usable account: its stored record plus the credentials needed to
/// sign requests under it.
pub struct AccountHandle {
    pub record: StoredAccount,
    pub credentials: String,
}

/// Load the account for `web`, registering a new one when none exists
/// or when the stored contact no longer matches the configured email.
pub async fn ensure_account(
    client: &dyn AcmeClient,
    web: &WebConfig,
    storage: &Storage,
) -> Result<AccountHandle, AcmedError> {
    let contact = format!("mailto:{}", web.email);

    if let Some(record) = storage.load_account(&web.domain)? {
        if record.contact.first() == Some(&contact) {
            if let Some(credentials) = storage.load_account_credentials(&web.domain)? {
                debug!(domain = %web.domain, "reusing stored account");
                return Ok(AccountHandle {
                    record,
                    credentials,
                });
            }
        } else {
            info!(
                domain = %web.domain,
                contact = %contact,
                "stored account contact differs, re-registering"
            );
        }
    }

    let registration = tokio::time::timeout(
        REGISTER_TIMEOUT,
        client.register(&web.disco, &contact),
    )
    .await
    .map_err(|_| AcmedError::Timeout("account registration"))??;

    let record = StoredAccount {
        contact: vec![contact],
        status: registration.status,
        terms_of_service_agreed: true,
        ca: web.disco.clone(),
        created: Utc::now(),
    };

    // Credentials land first: a record without credentials would be
    // treated as valid on the next run.
    storage.save_account_credentials(&web.domain, &registration.credentials)?;
    storage.save_account(&web.domain, &record)?;
    info!(domain = %web.domain, ca = %web.disco, "registered new account");

    Ok(AccountHandle {
        record,
        credentials: registration.credentials,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{AcmeOrder, AccountRegistration};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingClient {
        registrations: AtomicUsize,
    }

    impl CountingClient {
        fn new() -> Self {
            Self {
                registrations: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AcmeClient for CountingClient {
        async fn register(
            &self,
            _directory_url: &str,
            _contact: &str,
        ) -> Result<AccountRegistration, AcmedError> {
            let n = self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(AccountRegistration {
                credentials: format!("{{\"registration\":{n}}}"),
                status: "valid".to_string(),
            })
        }

        async fn new_order(
            &self,
            _credentials: &str,
            _domain: &str,
        ) -> Result<Box<dyn AcmeOrder>, AcmedError> {
            unimplemented!("not exercised by account tests")
        }
    }

    fn web(email: &str) -> WebConfig {
        WebConfig {
            domain: "example.com".to_string(),
            email: email.to_string(),
            disco: "https://acme.test/directory".to_string(),
            remaining: 21,
            bundle: true,
        }
    }

    #[tokio::test]
    async fn registers_once_and_reuses() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        let client = CountingClient::new();
        let web = web("admin@example.com");

        let first = ensure_account(&client, &web, &storage).await.unwrap();
        let second = ensure_account(&client, &web, &storage).await.unwrap();

        assert_eq!(client.registrations.load(Ordering::SeqCst), 1);
        assert_eq!(first.credentials, second.credentials);
        assert_eq!(
            second.record.contact,
            vec!["mailto:admin@example.com".to_string()]
        );
    }

    #[tokio::test]
    async fn changed_email_triggers_re_registration() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        let client = CountingClient::new();

        ensure_account(&client, &web("old@example.com"), &storage)
            .await
            .unwrap();
        let handle = ensure_account(&client, &web("new@example.com"), &storage)
            .await
            .unwrap();

        assert_eq!(client.registrations.load(Ordering::SeqCst), 2);
        assert_eq!(
            handle.record.contact,
            vec!["mailto:new@example.com".to_string()]
        );

        // Stored record reflects the new registration.
        let stored = storage.load_account("example.com").unwrap().unwrap();
        assert_eq!(stored.contact, vec!["mailto:new@example.com".to_string()]);
    }

    #[tokio::test]
    async fn missing_credentials_re_registers() {
        let dir = TempDir::new().unwrap();
        let storage = Storage::new(dir.path());
        let client = CountingClient::new();
        let web = web("admin@example.com");

        ensure_account(&client, &web, &storage).await.unwrap();
        std::fs::remove_file(storage.account_key_path("example.com")).unwrap();
        ensure_account(&client, &web, &storage).await.unwrap();

        assert_eq!(client.registrations.load(Ordering::SeqCst), 2);
    }
}
