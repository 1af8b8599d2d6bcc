//! ACME protocol transport
//!
//! The wire format — directory discovery, JWS signing, nonces, polling
//! backoff — is `instant-acme`'s job. This module is the seam between the
//! flows and that transport: [`AcmeClient`] / [`AcmeOrder`] expose exactly
//! the remote operations the flows orchestrate, over plain domain types, so
//! the lifecycle can be driven against a mock CA in tests.

use async_trait::async_trait;
use instant_acme::{
    Account, AccountCredentials, AuthorizationStatus, ChallengeType, Identifier, NewAccount,
    NewOrder, Order, OrderStatus,
};

use crate::error::AcmedError;

/// Kind tag of an offered challenge; only http-01 is ever consumed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Http01,
    Other,
}

/// One challenge offered inside an authorization. Ephemeral: consumed
/// within a single authorization flow, never persisted.
#[derive(Debug, Clone)]
pub struct OfferedChallenge {
    pub kind: ChallengeKind,
    pub token: String,
    pub url: String,
}

/// CA-side validation state for one domain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationState {
    Pending,
    Valid,
    Other,
}

/// Authorization for one identifier, with its ordered offered challenges
#[derive(Debug, Clone)]
pub struct DomainAuthorization {
    pub identifier: String,
    pub status: AuthorizationState,
    pub challenges: Vec<OfferedChallenge>,
}

/// Order progress as reported by the CA
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderPhase {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

/// Result of a successful account registration
#[derive(Debug)]
pub struct AccountRegistration {
    /// Opaque credentials blob (account key plus CA binding), stored at the
    /// account-key path
    pub credentials: String,
    /// Account status as reported by the CA
    pub status: String,
}

/// Remote operations against one CA
#[async_trait]
pub trait AcmeClient: Send + Sync {
    /// Register a new account with the given contact, agreeing to the CA's
    /// terms of service. Registration with an already-known account key is
    /// idempotent on the CA side.
    async fn register(
        &self,
        directory_url: &str,
        contact: &str,
    ) -> Result<AccountRegistration, AcmedError>;

    /// Open a certificate order for a single domain under the account
    /// identified by `credentials`.
    async fn new_order(
        &self,
        credentials: &str,
        domain: &str,
    ) -> Result<Box<dyn AcmeOrder>, AcmedError>;
}

/// One in-flight certificate order
#[async_trait]
pub trait AcmeOrder: Send {
    /// Fetch the order's authorizations with their offered challenges.
    async fn authorizations(&mut self) -> Result<Vec<DomainAuthorization>, AcmedError>;

    /// Compute the key-authorization value the responder must serve for
    /// `challenge`.
    fn key_authorization(&self, challenge: &OfferedChallenge) -> Result<String, AcmedError>;

    /// Signal the CA that the challenge at `url` is ready for validation.
    async fn set_challenge_ready(&mut self, url: &str) -> Result<(), AcmedError>;

    /// Re-fetch the order and report its current phase.
    async fn refresh(&mut self) -> Result<OrderPhase, AcmedError>;

    /// Submit the certificate signing request.
    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), AcmedError>;

    /// Fetch the issued certificate chain (PEM, leaf first), or `None` if
    /// the CA has not published it yet.
    async fn certificate_chain(&mut self) -> Result<Option<String>, AcmedError>;
}

/// Production transport over `instant-acme`
#[derive(Debug, Default)]
pub struct DirectoryClient;

impl DirectoryClient {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AcmeClient for DirectoryClient {
    async fn register(
        &self,
        directory_url: &str,
        contact: &str,
    ) -> Result<AccountRegistration, AcmedError> {
        let (_account, credentials) = Account::create(
            &NewAccount {
                contact: &[contact],
                terms_of_service_agreed: true,
                only_return_existing: false,
            },
            directory_url,
            None,
        )
        .await?;

        Ok(AccountRegistration {
            credentials: serde_json::to_string(&credentials)?,
            // A successful registration response implies a usable account.
            status: "valid".to_string(),
        })
    }

    async fn new_order(
        &self,
        credentials: &str,
        domain: &str,
    ) -> Result<Box<dyn AcmeOrder>, AcmedError> {
        let credentials: AccountCredentials = serde_json::from_str(credentials)?;
        let account = Account::from_credentials(credentials).await?;
        let order = account
            .new_order(&NewOrder {
                identifiers: &[Identifier::Dns(domain.to_string())],
            })
            .await?;
        Ok(Box::new(LiveOrder {
            order,
            authorizations: Vec::new(),
        }))
    }
}

/// [`AcmeOrder`] over a live `instant_acme::Order`.
///
/// The raw authorizations are kept so `key_authorization` can hand the
/// original challenge object back to the transport.
struct LiveOrder {
    order: Order,
    authorizations: Vec<instant_acme::Authorization>,
}

#[async_trait]
impl AcmeOrder for LiveOrder {
    async fn authorizations(&mut self) -> Result<Vec<DomainAuthorization>, AcmedError> {
        self.authorizations = self.order.authorizations().await?;
        Ok(self
            .authorizations
            .iter()
            .map(|authz| {
                let Identifier::Dns(identifier) = &authz.identifier;
                DomainAuthorization {
                    identifier: identifier.clone(),
                    status: match authz.status {
                        AuthorizationStatus::Valid => AuthorizationState::Valid,
                        AuthorizationStatus::Pending => AuthorizationState::Pending,
                        _ => AuthorizationState::Other,
                    },
                    challenges: authz
                        .challenges
                        .iter()
                        .map(|c| OfferedChallenge {
                            kind: if c.r#type == ChallengeType::Http01 {
                                ChallengeKind::Http01
                            } else {
                                ChallengeKind::Other
                            },
                            token: c.token.clone(),
                            url: c.url.clone(),
                        })
                        .collect(),
                }
            })
            .collect())
    }

    fn key_authorization(&self, challenge: &OfferedChallenge) -> Result<String, AcmedError> {
        let raw = self
            .authorizations
            .iter()
            .flat_map(|a| a.challenges.iter())
            .find(|c| c.token == challenge.token)
            .ok_or_else(|| AcmedError::NoSupportedChallenge(challenge.token.clone()))?;
        Ok(self.order.key_authorization(raw).as_str().to_string())
    }

    async fn set_challenge_ready(&mut self, url: &str) -> Result<(), AcmedError> {
        self.order.set_challenge_ready(url).await?;
        Ok(())
    }

    async fn refresh(&mut self) -> Result<OrderPhase, AcmedError> {
        self.order.refresh().await?;
        Ok(order_phase(self.order.state().status))
    }

    async fn finalize(&mut self, csr_der: &[u8]) -> Result<(), AcmedError> {
        self.order.finalize(csr_der).await?;
        Ok(())
    }

    async fn certificate_chain(&mut self) -> Result<Option<String>, AcmedError> {
        Ok(self.order.certificate().await?)
    }
}

fn order_phase(status: OrderStatus) -> OrderPhase {
    match status {
        OrderStatus::Pending => OrderPhase::Pending,
        OrderStatus::Ready => OrderPhase::Ready,
        OrderStatus::Processing => OrderPhase::Processing,
        OrderStatus::Valid => OrderPhase::Valid,
        OrderStatus::Invalid => OrderPhase::Invalid,
    }
}
