//! Domain authorization flow
//!
//! Proves control of one domain to the CA: pick the http-01 challenge,
//! stand up the responder, signal the CA, poll until the authorization
//! resolves, tear the responder down. The listener bind completes before
//! the CA is signalled, so validation can never race a half-started
//! responder. Teardown happens on every exit path: explicitly on the
//! normal paths, via abort-on-drop if an error propagates past the
//! responder.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use crate::challenge::ChallengeResponder;
use crate::client::{AcmeOrder, AuthorizationState, ChallengeKind, OrderPhase};
use crate::error::AcmedError;

/// Overall bound on one authorization flow
pub const AUTHORIZATION_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Authorize `domain` on an open order, bounded by `deadline`.
///
/// Already-valid authorizations are reused without a challenge round.
/// Any network or protocol failure aborts the attempt without retry; the
/// lifecycle reports it and moves on to the next domain.
pub async fn authorize(
    order: &mut dyn AcmeOrder,
    domain: &str,
    listen_addr: SocketAddr,
    deadline: Instant,
) -> Result<(), AcmedError> {
    let authorizations = order.authorizations().await?;

    for authz in authorizations {
        match authz.status {
            AuthorizationState::Valid => {
                // Re-authorization within the CA's reuse window.
                debug!(domain = %domain, "authorization already valid");
                continue;
            }
            AuthorizationState::Pending => {}
            AuthorizationState::Other => {
                return Err(AcmedError::AuthorizationFailed(domain.to_string()));
            }
        }

        let challenge = authz
            .challenges
            .iter()
            .find(|c| c.kind == ChallengeKind::Http01)
            .ok_or_else(|| AcmedError::NoSupportedChallenge(domain.to_string()))?;
        let value = order.key_authorization(challenge)?;

        // Bind first; a successful return is the readiness signal.
        let responder = ChallengeResponder::serve(listen_addr, &challenge.token, &value).await?;

        let result = validate(order, domain, &challenge.url, deadline).await;
        responder.close().await;
        result?;
    }

    info!(domain = %domain, "authorization complete");
    Ok(())
}

/// Signal the CA and poll until the authorization resolves.
async fn validate(
    order: &mut dyn AcmeOrder,
    domain: &str,
    challenge_url: &str,
    deadline: Instant,
) -> Result<(), AcmedError> {
    order.set_challenge_ready(challenge_url).await?;
    debug!(domain = %domain, "challenge accepted, polling authorization");

    loop {
        match order.refresh().await? {
            // Still pending: the authorization has not resolved yet.
            OrderPhase::Pending => {}
            OrderPhase::Invalid => {
                return Err(AcmedError::AuthorizationFailed(domain.to_string()));
            }
            // Ready / Processing / Valid all mean the authorization held.
            _ => return Ok(()),
        }

        let next = Instant::now() + POLL_INTERVAL;
        if next > deadline {
            return Err(AcmedError::Timeout("authorization"));
        }
        sleep_until(next).await;
    }
}
