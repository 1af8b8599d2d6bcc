//! HTTP-01 challenge responder
//!
//! A transient HTTP server scoped to the lifetime of one authorization
//! flow. It carries no state beyond a single (path, value) pair: the
//! CA-specified well-known path is answered with the key-authorization
//! value, every other path gets a 404. Correctness relies on the token
//! being CA-issued and unguessable, and on the listener being torn down
//! as soon as the authorization resolves.

use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::error::AcmedError;

/// Well-known path prefix the CA requests during http-01 validation
pub const ACME_CHALLENGE_PREFIX: &str = "/.well-known/acme-challenge/";

/// A running challenge responder.
///
/// The listener is bound before [`ChallengeResponder::serve`] returns, so
/// the caller can treat a successful return as the readiness signal before
/// telling the CA to validate. Dropping the responder aborts the accept
/// loop; [`ChallengeResponder::close`] additionally awaits it so the port
/// is provably released.
#[derive(Debug)]
pub struct ChallengeResponder {
    local_addr: SocketAddr,
    task: Option<JoinHandle<()>>,
}

impl ChallengeResponder {
    /// Bind `addr` and serve `key_authorization` at the well-known path for
    /// `token`.
    pub async fn serve(
        addr: SocketAddr,
        token: &str,
        key_authorization: &str,
    ) -> Result<Self, AcmedError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| AcmedError::ChallengeBind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let path = format!("{ACME_CHALLENGE_PREFIX}{token}");
        let value = key_authorization.to_string();
        let task = tokio::spawn(accept_loop(listener, path, value));

        debug!(addr = %local_addr, token = %token, "challenge responder listening");
        Ok(Self {
            local_addr,
            task: Some(task),
        })
    }

    /// The address the responder is actually bound to (relevant when the
    /// configured port is 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Tear the responder down and wait until the listener is released.
    pub async fn close(mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            // JoinError from the abort is the expected outcome here.
            let _ = task.await;
        }
    }
}

impl Drop for ChallengeResponder {
    fn drop(&mut self) {
        if let Some(task) = &self.task {
            task.abort();
        }
    }
}

async fn accept_loop(listener: TcpListener, path: String, value: String) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                debug!(error = %e, "challenge responder accept failed");
                continue;
            }
        };
        trace!(peer = %peer, "challenge validation connection");

        let path = path.clone();
        let value = value.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let path = path.clone();
                let value = value.clone();
                async move { respond(&req, &path, &value) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(error = %e, "challenge responder connection error");
            }
        });
    }
}

fn respond(
    req: &Request<hyper::body::Incoming>,
    path: &str,
    value: &str,
) -> Result<Response<Full<Bytes>>, std::convert::Infallible> {
    if req.uri().path() == path {
        Ok(Response::new(Full::new(Bytes::from(value.to_string()))))
    } else {
        debug!(path = %req.uri().path(), "unknown request path");
        let mut response = Response::new(Full::new(Bytes::new()));
        *response.status_mut() = StatusCode::NOT_FOUND;
        Ok(response)
    }
}
