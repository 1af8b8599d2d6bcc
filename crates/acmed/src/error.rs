//! Error types for certificate management
//!
//! One taxonomy for the whole tool. Configuration errors abort the run
//! before any network activity; everything else is fatal only to the
//! domain whose flow raised it (the lifecycle loop reports it and moves
//! on to the next domain).

use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while obtaining or renewing certificates
#[derive(Debug, Error)]
pub enum AcmedError {
    /// Invalid or incomplete configuration. Fatal to the whole run.
    #[error("configuration error: {0}")]
    Config(String),

    /// A key file exists but carries a PEM block type we do not read
    #[error("unsupported key type {tag:?} in {}", .path.display())]
    UnsupportedKeyType { tag: String, path: PathBuf },

    /// A certificate file exists but its PEM block is not a certificate
    #[error("unsupported PEM block {tag:?} in {}", .path.display())]
    UnsupportedBlockType { tag: String, path: PathBuf },

    /// Key material could not be parsed or generated
    #[error("key error: {0}")]
    Key(#[from] rcgen::Error),

    /// A legacy SEC1/PKCS#1 key file could not be converted to PKCS#8
    #[error("cannot read legacy key {}: {reason}", .path.display())]
    LegacyKey { path: PathBuf, reason: String },

    /// A stored certificate could not be decoded
    #[error("certificate parse error in {}: {reason}", .path.display())]
    CertificateParse { path: PathBuf, reason: String },

    /// ACME protocol failure (registration, order, finalize, ...)
    #[error("acme protocol error: {0}")]
    Protocol(#[from] instant_acme::Error),

    /// The CA offered no http-01 challenge for the domain
    #[error("no supported challenge offered for {0}")]
    NoSupportedChallenge(String),

    /// The challenge responder could not bind its listen address
    #[error("failed to bind challenge responder on {addr}: {source}")]
    ChallengeBind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The CA resolved the authorization to invalid
    #[error("authorization for {0} failed")]
    AuthorizationFailed(String),

    /// The order became invalid before a certificate was issued
    #[error("order for {0} became invalid")]
    OrderInvalid(String),

    /// A flow exceeded its deadline
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Malformed PEM input
    #[error("pem error: {0}")]
    Pem(#[from] pem::PemError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
