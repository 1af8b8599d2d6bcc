//! acmed - unattended ACME certificate issuance and renewal
//!
//! Watches a set of configured domains and keeps a valid TLS certificate
//! on disk for each one, speaking the ACME protocol with http-01
//! challenges:
//!
//! - **Config**: JSON config with per-domain defaults
//! - **Storage**: account, key, and certificate files under `webs/<domain>/`
//! - **Client**: ACME directory, account, and order operations
//! - **Challenge**: ephemeral HTTP responder for http-01 validation
//! - **Lifecycle**: renewal decisions and the end-to-end issuance flow
//!
//! # Example
//!
//! ```ignore
//! use acmed::{load, DirectoryClient, Lifecycle, Storage};
//! use std::sync::Arc;
//!
//! let config = load("config.json".as_ref(), None)?;
//! let lifecycle = Lifecycle::new(
//!     Arc::new(DirectoryClient::new()),
//!     Storage::new("."),
//!     config.address,
//! );
//! let results = lifecycle.run(&config).await;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod account;
pub mod authz;
pub mod challenge;
pub mod client;
pub mod config;
pub mod error;
pub mod issue;
pub mod keys;
pub mod lifecycle;
pub mod storage;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Error handling
pub use error::AcmedError;

// Configuration
pub use config::{load, AcmedConfig, WebConfig};

// On-disk state
pub use storage::{LoadedCertificate, Storage, StoredAccount};

// ACME client
pub use client::{AcmeClient, AcmeOrder, DirectoryClient};

// Challenge responder
pub use challenge::ChallengeResponder;

// Lifecycle
pub use lifecycle::{renewal_due, Lifecycle, Outcome};
