//! Declarative configuration for acmed
//!
//! Configuration is read from a JSON file (`config.json` by default):
//!
//! ```json
//! {
//!   "server": {
//!     "address": "0.0.0.0:4402",
//!     "webs": [
//!       {
//!         "domain": "example.com",
//!         "email": "ops@example.com",
//!         "disco": "https://acme-staging-v02.api.letsencrypt.org/directory",
//!         "remaining": 21,
//!         "bundle": true
//!       }
//!     ]
//!   }
//! }
//! ```
//!
//! The raw serde form mirrors the file (all fields optional); [`RawConfig::resolve`]
//! produces a fully populated [`AcmedConfig`] in one step, so no default-filling
//! or null checks leak into the flows.

use std::fs;
use std::net::SocketAddr;
use std::path::Path;

use serde::Deserialize;

use crate::error::AcmedError;

/// Default listen address for the http-01 challenge responder
pub const DEFAULT_ADDRESS: &str = "0.0.0.0:4402";

/// Default CA directory URL (Let's Encrypt staging)
pub const DEFAULT_DISCO: &str = "https://acme-staging-v02.api.letsencrypt.org/directory";

/// Default registration contact
pub const DEFAULT_EMAIL: &str = "email@example.com";

/// Default renewal threshold: reissue when fewer than this many days remain
pub const DEFAULT_REMAINING: i64 = 21;

/// Default chain bundling preference
pub const DEFAULT_BUNDLE: bool = true;

/// On-disk form of the configuration file
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub server: RawServer,
}

#[derive(Debug, Deserialize)]
pub struct RawServer {
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub webs: Vec<RawWeb>,
}

#[derive(Debug, Deserialize)]
pub struct RawWeb {
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub disco: Option<String>,
    #[serde(default)]
    pub remaining: Option<i64>,
    #[serde(default)]
    pub bundle: Option<bool>,
}

/// Fully resolved configuration, immutable for the duration of one run
#[derive(Debug, Clone)]
pub struct AcmedConfig {
    /// Listen address the CA connects back to for http-01 validation
    pub address: SocketAddr,
    /// One entry per managed domain
    pub webs: Vec<WebConfig>,
}

/// Resolved per-domain configuration
#[derive(Debug, Clone)]
pub struct WebConfig {
    /// Domain name, the unique key for on-disk state
    pub domain: String,
    /// Registration contact (bare address, `mailto:` is added at use)
    pub email: String,
    /// CA directory URL
    pub disco: String,
    /// Renewal threshold in days remaining before expiry
    pub remaining: i64,
    /// Whether the intermediate chain is bundled into the stored file
    pub bundle: bool,
}

impl RawConfig {
    /// Resolve defaults into a complete configuration.
    ///
    /// A web entry without a `domain` is a configuration error; every other
    /// field falls back to its documented default. `address_override` comes
    /// from the `-p` command-line flag and wins over the file.
    pub fn resolve(self, address_override: Option<&str>) -> Result<AcmedConfig, AcmedError> {
        let address = address_override
            .map(str::to_owned)
            .or(self.server.address.filter(|a| !a.is_empty()))
            .unwrap_or_else(|| DEFAULT_ADDRESS.to_string());
        let address: SocketAddr = address
            .parse()
            .map_err(|e| AcmedError::Config(format!("invalid listen address {address:?}: {e}")))?;

        let mut webs = Vec::with_capacity(self.server.webs.len());
        for raw in self.server.webs {
            let domain = raw
                .domain
                .filter(|d| !d.is_empty())
                .ok_or_else(|| AcmedError::Config("domain of web is required".into()))?;
            webs.push(WebConfig {
                domain,
                email: raw
                    .email
                    .filter(|e| !e.is_empty())
                    .unwrap_or_else(|| DEFAULT_EMAIL.to_string()),
                disco: raw
                    .disco
                    .filter(|d| !d.is_empty())
                    .unwrap_or_else(|| DEFAULT_DISCO.to_string()),
                remaining: raw.remaining.unwrap_or(DEFAULT_REMAINING),
                bundle: raw.bundle.unwrap_or(DEFAULT_BUNDLE),
            });
        }

        Ok(AcmedConfig { address, webs })
    }
}

/// Load and resolve configuration from a file.
pub fn load(path: &Path, address_override: Option<&str>) -> Result<AcmedConfig, AcmedError> {
    let bytes = fs::read(path).map_err(|e| {
        AcmedError::Config(format!("cannot read {}: {e}", path.display()))
    })?;
    let raw: RawConfig = serde_json::from_slice(&bytes)
        .map_err(|e| AcmedError::Config(format!("cannot parse {}: {e}", path.display())))?;
    raw.resolve(address_override)
}
