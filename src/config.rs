//! Relay configuration.
//!
//! [`ProxyConfig`] carries the process-wide settings the relay core needs:
//! where the listener binds, where the interception engine keeps its CA
//! material, and whether outbound destination connections verify TLS
//! certificates. There are no ambient globals; the config is passed
//! explicitly into the engine and Control API constructors.

// ============================================================================
// Imports
// ============================================================================

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};

// ============================================================================
// Constants
// ============================================================================

/// Default bind address (localhost).
const DEFAULT_HOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Default listen port.
const DEFAULT_PORT: u16 = 8080;

// ============================================================================
// ProxyConfig
// ============================================================================

/// Settings for the relay engine, listener, and Control API.
///
/// # Example
///
/// ```ignore
/// let config = ProxyConfig::new()
///     .with_port(9000)
///     .with_certstore_dir("/tmp/wsrelay/certstore")
///     .with_reject_unauthorized(false);
/// ```
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Address the listener binds to.
    pub host: IpAddr,

    /// Port the listener binds to (0 for an OS-assigned port).
    pub port: u16,

    /// Directory where the interception engine stores CA material
    /// (`ca.pem`, `ca_pri.pem`, `ca_pub.pem`).
    pub certstore_dir: PathBuf,

    /// Whether outbound destination connections verify TLS certificates.
    ///
    /// Interception setups routinely target hosts with certificates the
    /// local trust store does not know; disabling verification mirrors the
    /// upstream connection the intercepted client asked for.
    pub reject_unauthorized: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST,
            port: DEFAULT_PORT,
            certstore_dir: std::env::temp_dir().join("wsrelay").join("certstore"),
            reject_unauthorized: true,
        }
    }
}

impl ProxyConfig {
    /// Creates a config with default settings.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the bind address.
    #[inline]
    #[must_use]
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    /// Sets the listen port.
    #[inline]
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the CA certstore directory.
    #[inline]
    #[must_use]
    pub fn with_certstore_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.certstore_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Sets whether destination TLS certificates are verified.
    #[inline]
    #[must_use]
    pub fn with_reject_unauthorized(mut self, reject: bool) -> Self {
        self.reject_unauthorized = reject;
        self
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.host, DEFAULT_HOST);
        assert_eq!(config.port, DEFAULT_PORT);
        assert!(config.reject_unauthorized);
    }

    #[test]
    fn test_builder_chain() {
        let config = ProxyConfig::new()
            .with_port(0)
            .with_certstore_dir("/tmp/certs")
            .with_reject_unauthorized(false);

        assert_eq!(config.port, 0);
        assert_eq!(config.certstore_dir, PathBuf::from("/tmp/certs"));
        assert!(!config.reject_unauthorized);
    }
}
