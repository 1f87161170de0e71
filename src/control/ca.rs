//! CA material republication.
//!
//! The interception engine forges certificates and keeps three artifacts
//! on disk in its certstore directory: the public certificate (`ca.pem`),
//! the private key (`ca_pri.pem`), and the public key (`ca_pub.pem`).
//! This module reads and republishes them, read-only, in two encodings:
//! the armored textual form verbatim, or the raw binary form decoded from
//! the armor's base64 payload section.
//!
//! Every request reads the file fresh; nothing is cached.

// ============================================================================
// Imports
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as Base64Standard;

use crate::error::{Error, Result};

// ============================================================================
// CaArtifact
// ============================================================================

/// One of the three CA artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaArtifact {
    /// Public certificate.
    Certificate,
    /// Private key.
    PrivateKey,
    /// Public key.
    PublicKey,
}

impl CaArtifact {
    /// File name of the artifact's textual form in the certstore.
    #[inline]
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Certificate => "ca.pem",
            Self::PrivateKey => "ca_pri.pem",
            Self::PublicKey => "ca_pub.pem",
        }
    }
}

// ============================================================================
// CaEncoding
// ============================================================================

/// Requested encoding of a CA artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaEncoding {
    /// Armored textual form, returned verbatim.
    Pem,
    /// Raw binary form decoded from the armor payload.
    Der,
}

// ============================================================================
// CertStore
// ============================================================================

/// Read-only view of the interception engine's certstore directory.
#[derive(Debug, Clone)]
pub struct CertStore {
    /// Certstore directory.
    dir: PathBuf,
}

impl CertStore {
    /// Creates a cert store over the given directory.
    #[must_use]
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Reads an artifact in the requested encoding.
    ///
    /// # Errors
    ///
    /// [`Error::Certificate`] if the file cannot be read or, for
    /// [`CaEncoding::Der`], the armor payload cannot be decoded.
    pub fn read(&self, artifact: CaArtifact, encoding: CaEncoding) -> Result<Vec<u8>> {
        let path = self.dir.join(artifact.file_name());

        let text = fs::read_to_string(&path)
            .map_err(|err| Error::certificate(format!("{}: {err}", path.display())))?;

        match encoding {
            CaEncoding::Pem => Ok(text.into_bytes()),
            CaEncoding::Der => decode_armor_payload(&text),
        }
    }
}

// ============================================================================
// Armor Decoding
// ============================================================================

/// Decodes the base64 payload between the armor lines of a PEM block.
fn decode_armor_payload(text: &str) -> Result<Vec<u8>> {
    // "-----BEGIN X-----\n<payload>\n-----END X-----": the payload is the
    // second segment between dash runs.
    let payload = text
        .split("-----")
        .nth(2)
        .ok_or_else(|| Error::certificate("missing PEM armor"))?;

    let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();

    Base64Standard
        .decode(compact)
        .map_err(|err| Error::certificate(format!("invalid armor payload: {err}")))
}

// ============================================================================
// Tests
// ============================================================================
