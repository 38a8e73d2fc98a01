//! Bearer token verification against a pinned root key

use crate::{Error, Result};
use biscuit_auth::{Biscuit, KeyPair, PrivateKey, PublicKey};
use log::debug;

/// Prefix the `Authorization` header value must start with
pub const BEARER_PREFIX: &str = "Bearer ";

/// A Biscuit whose signature chain has been verified against the root key.
///
/// Built once per request and dropped with it.
pub struct CapabilityToken {
    biscuit: Biscuit,
    wire_len: usize,
}

impl CapabilityToken {
    pub fn biscuit(&self) -> &Biscuit {
        &self.biscuit
    }

    /// Length of the base64 form the token arrived in
    pub fn wire_len(&self) -> usize {
        self.wire_len
    }

    /// Number of blocks, authority block included
    pub fn block_count(&self) -> usize {
        self.biscuit.block_count()
    }
}

impl std::fmt::Debug for CapabilityToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityToken")
            .field("blocks", &self.block_count())
            .field("wire_len", &self.wire_len)
            .finish()
    }
}

/// Verifies presented tokens against a single pinned public key.
#[derive(Clone)]
pub struct TokenAuthenticator {
    root: PublicKey,
}

impl TokenAuthenticator {
    pub fn new(root: PublicKey) -> Self {
        Self { root }
    }

    /// Verify the raw `Authorization` header value.
    ///
    /// An absent header is `MissingCredentials`; a wrong prefix, bad base64,
    /// or a failed signature check is `InvalidToken`.
    pub fn authenticate(&self, header: Option<&str>) -> Result<CapabilityToken> {
        let header = header.ok_or(Error::MissingCredentials)?;
        let encoded = header
            .strip_prefix(BEARER_PREFIX)
            .map(str::trim)
            .ok_or_else(|| Error::InvalidToken("expected bearer scheme".into()))?;
        if encoded.is_empty() {
            return Err(Error::InvalidToken("empty bearer token".into()));
        }

        let biscuit = Biscuit::from_base64(encoded, self.root).map_err(|e| {
            debug!("Token rejected: {:?}", e);
            Error::InvalidToken(e.to_string())
        })?;

        Ok(CapabilityToken {
            biscuit,
            wire_len: encoded.len(),
        })
    }
}

/// Parse a hex-encoded ed25519 public key.
pub fn public_key_from_hex(hex_key: &str) -> Result<PublicKey> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| Error::ConfigError(format!("public key is not hex: {}", e)))?;
    PublicKey::from_bytes(&bytes)
        .map_err(|e| Error::ConfigError(format!("invalid public key: {}", e)))
}

/// Derive the verification key from a hex-encoded ed25519 private key.
pub fn public_key_from_private_hex(hex_key: &str) -> Result<PublicKey> {
    let bytes = hex::decode(hex_key.trim())
        .map_err(|e| Error::ConfigError(format!("private key is not hex: {}", e)))?;
    let private = PrivateKey::from_bytes(&bytes)
        .map_err(|e| Error::ConfigError(format!("invalid private key: {}", e)))?;
    Ok(KeyPair::from(&private).public())
}
