//! Command crypto
//!
//! Commands for mesh nodes are sealed with ChaCha20-Poly1305 under a key
//! derived from the shared mesh secret. The firmware frames payloads on
//! `0x00` and `\r`, so neither byte may appear in the nonce or in the
//! sealed body.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

/// Bytes the receiving firmware cannot carry inside a payload
pub const FORBIDDEN_BYTES: [u8; 2] = [0x00, 0x0d];

/// Upper bound on nonce draws before sealing gives up
pub const MAX_SEAL_ATTEMPTS: usize = 10_000;

/// Key derivation label for device commands
pub const COMMAND_KEY_PURPOSE: &str = "chacha-symmetric-key";

/// Marks a sealed command on the wire
pub const SEALED_PREFIX: u8 = b'e';

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("Invalid key encoding: {0}")]
    InvalidKeyEncoding(String),

    #[error("No conforming nonce after {0} attempts")]
    NonceExhausted(usize),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Decryption failed")]
    Decrypt,

    #[error("Malformed sealed command: {0}")]
    Malformed(&'static str),
}

/// 256-bit symmetric key for device commands
#[derive(Clone, PartialEq, Eq)]
pub struct CommandKey([u8; KEY_LEN]);

impl CommandKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Derive the command key from the raw mesh secret
    pub fn derive(mesh_key: &str) -> Result<Self, CryptoError> {
        derive_key(COMMAND_KEY_PURPOSE, mesh_key.as_bytes()).map(Self)
    }

    /// Parse a 64 character hex key
    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|e| CryptoError::InvalidKeyEncoding(e.to_string()))?;
        let len = bytes.len();
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKeyLength(len))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

// Keep key material out of logs
impl fmt::Debug for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CommandKey(..)")
    }
}

/// HMAC-SHA256 of `purpose`, keyed with `root`
pub fn derive_key(purpose: &str, root: &[u8]) -> Result<[u8; KEY_LEN], CryptoError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(root)
        .map_err(|_| CryptoError::InvalidKeyLength(root.len()))?;
    mac.update(purpose.as_bytes());

    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&mac.finalize().into_bytes());
    Ok(key)
}

/// A command sealed for a mesh node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedCommand {
    pub nonce: [u8; NONCE_LEN],
    pub tag: [u8; TAG_LEN],
    pub ciphertext: Vec<u8>,
}

impl SealedCommand {
    /// `'e' || nonce || tag || ciphertext`
    pub fn to_wire(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + NONCE_LEN + TAG_LEN + self.ciphertext.len());
        out.push(SEALED_PREFIX);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.tag);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    pub fn from_wire(raw: &[u8]) -> Result<Self, CryptoError> {
        let (prefix, rest) = raw
            .split_first()
            .ok_or(CryptoError::Malformed("empty command"))?;
        if *prefix != SEALED_PREFIX {
            return Err(CryptoError::Malformed("missing sealed prefix"));
        }
        if rest.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed("truncated header"));
        }

        let (nonce, rest) = rest.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        let mut sealed = Self {
            nonce: [0; NONCE_LEN],
            tag: [0; TAG_LEN],
            ciphertext: ciphertext.to_vec(),
        };
        sealed.nonce.copy_from_slice(nonce);
        sealed.tag.copy_from_slice(tag);
        Ok(sealed)
    }
}

fn has_forbidden(bytes: &[u8]) -> bool {
    bytes.iter().any(|b| FORBIDDEN_BYTES.contains(b))
}

/// Encrypt `plaintext`, drawing fresh nonces until neither the nonce nor
/// the sealed body contains a forbidden byte.
pub fn seal(key: &CommandKey, plaintext: &[u8]) -> Result<SealedCommand, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));
    let mut nonce = [0u8; NONCE_LEN];

    for _ in 0..MAX_SEAL_ATTEMPTS {
        OsRng.fill_bytes(&mut nonce);
        if has_forbidden(&nonce) {
            continue;
        }

        // ciphertext || tag
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CryptoError::Encrypt)?;
        if has_forbidden(&sealed) {
            continue;
        }

        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);
        let mut out = SealedCommand {
            nonce,
            tag: [0; TAG_LEN],
            ciphertext: ciphertext.to_vec(),
        };
        out.tag.copy_from_slice(tag);
        return Ok(out);
    }

    Err(CryptoError::NonceExhausted(MAX_SEAL_ATTEMPTS))
}

/// Authenticate and decrypt a sealed command
pub fn open(key: &CommandKey, sealed: &SealedCommand) -> Result<Vec<u8>, CryptoError> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut body = Vec::with_capacity(sealed.ciphertext.len() + TAG_LEN);
    body.extend_from_slice(&sealed.ciphertext);
    body.extend_from_slice(&sealed.tag);

    cipher
        .decrypt(Nonce::from_slice(&sealed.nonce), body.as_slice())
        .map_err(|_| CryptoError::Decrypt)
}
