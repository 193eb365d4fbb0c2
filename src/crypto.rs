//! IPMI v1.5 session authentication codes.

use core::fmt;

use md5::{Digest, Md5};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::protocol::{AUTH_CODE_LEN, IpmiMessage};
use crate::types::AuthType;

/// A minimal secret container that zeroizes its contents on drop.
///
/// This is intentionally small and avoids exposing secrets via `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    /// Wrap raw secret bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub(crate) fn expose(&self) -> &[u8] {
        &self.0
    }

    /// Length of the secret in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the secret is empty (a null password).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The secret as the fixed 16-byte field IPMI v1.5 uses in authentication codes.
    pub(crate) fn to_key16(&self) -> [u8; AUTH_CODE_LEN] {
        normalize_key16(self.expose())
    }
}

impl From<&str> for SecretBytes {
    fn from(value: &str) -> Self {
        Self::new(value.as_bytes().to_vec())
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<secret>")
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Truncate or zero-pad a password to the 16-byte key field.
pub(crate) fn normalize_key16(secret: &[u8]) -> [u8; AUTH_CODE_LEN] {
    let mut out = [0u8; AUTH_CODE_LEN];
    let n = secret.len().min(out.len());
    out[..n].copy_from_slice(&secret[..n]);
    out
}

pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Compute the IPMI v1.5 session authentication code for one message.
///
/// The same function stamps outbound messages and verifies inbound ones. For MD5 the digest
/// covers `key16 | session id | message | session sequence | key16`, with the two 32-bit
/// fields least-significant byte first as they appear in the session header.
pub fn compute_auth_code(
    auth_type: AuthType,
    secret: &SecretBytes,
    session_id: u32,
    message: &IpmiMessage,
    sequence: u32,
) -> Result<[u8; AUTH_CODE_LEN]> {
    match auth_type {
        AuthType::None => Ok([0u8; AUTH_CODE_LEN]),
        AuthType::Password => Ok(secret.to_key16()),
        AuthType::Md5 => {
            let mut key = secret.to_key16();
            let mut hasher = Md5::new();
            hasher.update(key);
            hasher.update(session_id.to_le_bytes());
            hasher.update(message.encode());
            hasher.update(sequence.to_le_bytes());
            hasher.update(key);
            key.zeroize();

            let mut out = [0u8; AUTH_CODE_LEN];
            out.copy_from_slice(&hasher.finalize());
            Ok(out)
        }
        AuthType::Md2 => Err(Error::Unsupported("MD2 authentication")),
        AuthType::Oem => Err(Error::Unsupported("OEM authentication")),
    }
}

/// Recompute the code for an inbound message and compare it in constant time.
pub fn verify_auth_code(
    auth_type: AuthType,
    secret: &SecretBytes,
    session_id: u32,
    message: &IpmiMessage,
    sequence: u32,
    received: &[u8; AUTH_CODE_LEN],
) -> Result<()> {
    let expected = compute_auth_code(auth_type, secret, session_id, message, sequence)?;
    if ct_eq(&expected, received) {
        Ok(())
    } else {
        Err(Error::AuthenticationFailed("session authentication code mismatch"))
    }
}
