//! Token issuance and prefix decoding
//!
//! Token format: `base64(owner_id) "." urlsafe(secret)`
//!
//! The prefix is the standard base64 encoding of the owner's decimal id. It
//! can be reversed without touching storage, which lets a websocket handshake
//! cross-check the connection's owner, but it authenticates nothing: only a
//! store lookup of the whole token does.

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use rand::Rng;
use std::fmt;
use thiserror::Error;

/// Bytes of CSPRNG output in every token secret
pub const SECRET_BYTES: usize = 128;

/// Separator between the owner prefix and the secret
pub const TOKEN_SEPARATOR: char = '.';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("invalid token format")]
    InvalidFormat,

    #[error("token prefix decode error: {0}")]
    DecodeError(String),

    #[error("token prefix is not an owner id")]
    InvalidOwnerId,
}

/// Issue a fresh token for `owner_id`
pub fn generate_token(owner_id: i64) -> String {
    let prefix = STANDARD.encode(owner_id.to_string());

    let mut secret = [0u8; SECRET_BYTES];
    rand::rng().fill(&mut secret[..]);

    format!("{}{}{}", prefix, TOKEN_SEPARATOR, URL_SAFE_NO_PAD.encode(secret))
}

/// Decode the owner id a token claims to belong to.
///
/// The result is unverified.
pub fn decode_owner_id(token: &str) -> Result<i64, TokenError> {
    let (prefix, secret) = token
        .trim()
        .split_once(TOKEN_SEPARATOR)
        .ok_or(TokenError::InvalidFormat)?;

    if prefix.is_empty() || secret.is_empty() {
        return Err(TokenError::InvalidFormat);
    }

    let raw = STANDARD
        .decode(prefix)
        .map_err(|e| TokenError::DecodeError(e.to_string()))?;

    std::str::from_utf8(&raw)
        .ok()
        .and_then(|digits| digits.parse::<i64>().ok())
        .ok_or(TokenError::InvalidOwnerId)
}

/// Convenience wrapper over [`decode_owner_id`] for routing code
pub fn claimed_owner_id(token: &str) -> Option<i64> {
    decode_owner_id(token).ok()
}

/// Wrapper that keeps token secrets out of logs
pub struct Redacted<'a>(pub &'a str);

impl fmt::Display for Redacted<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.split_once(TOKEN_SEPARATOR) {
            Some((prefix, _)) => write!(f, "{}.[REDACTED]", prefix),
            None => write!(f, "[REDACTED]"),
        }
    }
}
