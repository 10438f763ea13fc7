//! HMAC-SHA512 request/response signing

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha512;
use thiserror::Error;

use super::fields::SignedFields;

type HmacSha512 = Hmac<Sha512>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("Signing key is not configured")]
    MissingKey,

    #[error("Signing key rejected: {0}")]
    InvalidKey(String),
}

/// Signs ordered field lists with the merchant API key
///
/// The key is held only inside the prepared MAC state and never printed.
#[derive(Clone)]
pub struct SignatureEngine {
    mac: HmacSha512,
}

impl SignatureEngine {
    pub fn new(api_key: &str) -> Result<Self, SigningError> {
        if api_key.trim().is_empty() {
            return Err(SigningError::MissingKey);
        }
        let mac = HmacSha512::new_from_slice(api_key.as_bytes())
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        Ok(Self { mac })
    }

    /// base64(HMAC-SHA512(key, values joined with no separator))
    ///
    /// Empty values still occupy their slot; the caller owns the order.
    pub fn sign(&self, values: &[&str]) -> String {
        STANDARD.encode(self.digest(values))
    }

    /// Constant-time check of a supplied base64 signature
    pub fn verify(&self, values: &[&str], signature: &str) -> bool {
        let Ok(supplied) = STANDARD.decode(signature.trim()) else {
            return false;
        };
        let mut mac = self.mac.clone();
        for value in values {
            mac.update(value.as_bytes());
        }
        mac.verify_slice(&supplied).is_ok()
    }

    pub fn sign_fields<F: SignedFields>(&self, fields: &F) -> String {
        self.sign(&fields.values())
    }

    pub fn verify_fields<F: SignedFields>(&self, fields: &F, signature: &str) -> bool {
        self.verify(&fields.values(), signature)
    }

    fn digest(&self, values: &[&str]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        for value in values {
            mac.update(value.as_bytes());
        }
        mac.finalize().into_bytes().to_vec()
    }
}

impl fmt::Debug for SignatureEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignatureEngine")
            .field("key", &"<redacted>")
            .finish()
    }
}
