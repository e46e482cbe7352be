//! HMAC-SHA256 signing for authenticated requests

use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Sign `payload` with `key`, returning the base64-encoded digest.
pub fn sign(key: &[u8], payload: &[u8]) -> Result<String> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| Error::Signing(e.to_string()))?;
    mac.update(payload);
    Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
}

/// Check a base64-encoded digest against `payload`.
///
/// Comparison is constant-time. A digest that is not valid base64 never verifies.
#[cfg(test)]
pub fn verify(key: &[u8], payload: &[u8], digest: &str) -> bool {
    let expected = match BASE64_STANDARD.decode(digest) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(payload);

    mac.verify_slice(&expected).is_ok()
}
