//! HMAC-SHA3-256 for metadata and file-object authentication.

use hmac::{Hmac, Mac};
use sha3::Sha3_256;
use subtle::ConstantTimeEq;

use crate::errors::{Result, RvaultError};

type HmacSha3 = Hmac<Sha3_256>;

/// Length of an HMAC-SHA3-256 tag in bytes.
pub const HMAC_SHA3_256_LEN: usize = 32;

/// Compute an HMAC-SHA3-256 tag over `data`.
pub fn hmac_sha3_256(key: &[u8], data: &[u8]) -> Result<[u8; HMAC_SHA3_256_LEN]> {
    let mut mac = HmacSha3::new_from_slice(key)
        .map_err(|e| RvaultError::Crypto(format!("invalid HMAC key: {e}")))?;
    mac.update(data);

    let mut tag = [0u8; HMAC_SHA3_256_LEN];
    tag.copy_from_slice(&mac.finalize().into_bytes());
    Ok(tag)
}

/// Constant-time comparison of a stored tag against a computed one.
pub fn tags_match(stored: &[u8], computed: &[u8]) -> bool {
    stored.len() == computed.len() && bool::from(stored.ct_eq(computed))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_is_deterministic() {
        let t1 = hmac_sha3_256(b"key material", b"payload").unwrap();
        let t2 = hmac_sha3_256(b"key material", b"payload").unwrap();
        assert_eq!(t1, t2);
        assert_eq!(t1.len(), HMAC_SHA3_256_LEN);
    }

    #[test]
    fn tag_depends_on_key_and_data() {
        let base = hmac_sha3_256(b"key", b"data").unwrap();
        assert_ne!(base, hmac_sha3_256(b"yek", b"data").unwrap());
        assert_ne!(base, hmac_sha3_256(b"key", b"atad").unwrap());
    }

    #[test]
    fn tags_match_rejects_length_mismatch() {
        let tag = hmac_sha3_256(b"key", b"data").unwrap();
        assert!(tags_match(&tag, &tag));
        assert!(!tags_match(&tag[..31], &tag));
    }
}
