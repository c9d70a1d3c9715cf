//! Passphrase-based key derivation using scrypt.
//!
//! The cost parameters and salt live in a small self-describing blob
//! that is stored verbatim in the vault metadata, so a vault always
//! re-derives its passphrase key with the exact settings it was created
//! with.  The blob is opaque to everything outside this module.
//!
//! Blob layout (all single bytes, then the salt):
//!
//! ```text
//! [ alg | log_n | r | p | salt_len | salt ... ]
//! ```

use rand::RngCore;
use scrypt::Params;

use crate::crypto::secbuf::SecureBuffer;
use crate::errors::{Result, RvaultError};

/// Algorithm identifier for scrypt, the only KDF in the set.
const KDF_ALG_SCRYPT: u8 = 1;

/// Length of the salt in bytes.
const SALT_LEN: usize = 16;

/// Fixed prefix: alg + log_n + r + p + salt_len.
const BLOB_PREFIX_LEN: usize = 5;

/// Minimum CPU/memory cost (2^10 with r = 8 is 1 MiB).  Anything lower
/// is dangerously weak against offline guessing.
const MIN_LOG_N: u8 = 10;

/// Configurable scrypt cost parameters.
///
/// These map 1:1 to the fields in `Settings` so callers can pass
/// whatever the user configured in `.rvault.toml`.
#[derive(Debug, Clone, Copy)]
pub struct KdfCost {
    /// log2 of the scrypt work factor N (default: 15, i.e. N = 32768).
    pub log_n: u8,
    /// Block size parameter (default: 8).
    pub r: u8,
    /// Parallelization parameter (default: 1).
    pub p: u8,
}

impl Default for KdfCost {
    fn default() -> Self {
        Self {
            log_n: 15,
            r: 8,
            p: 1,
        }
    }
}

/// Generate a fresh KDF parameter blob with a random salt.
///
/// The result is at most 255 bytes, as required by the one-byte length
/// field in the vault metadata header.
pub fn create_params(cost: &KdfCost) -> Result<Vec<u8>> {
    if cost.log_n < MIN_LOG_N {
        return Err(RvaultError::BadArgument(format!(
            "scrypt log_n must be at least {MIN_LOG_N} (got {})",
            cost.log_n
        )));
    }
    if cost.r == 0 || cost.p == 0 {
        return Err(RvaultError::BadArgument(
            "scrypt r and p must be at least 1".into(),
        ));
    }
    // Reject settings scrypt itself would refuse at derive time.
    Params::new(cost.log_n, u32::from(cost.r), u32::from(cost.p), 32)
        .map_err(|e| RvaultError::BadArgument(format!("invalid scrypt parameters: {e}")))?;

    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);

    let mut blob = Vec::with_capacity(BLOB_PREFIX_LEN + SALT_LEN);
    blob.push(KDF_ALG_SCRYPT);
    blob.push(cost.log_n);
    blob.push(cost.r);
    blob.push(cost.p);
    blob.push(SALT_LEN as u8);
    blob.extend_from_slice(&salt);

    debug_assert!(blob.len() <= u8::MAX as usize);
    Ok(blob)
}

/// Derive `key_len` bytes from a passphrase using the stored blob.
///
/// The same passphrase + blob always produce the same key.
pub fn derive_key(passphrase: &[u8], blob: &[u8], key_len: usize) -> Result<SecureBuffer> {
    let (params, salt) = parse_params(blob)?;

    let mut key = SecureBuffer::zeroed(key_len);
    scrypt::scrypt(passphrase, salt, &params, &mut key)
        .map_err(|e| RvaultError::Crypto(format!("scrypt derivation failed: {e}")))?;
    Ok(key)
}

/// Validate the blob and unpack it into scrypt parameters and the salt.
fn parse_params(blob: &[u8]) -> Result<(Params, &[u8])> {
    if blob.len() < BLOB_PREFIX_LEN {
        return Err(RvaultError::CorruptVault("KDF parameters truncated".into()));
    }
    if blob[0] != KDF_ALG_SCRYPT {
        return Err(RvaultError::CorruptVault(format!(
            "unknown KDF algorithm id {}",
            blob[0]
        )));
    }
    let log_n = blob[1];
    let r = u32::from(blob[2]);
    let p = u32::from(blob[3]);
    let salt_len = blob[4] as usize;

    if blob.len() != BLOB_PREFIX_LEN + salt_len {
        return Err(RvaultError::CorruptVault(
            "KDF parameter length mismatch".into(),
        ));
    }
    let salt = &blob[BLOB_PREFIX_LEN..];

    let params = Params::new(log_n, r, p, 32)
        .map_err(|e| RvaultError::CorruptVault(format!("invalid scrypt parameters: {e}")))?;
    Ok((params, salt))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Cheap cost for tests; still above the enforced floor.
    fn fast_cost() -> KdfCost {
        KdfCost {
            log_n: 10,
            r: 8,
            p: 1,
        }
    }

    #[test]
    fn params_blob_roundtrip() {
        let blob = create_params(&fast_cost()).unwrap();
        assert_eq!(blob.len(), BLOB_PREFIX_LEN + SALT_LEN);
        assert_eq!(blob[0], KDF_ALG_SCRYPT);

        let (_, salt) = parse_params(&blob).unwrap();
        assert_eq!(salt.len(), SALT_LEN);
    }

    #[test]
    fn same_passphrase_same_key() {
        let blob = create_params(&fast_cost()).unwrap();
        let k1 = derive_key(b"hunter2", &blob, 32).unwrap();
        let k2 = derive_key(b"hunter2", &blob, 32).unwrap();
        assert_eq!(&k1[..], &k2[..]);
    }

    #[test]
    fn different_passphrase_different_key() {
        let blob = create_params(&fast_cost()).unwrap();
        let k1 = derive_key(b"hunter2", &blob, 32).unwrap();
        let k2 = derive_key(b"hunter3", &blob, 32).unwrap();
        assert_ne!(&k1[..], &k2[..]);
    }

    #[test]
    fn fresh_blobs_have_fresh_salts() {
        let b1 = create_params(&fast_cost()).unwrap();
        let b2 = create_params(&fast_cost()).unwrap();
        assert_ne!(b1, b2);
    }

    #[test]
    fn weak_cost_rejected() {
        let weak = KdfCost {
            log_n: 4,
            r: 8,
            p: 1,
        };
        assert!(create_params(&weak).is_err());
    }

    #[test]
    fn corrupt_blob_rejected() {
        let mut blob = create_params(&fast_cost()).unwrap();
        blob[0] = 0x7f;
        assert!(derive_key(b"pw", &blob, 32).is_err());

        let blob = create_params(&fast_cost()).unwrap();
        assert!(derive_key(b"pw", &blob[..4], 32).is_err());
    }
}
