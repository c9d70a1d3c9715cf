//! Logical-to-stored name and path resolution.
//!
//! User-visible names are encrypted with the vault's crypto state and
//! base64url-encoded to form the on-disk names.  The vault IV is fixed
//! in the metadata header, so the mapping is deterministic (the same
//! logical name always resolves to the same stored name) and reversible
//! under the vault key.  Directory structure is preserved component by
//! component.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD as BASE64;
use base64::Engine;

use crate::crypto::CryptoState;
use crate::errors::{Result, RvaultError};

/// Longest accepted logical name component, chosen so that the
/// encrypted and encoded stored name stays within common filesystem
/// name limits.
const NAME_MAX: usize = 150;

/// Map a logical path (e.g. `/docs/note`) to the on-disk path, with
/// every component encrypted.  `/`, `` and `.` resolve to the vault
/// directory itself.
pub(crate) fn resolve_path(base: &Path, crypto: &CryptoState, logical: &str) -> Result<PathBuf> {
    let mut resolved = base.to_path_buf();
    for comp in logical.split('/').filter(|c| !c.is_empty() && *c != ".") {
        resolved.push(encrypt_name(crypto, comp)?);
    }
    Ok(resolved)
}

/// Encrypt one logical name component into its stored form.
pub(crate) fn encrypt_name(crypto: &CryptoState, name: &str) -> Result<String> {
    validate_name(name)?;
    let ct = crypto.encrypt(name.as_bytes(), &[])?;
    Ok(BASE64.encode(ct))
}

/// Resolve one stored name back to its logical form.
///
/// Fails on names that are not valid encodings of an encrypted name
/// under this vault's key; enumeration skips those, direct access
/// surfaces the error.
pub(crate) fn resolve_stored_name(crypto: &CryptoState, stored: &str) -> Result<String> {
    let ct = BASE64
        .decode(stored)
        .map_err(|_| RvaultError::Crypto(format!("cannot resolve stored name `{stored}`")))?;
    let pt = crypto
        .decrypt(&ct, &[])
        .map_err(|_| RvaultError::Crypto(format!("cannot resolve stored name `{stored}`")))?;
    String::from_utf8(pt.to_vec())
        .map_err(|_| RvaultError::Crypto(format!("cannot resolve stored name `{stored}`")))
}

/// Validate that a logical name component is usable.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RvaultError::BadArgument("name cannot be empty".into()));
    }
    if name.len() > NAME_MAX {
        return Err(RvaultError::BadArgument(format!(
            "name cannot exceed {NAME_MAX} bytes"
        )));
    }
    if name == "." || name == ".." {
        return Err(RvaultError::BadArgument(format!(
            "`{name}` is not a valid vault name"
        )));
    }
    if name.bytes().any(|b| b == b'/' || b == 0) {
        return Err(RvaultError::BadArgument(format!(
            "name `{name}` contains invalid characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Cipher;

    fn keyed_state(cipher: Cipher) -> CryptoState {
        let mut state = CryptoState::new(cipher);
        let iv = state.gen_iv();
        state.set_iv(&iv).unwrap();
        state.gen_key();
        state
    }

    #[test]
    fn name_mapping_roundtrips() {
        for cipher in Cipher::ALL {
            let state = keyed_state(cipher);
            let stored = encrypt_name(&state, "report.txt").unwrap();
            assert_ne!(stored, "report.txt");
            assert_eq!(resolve_stored_name(&state, &stored).unwrap(), "report.txt");
        }
    }

    #[test]
    fn mapping_is_deterministic() {
        let state = keyed_state(Cipher::Aes256Gcm);
        assert_eq!(
            encrypt_name(&state, "a").unwrap(),
            encrypt_name(&state, "a").unwrap()
        );
    }

    #[test]
    fn stored_names_never_start_with_dot() {
        // base64url alphabet has no '.', so stored names can never be
        // mistaken for vault-internal dot-files.
        let state = keyed_state(Cipher::Chacha20);
        for name in ["a", ".hidden", "..almost"] {
            let stored = encrypt_name(&state, name).unwrap();
            assert!(!stored.starts_with('.'), "{stored}");
        }
    }

    #[test]
    fn foreign_names_fail_resolution() {
        let state = keyed_state(Cipher::Aes256Gcm);
        assert!(resolve_stored_name(&state, "!!not-base64!!").is_err());
        // Valid base64 of bytes that were never encrypted under this key.
        assert!(resolve_stored_name(&state, "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA").is_err());
    }

    #[test]
    fn path_resolution_preserves_structure() {
        let state = keyed_state(Cipher::Aes256Gcm);
        let base = Path::new("/vault");
        let resolved = resolve_path(base, &state, "/docs/note").unwrap();
        assert_eq!(resolved.components().count(), 4); // /, vault, docs', note'
        assert!(resolved.starts_with(base));
    }

    #[test]
    fn root_paths_resolve_to_base() {
        let state = keyed_state(Cipher::Aes256Gcm);
        let base = Path::new("/vault");
        for root in ["/", "", "."] {
            assert_eq!(resolve_path(base, &state, root).unwrap(), base);
        }
    }

    #[test]
    fn traversal_components_are_rejected() {
        let state = keyed_state(Cipher::Aes256Gcm);
        let base = Path::new("/vault");
        assert!(resolve_path(base, &state, "/../escape").is_err());
        assert!(resolve_path(base, &state, "/a/../b").is_err());
    }

    #[test]
    fn invalid_names_are_rejected() {
        let state = keyed_state(Cipher::Aes256Gcm);
        assert!(encrypt_name(&state, "").is_err());
        assert!(encrypt_name(&state, "..").is_err());
        assert!(encrypt_name(&state, &"x".repeat(NAME_MAX + 1)).is_err());
        assert!(encrypt_name(&state, "nul\0byte").is_err());
    }
}
