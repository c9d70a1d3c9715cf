//! Cryptographic primitives for the vault core.
//!
//! This module provides:
//! - The cipher set and per-cipher dispatch (`encryption`)
//! - scrypt passphrase key derivation with self-describing parameter
//!   blobs (`kdf`)
//! - HMAC-SHA3-256 tagging (`hmac`)
//! - Zeroized, swap-locked scratch memory (`secbuf`)
//! - `CryptoState`, the per-vault object holding the cipher, the IV and
//!   the currently installed key

pub mod encryption;
pub mod hmac;
pub mod kdf;
pub mod secbuf;

pub use hmac::{hmac_sha3_256, HMAC_SHA3_256_LEN};
pub use kdf::KdfCost;
pub use secbuf::SecureBuffer;

use rand::RngCore;

use crate::errors::{Result, RvaultError};

/// The enumerated cipher set.  Identifier zero is reserved ("none") and
/// rejected everywhere; the numeric values are part of the metadata
/// format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Cipher {
    /// AES-256 in CBC mode, authenticated with HMAC-SHA3-256 (MtE).
    Aes256Cbc = 1,
    /// Chacha20 stream cipher, authenticated with HMAC-SHA3-256 (MtE).
    Chacha20 = 2,
    /// AES-256-GCM (AEAD).
    Aes256Gcm = 3,
    /// Chacha20-Poly1305 (AEAD).
    Chacha20Poly1305 = 4,
}

impl Cipher {
    /// The default cipher for new vaults.
    pub const PRIMARY: Cipher = Cipher::Aes256Gcm;

    /// Every supported cipher, in identifier order.
    pub const ALL: [Cipher; 4] = [
        Cipher::Aes256Cbc,
        Cipher::Chacha20,
        Cipher::Aes256Gcm,
        Cipher::Chacha20Poly1305,
    ];

    /// Look a cipher up by its user-visible name.
    pub fn from_name(name: &str) -> Result<Cipher> {
        match name.to_ascii_lowercase().as_str() {
            "aes-256-cbc" => Ok(Cipher::Aes256Cbc),
            "chacha20" => Ok(Cipher::Chacha20),
            "aes-256-gcm" => Ok(Cipher::Aes256Gcm),
            "chacha20-poly1305" => Ok(Cipher::Chacha20Poly1305),
            _ => Err(RvaultError::UnsupportedCipher(name.to_string())),
        }
    }

    /// The user-visible cipher name.
    pub fn name(self) -> &'static str {
        match self {
            Cipher::Aes256Cbc => "aes-256-cbc",
            Cipher::Chacha20 => "chacha20",
            Cipher::Aes256Gcm => "aes-256-gcm",
            Cipher::Chacha20Poly1305 => "chacha20-poly1305",
        }
    }

    /// Key length in bytes.  All members are 256-bit ciphers.
    pub fn key_len(self) -> usize {
        32
    }

    /// Required IV length in bytes.
    pub fn iv_len(self) -> usize {
        match self {
            Cipher::Aes256Cbc => 16,
            Cipher::Chacha20 | Cipher::Aes256Gcm | Cipher::Chacha20Poly1305 => 12,
        }
    }

    /// Length of the authentication tag a sealed file carries: the AEAD
    /// tag, or the HMAC-SHA3-256 tag for the MtE ciphers.
    pub fn tag_len(self) -> usize {
        if self.is_aead() {
            16
        } else {
            HMAC_SHA3_256_LEN
        }
    }

    /// Whether the cipher authenticates its own output.
    pub fn is_aead(self) -> bool {
        matches!(self, Cipher::Aes256Gcm | Cipher::Chacha20Poly1305)
    }
}

impl TryFrom<u8> for Cipher {
    type Error = RvaultError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Cipher::Aes256Cbc),
            2 => Ok(Cipher::Chacha20),
            3 => Ok(Cipher::Aes256Gcm),
            4 => Ok(Cipher::Chacha20Poly1305),
            other => Err(RvaultError::UnsupportedCipher(format!("id {other}"))),
        }
    }
}

/// Per-vault cryptographic state: the cipher, the IV from the metadata
/// header, and whichever key is currently installed (the passphrase key
/// while opening, the data key once the vault is usable).
///
/// The key lives in a [`SecureBuffer`] and is destroyed when the state
/// is dropped or replaced.
pub struct CryptoState {
    cipher: Cipher,
    iv: Option<Vec<u8>>,
    key: Option<SecureBuffer>,
}

impl CryptoState {
    /// Create state bound to a cipher, with no IV and no key.
    pub fn new(cipher: Cipher) -> Self {
        Self {
            cipher,
            iv: None,
            key: None,
        }
    }

    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    /// Generate a fresh random IV of the cipher's required length.
    /// Caller-owned; install it with [`CryptoState::set_iv`].
    pub fn gen_iv(&self) -> Vec<u8> {
        let mut iv = vec![0u8; self.cipher.iv_len()];
        rand::rngs::OsRng.fill_bytes(&mut iv);
        iv
    }

    /// Install an IV.  Fails if the length does not match the cipher.
    pub fn set_iv(&mut self, iv: &[u8]) -> Result<()> {
        if iv.len() != self.cipher.iv_len() {
            return Err(RvaultError::Crypto(format!(
                "IV must be {} bytes for {} (got {})",
                self.cipher.iv_len(),
                self.cipher.name(),
                iv.len()
            )));
        }
        self.iv = Some(iv.to_vec());
        Ok(())
    }

    /// Generate a fresh random data key and install it, replacing (and
    /// destroying) any previously installed key.
    pub fn gen_key(&mut self) {
        let mut key = SecureBuffer::zeroed(self.cipher.key_len());
        rand::rngs::OsRng.fill_bytes(&mut key);
        self.key = Some(key);
    }

    /// Install a known key.  Fails if the length is wrong.
    pub fn set_key(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() != self.cipher.key_len() {
            return Err(RvaultError::Crypto(format!(
                "key must be {} bytes for {} (got {})",
                self.cipher.key_len(),
                self.cipher.name(),
                bytes.len()
            )));
        }
        self.key = Some(SecureBuffer::from_slice(bytes));
        Ok(())
    }

    /// Derive the passphrase key from the stored KDF parameter blob and
    /// install it as the current key.
    pub fn set_passphrase_key(&mut self, passphrase: &str, kdf_params: &[u8]) -> Result<()> {
        let key = kdf::derive_key(passphrase.as_bytes(), kdf_params, self.cipher.key_len())?;
        self.key = Some(key);
        Ok(())
    }

    /// Borrow the installed key.  Never exposed outside the vault core.
    pub(crate) fn get_key(&self) -> Result<&[u8]> {
        self.key
            .as_deref()
            .ok_or_else(|| RvaultError::Crypto("no key installed".into()))
    }

    fn get_iv(&self) -> Result<&[u8]> {
        self.iv
            .as_deref()
            .ok_or_else(|| RvaultError::Crypto("no IV installed".into()))
    }

    /// Encrypt under the installed key and IV.  AEAD ciphers append
    /// their tag and bind `aad`; the MtE ciphers ignore `aad` and
    /// return raw ciphertext for the caller to MAC.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        encryption::encrypt(self.cipher, self.get_key()?, self.get_iv()?, plaintext, aad)
    }

    /// Decrypt under the installed key and IV into a secure buffer the
    /// caller owns.
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<SecureBuffer> {
        encryption::decrypt(self.cipher, self.get_key()?, self.get_iv()?, data, aad)
    }

    /// Envelope-wrap a data key under the installed key: K_s = Enc(K_p, K_e).
    pub(crate) fn wrap_key(&self, data_key: &[u8]) -> Result<Vec<u8>> {
        self.encrypt(data_key, &[])
    }

    /// Unwrap an envelope-wrapped data key under the installed key.
    ///
    /// For the AEAD ciphers a wrong key fails the tag check here; for
    /// the MtE ciphers the wrong result is caught by the metadata HMAC.
    pub(crate) fn unwrap_key(&self, wrapped: &[u8]) -> Result<SecureBuffer> {
        self.decrypt(wrapped, &[])
    }
}

impl std::fmt::Debug for CryptoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoState")
            .field("cipher", &self.cipher)
            .field("has_iv", &self.iv.is_some())
            .field("has_key", &self.key.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cipher_names_roundtrip() {
        for cipher in Cipher::ALL {
            assert_eq!(Cipher::from_name(cipher.name()).unwrap(), cipher);
            assert_eq!(Cipher::try_from(cipher as u8).unwrap(), cipher);
        }
    }

    #[test]
    fn cipher_zero_is_rejected() {
        assert!(Cipher::try_from(0).is_err());
        assert!(Cipher::from_name("none").is_err());
    }

    #[test]
    fn state_requires_key_and_iv() {
        let state = CryptoState::new(Cipher::Aes256Gcm);
        assert!(state.encrypt(b"data", &[]).is_err());
    }

    #[test]
    fn set_iv_checks_length() {
        let mut state = CryptoState::new(Cipher::Aes256Cbc);
        assert!(state.set_iv(&[0u8; 12]).is_err());
        assert!(state.set_iv(&[0u8; 16]).is_ok());
    }

    #[test]
    fn set_key_checks_length() {
        let mut state = CryptoState::new(Cipher::Chacha20);
        assert!(state.set_key(&[0u8; 16]).is_err());
        assert!(state.set_key(&[0u8; 32]).is_ok());
    }

    #[test]
    fn wrap_unwrap_roundtrip() {
        for cipher in Cipher::ALL {
            let mut state = CryptoState::new(cipher);
            let iv = state.gen_iv();
            state.set_iv(&iv).unwrap();
            state.set_key(&[0x5a; 32]).unwrap();

            let data_key = [0xc3u8; 32];
            let wrapped = state.wrap_key(&data_key).unwrap();
            assert_ne!(&wrapped[..32.min(wrapped.len())], &data_key[..]);

            let unwrapped = state.unwrap_key(&wrapped).unwrap();
            assert_eq!(&unwrapped[..], &data_key[..], "cipher {cipher:?}");
        }
    }

    #[test]
    fn aead_unwrap_with_wrong_kek_fails() {
        let mut state = CryptoState::new(Cipher::Aes256Gcm);
        let iv = state.gen_iv();
        state.set_iv(&iv).unwrap();
        state.set_key(&[0x01; 32]).unwrap();
        let wrapped = state.wrap_key(&[0xee; 32]).unwrap();

        state.set_key(&[0x02; 32]).unwrap();
        assert!(state.unwrap_key(&wrapped).is_err());
    }
}
