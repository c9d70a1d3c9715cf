//! Symmetric encryption dispatch over the cipher set.
//!
//! The AEAD ciphers (AES-256-GCM, Chacha20-Poly1305) return the
//! ciphertext with the authentication tag appended and bind the
//! caller-supplied associated data.  The MAC-then-Encrypt ciphers
//! (AES-256-CBC, Chacha20) return raw ciphertext; the file-object codec
//! applies HMAC-SHA3-256 over header + ciphertext separately.
//!
//! All ciphers run under the caller's IV.  The vault uses the single IV
//! stored in its metadata header, which keeps name resolution
//! deterministic; fresh randomness per file comes from the data key.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit, StreamCipher};
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use chacha20::ChaCha20;
use chacha20poly1305::ChaCha20Poly1305;
use zeroize::Zeroize;

use crate::crypto::secbuf::SecureBuffer;
use crate::crypto::Cipher;
use crate::errors::{Result, RvaultError};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Encrypt `plaintext` under `key`/`iv`.
///
/// AEAD ciphers append their tag and authenticate `aad`; the others
/// ignore `aad` and return raw ciphertext.
pub(crate) fn encrypt(
    cipher: Cipher,
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
    aad: &[u8],
) -> Result<Vec<u8>> {
    match cipher {
        Cipher::Aes256Cbc => {
            let enc = Aes256CbcEnc::new_from_slices(key, iv)
                .map_err(|e| RvaultError::Crypto(format!("invalid key or IV length: {e}")))?;
            Ok(enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
        }
        Cipher::Chacha20 => {
            let mut cc = ChaCha20::new_from_slices(key, iv)
                .map_err(|e| RvaultError::Crypto(format!("invalid key or IV length: {e}")))?;
            let mut out = plaintext.to_vec();
            cc.apply_keystream(&mut out);
            Ok(out)
        }
        Cipher::Aes256Gcm => {
            let gcm = Aes256Gcm::new_from_slice(key)
                .map_err(|e| RvaultError::Crypto(format!("invalid key length: {e}")))?;
            gcm.encrypt(
                Nonce::from_slice(iv),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| RvaultError::Crypto(format!("encryption error: {e}")))
        }
        Cipher::Chacha20Poly1305 => {
            let ccp = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|e| RvaultError::Crypto(format!("invalid key length: {e}")))?;
            ccp.encrypt(
                chacha20poly1305::Nonce::from_slice(iv),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| RvaultError::Crypto(format!("encryption error: {e}")))
        }
    }
}

/// Decrypt `data` under `key`/`iv` into a secure buffer.
///
/// For AEAD ciphers `data` must be ciphertext with the tag appended and
/// `aad` must match what was authenticated at encryption time; tag
/// verification failure is a crypto error and yields no plaintext.
pub(crate) fn decrypt(
    cipher: Cipher,
    key: &[u8],
    iv: &[u8],
    data: &[u8],
    aad: &[u8],
) -> Result<SecureBuffer> {
    match cipher {
        Cipher::Aes256Cbc => {
            let dec = Aes256CbcDec::new_from_slices(key, iv)
                .map_err(|e| RvaultError::Crypto(format!("invalid key or IV length: {e}")))?;
            let mut pt = dec
                .decrypt_padded_vec_mut::<Pkcs7>(data)
                .map_err(|_| RvaultError::Crypto("decryption failed".into()))?;
            let out = SecureBuffer::from_slice(&pt);
            pt.zeroize();
            Ok(out)
        }
        Cipher::Chacha20 => {
            let mut cc = ChaCha20::new_from_slices(key, iv)
                .map_err(|e| RvaultError::Crypto(format!("invalid key or IV length: {e}")))?;
            let mut out = SecureBuffer::from_slice(data);
            cc.apply_keystream(&mut out);
            Ok(out)
        }
        Cipher::Aes256Gcm => {
            let gcm = Aes256Gcm::new_from_slice(key)
                .map_err(|e| RvaultError::Crypto(format!("invalid key length: {e}")))?;
            let mut pt = gcm
                .decrypt(Nonce::from_slice(iv), Payload { msg: data, aad })
                .map_err(|_| RvaultError::Crypto("decryption failed".into()))?;
            let out = SecureBuffer::from_slice(&pt);
            pt.zeroize();
            Ok(out)
        }
        Cipher::Chacha20Poly1305 => {
            let ccp = ChaCha20Poly1305::new_from_slice(key)
                .map_err(|e| RvaultError::Crypto(format!("invalid key length: {e}")))?;
            let mut pt = ccp
                .decrypt(
                    chacha20poly1305::Nonce::from_slice(iv),
                    Payload { msg: data, aad },
                )
                .map_err(|_| RvaultError::Crypto("decryption failed".into()))?;
            let out = SecureBuffer::from_slice(&pt);
            pt.zeroize();
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; 32] = [0x42; 32];

    fn iv_for(cipher: Cipher) -> Vec<u8> {
        vec![0x17; cipher.iv_len()]
    }

    #[test]
    fn roundtrip_every_cipher() {
        for cipher in Cipher::ALL {
            let iv = iv_for(cipher);
            let ct = encrypt(cipher, &KEY, &iv, b"attack at dawn", b"hdr").unwrap();
            let pt = decrypt(cipher, &KEY, &iv, &ct, b"hdr").unwrap();
            assert_eq!(&pt[..], b"attack at dawn", "cipher {cipher:?}");
        }
    }

    #[test]
    fn aead_ciphertext_includes_tag() {
        for cipher in [Cipher::Aes256Gcm, Cipher::Chacha20Poly1305] {
            let iv = iv_for(cipher);
            let ct = encrypt(cipher, &KEY, &iv, b"x", b"").unwrap();
            assert_eq!(ct.len(), 1 + cipher.tag_len());
        }
    }

    #[test]
    fn aead_rejects_wrong_aad() {
        for cipher in [Cipher::Aes256Gcm, Cipher::Chacha20Poly1305] {
            let iv = iv_for(cipher);
            let ct = encrypt(cipher, &KEY, &iv, b"payload", b"good").unwrap();
            assert!(decrypt(cipher, &KEY, &iv, &ct, b"evil").is_err());
        }
    }

    #[test]
    fn cbc_pads_to_block_size() {
        let iv = iv_for(Cipher::Aes256Cbc);
        let ct = encrypt(Cipher::Aes256Cbc, &KEY, &iv, b"", b"").unwrap();
        // PKCS7 always emits at least one full block.
        assert_eq!(ct.len(), 16);
        let pt = decrypt(Cipher::Aes256Cbc, &KEY, &iv, &ct, b"").unwrap();
        assert!(pt.is_empty());
    }

    #[test]
    fn stream_cipher_preserves_length() {
        let iv = iv_for(Cipher::Chacha20);
        let ct = encrypt(Cipher::Chacha20, &KEY, &iv, b"exact", b"").unwrap();
        assert_eq!(ct.len(), 5);
    }
}
