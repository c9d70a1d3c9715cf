//! Encrypted file-object format: seal and open single files.
//!
//! Each file in the vault is stored as:
//!
//! ```text
//! offset  size              field
//! 0       1                 ver
//! 1       1                 reserved (zero)
//! 2       2  big-endian     hmac_len
//! 4       8  big-endian     edata_len
//! 12..64  zero padding
//! 64      edata_len         ciphertext
//! +       hmac_len          tag
//! ```
//!
//! For the AEAD ciphers the tag is the cipher's own and covers the
//! header as associated data.  For the MtE ciphers the tag is
//! HMAC-SHA3-256 over header + ciphertext under the data key; it is
//! verified before any decryption.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use memmap2::Mmap;

use crate::crypto::{hmac_sha3_256, hmac::tags_match, CryptoState, SecureBuffer};
use crate::errors::{Result, RvaultError};
use crate::vault::format::{align_up, sync_dir, ABI_VERSION};

/// Full file-object header length (12 packed bytes plus padding).
pub const FILEOBJ_HDR_LEN: usize = align_up(12);

/// Assemble the on-disk image of one file object from plaintext.
pub fn seal(crypto: &CryptoState, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = crypto.cipher();

    if cipher.is_aead() {
        // Ciphertext length equals plaintext length, so the header can
        // be fixed before encryption and bound as associated data.
        let hdr = encode_header(cipher.tag_len(), plaintext.len() as u64);
        let ct_tag = crypto.encrypt(plaintext, &hdr)?;
        debug_assert_eq!(ct_tag.len(), plaintext.len() + cipher.tag_len());

        let mut buf = Vec::with_capacity(FILEOBJ_HDR_LEN + ct_tag.len());
        buf.extend_from_slice(&hdr);
        buf.extend_from_slice(&ct_tag);
        Ok(buf)
    } else {
        // MAC-then-Encrypt: the MAC runs over the ciphertext, so
        // encrypt first, then tag header + ciphertext.
        let ct = crypto.encrypt(plaintext, &[])?;
        let hdr = encode_header(cipher.tag_len(), ct.len() as u64);

        let mut buf = Vec::with_capacity(FILEOBJ_HDR_LEN + ct.len() + cipher.tag_len());
        buf.extend_from_slice(&hdr);
        buf.extend_from_slice(&ct);
        let tag = hmac_sha3_256(crypto.get_key()?, &buf)?;
        buf.extend_from_slice(&tag);
        Ok(buf)
    }
}

/// Authenticate and decrypt one file-object image.
///
/// Every failure, a flipped bit in the header, the ciphertext or the
/// tag included, is reported as a crypto error and yields no plaintext.
pub fn unseal(crypto: &CryptoState, bytes: &[u8]) -> Result<SecureBuffer> {
    let cipher = crypto.cipher();

    if bytes.len() < FILEOBJ_HDR_LEN {
        return Err(RvaultError::Crypto("file object too short".into()));
    }
    if bytes[0] != ABI_VERSION {
        return Err(RvaultError::Crypto("file object version mismatch".into()));
    }
    let hmac_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
    if hmac_len != cipher.tag_len() {
        return Err(RvaultError::Crypto("file object tag length mismatch".into()));
    }
    let mut len_field = [0u8; 8];
    len_field.copy_from_slice(&bytes[4..12]);
    let edata_len = u64::from_be_bytes(len_field) as usize;
    let total = FILEOBJ_HDR_LEN
        .checked_add(edata_len)
        .and_then(|n| n.checked_add(hmac_len))
        .ok_or_else(|| RvaultError::Crypto("file object length overflow".into()))?;
    if bytes.len() != total {
        return Err(RvaultError::Crypto("file object length mismatch".into()));
    }

    let data_end = FILEOBJ_HDR_LEN + edata_len;
    if cipher.is_aead() {
        // Ciphertext and tag are contiguous; the header is the
        // associated data.  The AEAD rejects any modification.
        crypto.decrypt(&bytes[FILEOBJ_HDR_LEN..], &bytes[..FILEOBJ_HDR_LEN])
    } else {
        let computed = hmac_sha3_256(crypto.get_key()?, &bytes[..data_end])?;
        if !tags_match(&bytes[data_end..], &computed) {
            return Err(RvaultError::Crypto(
                "file object authentication failed".into(),
            ));
        }
        crypto.decrypt(&bytes[FILEOBJ_HDR_LEN..data_end], &[])
    }
}

fn encode_header(hmac_len: usize, edata_len: u64) -> [u8; FILEOBJ_HDR_LEN] {
    let mut hdr = [0u8; FILEOBJ_HDR_LEN];
    hdr[0] = ABI_VERSION;
    // hdr[1] reserved
    hdr[2..4].copy_from_slice(&(hmac_len as u16).to_be_bytes());
    hdr[4..12].copy_from_slice(&edata_len.to_be_bytes());
    hdr
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Write a sealed image to `path` atomically.
///
/// The image goes to a sibling temp file first, is fsynced, renamed
/// over the target, and the parent directory is fsynced.  Readers never
/// see a half-written file.
pub fn write_image(path: &Path, image: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or(Path::new("."));
    let tmp_path = parent.join(format!(
        ".{}.tmp",
        path.file_name().unwrap_or_default().to_string_lossy()
    ));

    let res = (|| {
        let mut file = File::create(&tmp_path)?;
        file.write_all(image)?;
        file.sync_all()
    })();
    if let Err(e) = res {
        let _ = fs::remove_file(&tmp_path);
        return Err(RvaultError::Io(e));
    }
    fs::rename(&tmp_path, path)?;
    sync_dir(parent)?;
    Ok(())
}

/// Map a stored file object read-only.
pub fn read_image(path: &Path) -> Result<Mmap> {
    let file = File::open(path)?;
    // SAFETY: read-only mapping of a regular file we just opened.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}
