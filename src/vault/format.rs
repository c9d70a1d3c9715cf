//! Binary vault metadata format and HMAC integrity verification.
//!
//! The metadata file has this layout:
//!
//! ```text
//! offset  size              field
//! 0       1                 ver
//! 1       1                 cipher
//! 2       2  big-endian     iv_len
//! 4       1                 kp_len
//! 5       1                 reserved (zero)
//! 6       16                uid (UUID)
//! 22      1                 flags
//! 23..64  zero padding to the storage alignment
//! 64      iv_len            IV
//! +       kp_len            KDF parameter blob (opaque, self-describing)
//! +       32                HMAC-SHA3-256 over bytes [0 .. end of KDF
//!                           params], keyed by the data key
//! ```
//!
//! The packed prefix reproduces the legacy layout byte for byte so that
//! existing vaults open: `kp_len` is a single byte at offset 4 with a
//! reserved zero byte after it.
//!
//! The parser validates every length field against the real file size
//! before anything else trusts them; the HMAC is verified over the
//! exact bytes read from disk.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::crypto::{Cipher, HMAC_SHA3_256_LEN};
use crate::errors::{Result, RvaultError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Name of the metadata file inside the vault directory.
pub const METADATA_FILE: &str = ".rvault.metadata";

/// Prefix identifying vault-internal files, hidden from enumeration.
pub const METADATA_PREFIX: &str = ".rvault.";

/// Current on-disk ABI version.
pub const ABI_VERSION: u8 = 3;

/// Use the passphrase key directly as the data key; no server.
pub const FLAG_NOAUTH: u8 = 0x01;

/// Every flag bit the current version understands.
const KNOWN_FLAGS: u8 = FLAG_NOAUTH;

/// On-disk records are padded to this boundary.
pub const STORAGE_ALIGNMENT: usize = 64;

/// Packed header prefix: ver + cipher + iv_len + kp_len + reserved +
/// uid + flags.
const PACKED_LEN: usize = 1 + 1 + 2 + 1 + 1 + 16 + 1;

/// Full header region length (prefix plus alignment padding).
pub const HDR_LEN: usize = align_up(PACKED_LEN);

/// File mode for the metadata file.
#[cfg(unix)]
const METADATA_MODE: u32 = 0o600;

/// Round `n` up to the storage alignment.
pub const fn align_up(n: usize) -> usize {
    (n + STORAGE_ALIGNMENT - 1) & !(STORAGE_ALIGNMENT - 1)
}

/// Full path of the metadata file for a vault directory.
pub fn metadata_path(base_path: &Path) -> PathBuf {
    base_path.join(METADATA_FILE)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Assemble the metadata record up to the end of the KDF parameters,
/// i.e. exactly the region the header HMAC covers.  The caller computes
/// the HMAC under the data key and appends it before writing.
pub fn encode_metadata(
    cipher: Cipher,
    flags: u8,
    uid: &[u8; 16],
    iv: &[u8],
    kdf_params: &[u8],
) -> Result<Vec<u8>> {
    if iv.len() != cipher.iv_len() {
        return Err(RvaultError::Crypto(format!(
            "IV must be {} bytes for {}",
            cipher.iv_len(),
            cipher.name()
        )));
    }
    let kp_len = u8::try_from(kdf_params.len())
        .map_err(|_| RvaultError::BadArgument("KDF parameter blob exceeds 255 bytes".into()))?;

    let mut buf = Vec::with_capacity(HDR_LEN + iv.len() + kdf_params.len() + HMAC_SHA3_256_LEN);
    buf.push(ABI_VERSION);
    buf.push(cipher as u8);
    buf.extend_from_slice(&(iv.len() as u16).to_be_bytes());
    buf.push(kp_len);
    buf.push(0); // reserved
    buf.extend_from_slice(uid);
    buf.push(flags);
    buf.resize(HDR_LEN, 0); // alignment padding
    buf.extend_from_slice(iv);
    buf.extend_from_slice(kdf_params);
    Ok(buf)
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// A validated read-only view over a raw metadata record.
///
/// Construction checks the version, the cipher, the flag bits and all
/// length fields; accessors afterwards are plain slicing.
pub struct MetadataView<'a> {
    bytes: &'a [u8],
    cipher: Cipher,
    iv_len: usize,
    kp_len: usize,
}

impl<'a> MetadataView<'a> {
    /// Parse and validate a metadata record.
    ///
    /// `bytes` must be the complete file contents; the computed total
    /// length is checked against it so the length fields can be
    /// trusted from here on.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < HDR_LEN {
            return Err(RvaultError::CorruptVault("metadata file too short".into()));
        }

        let ver = bytes[0];
        if ver != ABI_VERSION {
            return Err(RvaultError::UnsupportedVersion(ver));
        }
        let cipher = Cipher::try_from(bytes[1])?;

        let iv_len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let kp_len = bytes[4] as usize;
        if iv_len != cipher.iv_len() {
            return Err(RvaultError::CorruptVault("IV length mismatch".into()));
        }
        if kp_len == 0 {
            return Err(RvaultError::CorruptVault("missing KDF parameters".into()));
        }

        let flags = bytes[22];
        if flags & !KNOWN_FLAGS != 0 {
            return Err(RvaultError::CorruptVault(format!(
                "unknown flag bits {:#04x}",
                flags & !KNOWN_FLAGS
            )));
        }

        let total = HDR_LEN + iv_len + kp_len + HMAC_SHA3_256_LEN;
        if bytes.len() != total {
            return Err(RvaultError::CorruptVault("file length mismatch".into()));
        }

        Ok(Self {
            bytes,
            cipher,
            iv_len,
            kp_len,
        })
    }

    pub fn cipher(&self) -> Cipher {
        self.cipher
    }

    pub fn flags(&self) -> u8 {
        self.bytes[22]
    }

    pub fn uid(&self) -> [u8; 16] {
        let mut uid = [0u8; 16];
        uid.copy_from_slice(&self.bytes[6..22]);
        uid
    }

    pub fn iv(&self) -> &'a [u8] {
        &self.bytes[HDR_LEN..HDR_LEN + self.iv_len]
    }

    pub fn kdf_params(&self) -> &'a [u8] {
        let start = HDR_LEN + self.iv_len;
        &self.bytes[start..start + self.kp_len]
    }

    /// The byte range the header HMAC covers: header through end of
    /// KDF parameters.
    pub fn hmac_data(&self) -> &'a [u8] {
        &self.bytes[..HDR_LEN + self.iv_len + self.kp_len]
    }

    /// The stored HMAC tag.
    pub fn hmac(&self) -> &'a [u8] {
        &self.bytes[HDR_LEN + self.iv_len + self.kp_len..]
    }
}

// ---------------------------------------------------------------------------
// File I/O
// ---------------------------------------------------------------------------

/// Write the complete metadata record.
///
/// The file is created with mode 0600 and `O_CREAT|O_EXCL|O_WRONLY|
/// O_SYNC`: init can never overwrite an existing vault, and the record
/// is durable (file and parent directory fsynced) before this returns.
/// A partially written file is removed on error where possible.
pub fn write_metadata(base_path: &Path, record: &[u8]) -> Result<()> {
    let path = metadata_path(base_path);

    let mut opts = OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(METADATA_MODE).custom_flags(libc::O_SYNC);
    }

    let mut file = opts.open(&path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            RvaultError::AlreadyExists(path.clone())
        } else {
            RvaultError::Io(e)
        }
    })?;

    let res = file.write_all(record).and_then(|_| file.sync_all());
    drop(file);
    if let Err(e) = res {
        let _ = std::fs::remove_file(&path);
        return Err(RvaultError::Io(e));
    }
    sync_dir(base_path)?;
    Ok(())
}

/// Map the metadata file read-only.
///
/// Returns the mapping; parse it with [`MetadataView::parse`].  Files
/// shorter than one header are rejected before mapping.
pub fn read_metadata(base_path: &Path) -> Result<Mmap> {
    let path = metadata_path(base_path);
    let file = File::open(&path)?;
    let len = file.metadata()?.len();
    if len < HDR_LEN as u64 {
        return Err(RvaultError::CorruptVault("metadata file too short".into()));
    }
    // SAFETY: read-only mapping of a regular file we just opened.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(mmap)
}

/// Fsync a directory so a metadata create or a rename within it is
/// durable.
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        File::open(dir)?.sync_all()?;
    }
    #[cfg(not(unix))]
    {
        let _ = dir;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::hmac_sha3_256;

    fn sample_record() -> Vec<u8> {
        let cipher = Cipher::Aes256Gcm;
        let iv = vec![0xaa; cipher.iv_len()];
        let kp = vec![0xbb; 21];
        let uid = [0x11u8; 16];
        let mut rec = encode_metadata(cipher, FLAG_NOAUTH, &uid, &iv, &kp).unwrap();
        let tag = hmac_sha3_256(&[0x22; 32], &rec).unwrap();
        rec.extend_from_slice(&tag);
        rec
    }

    #[test]
    fn header_region_is_aligned() {
        assert_eq!(HDR_LEN % STORAGE_ALIGNMENT, 0);
        assert_eq!(HDR_LEN, 64);
    }

    #[test]
    fn encode_parse_roundtrip() {
        let rec = sample_record();
        let view = MetadataView::parse(&rec).unwrap();
        assert_eq!(view.cipher(), Cipher::Aes256Gcm);
        assert_eq!(view.flags(), FLAG_NOAUTH);
        assert_eq!(view.uid(), [0x11u8; 16]);
        assert_eq!(view.iv(), &[0xaa; 12][..]);
        assert_eq!(view.kdf_params(), &[0xbb; 21][..]);
        assert_eq!(view.hmac().len(), HMAC_SHA3_256_LEN);
        assert_eq!(view.hmac_data().len(), rec.len() - HMAC_SHA3_256_LEN);
    }

    #[test]
    fn legacy_prefix_bytes_are_fixed() {
        let rec = sample_record();
        assert_eq!(rec[0], ABI_VERSION);
        assert_eq!(rec[1], Cipher::Aes256Gcm as u8);
        // iv_len big-endian
        assert_eq!(&rec[2..4], &[0x00, 0x0c]);
        // one-byte kp_len, then the reserved zero
        assert_eq!(rec[4], 21);
        assert_eq!(rec[5], 0);
        assert_eq!(rec[22], FLAG_NOAUTH);
        // padding up to the IV region is zero
        assert!(rec[23..HDR_LEN].iter().all(|&b| b == 0));
    }

    #[test]
    fn parse_rejects_bad_version() {
        let mut rec = sample_record();
        rec[0] = ABI_VERSION + 1;
        assert!(matches!(
            MetadataView::parse(&rec),
            Err(RvaultError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn parse_rejects_cipher_none() {
        let mut rec = sample_record();
        rec[1] = 0;
        assert!(matches!(
            MetadataView::parse(&rec),
            Err(RvaultError::UnsupportedCipher(_))
        ));
    }

    #[test]
    fn parse_rejects_unknown_flags() {
        let mut rec = sample_record();
        rec[22] |= 0x80;
        assert!(MetadataView::parse(&rec).is_err());
    }

    #[test]
    fn parse_rejects_truncated_file() {
        let rec = sample_record();
        assert!(MetadataView::parse(&rec[..rec.len() - 1]).is_err());
        assert!(MetadataView::parse(&rec[..32]).is_err());
    }

    #[test]
    fn write_is_exclusive() {
        let dir = tempfile::TempDir::new().unwrap();
        let rec = sample_record();
        write_metadata(dir.path(), &rec).unwrap();
        assert!(matches!(
            write_metadata(dir.path(), &rec),
            Err(RvaultError::AlreadyExists(_))
        ));
    }

    #[test]
    fn read_maps_what_write_wrote() {
        let dir = tempfile::TempDir::new().unwrap();
        let rec = sample_record();
        write_metadata(dir.path(), &rec).unwrap();
        let mmap = read_metadata(dir.path()).unwrap();
        assert_eq!(&mmap[..], &rec[..]);
    }
}
