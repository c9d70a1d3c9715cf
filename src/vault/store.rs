//! Vault lifecycle: init, open, open-by-recovery, file I/O,
//! enumeration and close.
//!
//! A `Vault` owns the live cryptographic state and the registry of
//! currently open file objects.  Closing (or dropping) the vault
//! destroys the keys and every open file object; explicit `close`
//! consumes the handle so it cannot be used afterwards.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use rand::RngCore;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::crypto::{hmac::tags_match, hmac_sha3_256, Cipher, CryptoState, SecureBuffer};
use crate::errors::{Result, RvaultError};
use crate::recovery::RecoveryBlob;
use crate::server;
use crate::vault::format::{self, MetadataView, FLAG_NOAUTH};
use crate::vault::{fileobj, path as vpath};

/// Opaque handle to an open file object inside a vault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId(u64);

/// One open file object: the logical name and its resolved on-disk
/// path.  Content is sealed and opened per call; nothing plaintext is
/// retained here.
struct FileObj {
    logical: String,
    path: PathBuf,
}

/// The main vault handle.  Create one with [`Vault::open`] or
/// [`Vault::open_by_recovery`] after a one-time [`Vault::init`].
pub struct Vault {
    /// Canonical absolute path of the vault directory.
    base_path: PathBuf,

    /// The vault's UUID, as registered with the key server.
    uid: Uuid,

    /// Header flag byte.
    flags: u8,

    /// Cipher, IV and the installed data key.
    crypto: CryptoState,

    /// Key server this vault authenticates against; `None` under
    /// NOAUTH and for recovery opens.
    server_url: Option<String>,

    /// Registry of open file objects, keyed by opaque handle.
    files: HashMap<FileId, FileObj>,

    next_file_id: u64,
}

impl Vault {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Initialize a new vault in the existing directory `path`.
    ///
    /// Generates the IV and KDF parameters, derives the passphrase key,
    /// and (unless `FLAG_NOAUTH` is set) generates a data key, wraps it
    /// under the passphrase key and registers the envelope with the key
    /// server before anything touches the disk.  The metadata file is
    /// written exclusively and durably as the final step, so a failure
    /// anywhere leaves no on-disk artifact.
    pub fn init(
        path: &Path,
        settings: &Settings,
        passphrase: &str,
        uid_hex: &str,
        flags: u8,
    ) -> Result<()> {
        if passphrase.is_empty() {
            return Err(RvaultError::BadArgument("passphrase cannot be empty".into()));
        }
        if flags & !FLAG_NOAUTH != 0 {
            return Err(RvaultError::BadArgument(format!(
                "unknown flag bits {:#04x}",
                flags & !FLAG_NOAUTH
            )));
        }
        let base_path = vault_dir(path)?;

        let cipher = settings.cipher()?;
        let mut crypto = CryptoState::new(cipher);
        let iv = crypto.gen_iv();
        crypto.set_iv(&iv)?;
        let kdf_params = crate::crypto::kdf::create_params(&settings.kdf_cost())?;

        // The passphrase key is needed first: it either wraps the data
        // key or, under NOAUTH, becomes the data key itself.
        crypto.set_passphrase_key(passphrase, &kdf_params)?;

        let uid = parse_uid(uid_hex)?;

        if flags & FLAG_NOAUTH == 0 {
            let server_url = settings.server_url().ok_or(RvaultError::NoServerUrl)?;

            let mut data_key = SecureBuffer::zeroed(cipher.key_len());
            rand::rngs::OsRng.fill_bytes(&mut data_key);

            let wrapped = crypto.wrap_key(&data_key)?;
            server::register(&server_url, &uid, &wrapped)?;
            crypto.set_key(&data_key)?;
        }
        // Under NOAUTH the passphrase key stays installed as the data
        // key; there is no server round-trip.

        let mut record =
            format::encode_metadata(cipher, flags, uid.as_bytes(), &iv, &kdf_params)?;
        let tag = hmac_sha3_256(crypto.get_key()?, &record)?;
        record.extend_from_slice(&tag);

        format::write_metadata(&base_path, &record)?;
        debug!(vault = %base_path.display(), cipher = cipher.name(), "vault initialized");
        Ok(())
    }

    /// Open the vault at `path` with a passphrase.
    ///
    /// In authenticated mode the TOTP token is presented to the key
    /// server, which releases the wrapped key; under NOAUTH the
    /// passphrase key is the data key.  The header HMAC is verified
    /// under the recovered data key before the handle is returned, so
    /// a successful open proves the metadata authenticates.
    pub fn open(
        path: &Path,
        settings: &Settings,
        passphrase: &str,
        totp: Option<&str>,
    ) -> Result<Vault> {
        let base_path = vault_dir(path)?;
        let mmap = format::read_metadata(&base_path)?;
        let view = MetadataView::parse(&mmap)?;

        let (mut crypto, uid, flags) = open_header(&view)?;
        crypto.set_passphrase_key(passphrase, view.kdf_params())?;

        let mut server_url = None;
        if flags & FLAG_NOAUTH == 0 {
            let url = settings.server_url().ok_or(RvaultError::NoServerUrl)?;
            let totp = totp.ok_or_else(|| {
                RvaultError::BadArgument("a TOTP token is required to open this vault".into())
            })?;

            let wrapped = server::fetch(&url, &uid, totp)?;
            // An AEAD unwrap failure means the passphrase key is wrong;
            // report it exactly like a tampered header.
            let data_key = crypto
                .unwrap_key(&wrapped)
                .map_err(|_| RvaultError::VerificationFailed)?;
            crypto.set_key(&data_key)?;
            server_url = Some(url);
        }

        let computed = hmac_sha3_256(crypto.get_key()?, view.hmac_data())?;
        if !tags_match(view.hmac(), &computed) {
            return Err(RvaultError::VerificationFailed);
        }
        drop(mmap);

        debug!(vault = %base_path.display(), "vault opened");
        Ok(Vault {
            base_path,
            uid,
            flags,
            crypto,
            server_url,
            files: HashMap::new(),
            next_file_id: 1,
        })
    }

    /// Open the vault for recovery: the blob supplies both the
    /// metadata record and the effective data key, bypassing the
    /// passphrase and the key server.
    ///
    /// The blob is trusted input, so the header HMAC is not
    /// re-verified.  A recovered vault must not be used to create a
    /// new server registration.
    pub fn open_by_recovery(path: &Path, blob: &RecoveryBlob) -> Result<Vault> {
        let base_path = vault_dir(path)?;
        let view = MetadataView::parse(blob.metadata())?;

        let (mut crypto, uid, flags) = open_header(&view)?;
        crypto.set_key(blob.ekey())?;

        debug!(vault = %base_path.display(), "vault opened from recovery blob");
        Ok(Vault {
            base_path,
            uid,
            flags,
            crypto,
            server_url: None,
            files: HashMap::new(),
            next_file_id: 1,
        })
    }

    /// Close the vault, destroying the in-memory keys and every open
    /// file object.  Consuming the handle makes a second close
    /// impossible; dropping an open vault has the same effect.
    pub fn close(mut self) {
        self.files.clear();
        debug!(vault = %self.base_path.display(), "vault closed");
    }

    // ------------------------------------------------------------------
    // File objects
    // ------------------------------------------------------------------

    /// Open a file object by logical path and return its handle.
    ///
    /// The path must resolve under the vault key; the file itself need
    /// not exist yet (a subsequent write creates it).
    pub fn file_open(&mut self, logical: &str) -> Result<FileId> {
        let path = vpath::resolve_path(&self.base_path, &self.crypto, logical)?;
        if path == self.base_path {
            return Err(RvaultError::BadArgument(format!(
                "`{logical}` does not name a file"
            )));
        }
        let id = FileId(self.next_file_id);
        self.next_file_id += 1;
        self.files.insert(
            id,
            FileObj {
                logical: logical.to_string(),
                path,
            },
        );
        Ok(id)
    }

    /// Authenticate and decrypt the whole file object.
    ///
    /// The caller owns the returned buffer; its contents are destroyed
    /// when it is dropped.
    pub fn file_read(&self, id: FileId) -> Result<SecureBuffer> {
        let fobj = self.file(id)?;
        let image = fileobj::read_image(&fobj.path)?;
        fileobj::unseal(&self.crypto, &image)
    }

    /// Seal `plaintext` and write the file object durably (temp file,
    /// fsync, rename, fsync of the parent directory).
    pub fn file_write(&self, id: FileId, plaintext: &[u8]) -> Result<()> {
        let fobj = self.file(id)?;
        let image = fileobj::seal(&self.crypto, plaintext)?;
        fileobj::write_image(&fobj.path, &image)?;
        debug!(name = fobj.logical.as_str(), bytes = plaintext.len(), "file object written");
        Ok(())
    }

    /// Close a file object, removing it from the vault's registry.
    pub fn file_close(&mut self, id: FileId) -> Result<()> {
        self.files
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| RvaultError::BadArgument("stale file handle".into()))
    }

    /// Convenience: open, read and close in one call.
    pub fn read_file(&mut self, logical: &str) -> Result<SecureBuffer> {
        let id = self.file_open(logical)?;
        let result = self.file_read(id);
        let _ = self.file_close(id);
        result
    }

    /// Convenience: open, write and close in one call.
    pub fn write_file(&mut self, logical: &str, plaintext: &[u8]) -> Result<()> {
        let id = self.file_open(logical)?;
        let result = self.file_write(id, plaintext);
        let _ = self.file_close(id);
        result
    }

    /// Create a vault subdirectory at the given logical path.
    pub fn make_dir(&self, logical: &str) -> Result<()> {
        let path = vpath::resolve_path(&self.base_path, &self.crypto, logical)?;
        if path == self.base_path {
            return Err(RvaultError::BadArgument(format!(
                "`{logical}` does not name a directory entry"
            )));
        }
        fs::create_dir(&path)?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Enumeration
    // ------------------------------------------------------------------

    /// Enumerate a vault directory, invoking `callback` with each
    /// logical name.  `.` and `..` are passed through unchanged;
    /// dot-files (the metadata file included) are hidden; stored names
    /// that do not resolve under this vault's key are skipped.
    pub fn iter_dir<F: FnMut(&str)>(&self, logical: &str, mut callback: F) -> Result<()> {
        let dir = vpath::resolve_path(&self.base_path, &self.crypto, logical)?;

        callback(".");
        callback("..");

        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let stored = entry.file_name();
            let Some(stored) = stored.to_str() else {
                warn!("skipping non-UTF-8 directory entry");
                continue;
            };
            if stored.starts_with('.') {
                continue;
            }
            match vpath::resolve_stored_name(&self.crypto, stored) {
                Ok(name) => callback(&name),
                Err(_) => {
                    warn!(stored, "skipping unresolvable entry");
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recovery export
    // ------------------------------------------------------------------

    /// Capture the on-disk metadata and the live data key as a
    /// recovery blob, so the vault can later be opened without the
    /// passphrase or the key server.
    pub fn export_recovery(&self) -> Result<RecoveryBlob> {
        let metadata = fs::read(format::metadata_path(&self.base_path))?;
        Ok(RecoveryBlob::new(metadata, self.crypto.get_key()?))
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Canonical absolute path of the vault directory.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// The vault's UUID.
    pub fn uid(&self) -> Uuid {
        self.uid
    }

    /// The cipher this vault was initialized with.
    pub fn cipher(&self) -> Cipher {
        self.crypto.cipher()
    }

    /// Whether the vault was initialized without server authentication.
    pub fn is_noauth(&self) -> bool {
        self.flags & FLAG_NOAUTH != 0
    }

    /// The key server this handle authenticated against, if any.
    pub fn server_url(&self) -> Option<&str> {
        self.server_url.as_deref()
    }

    /// Number of currently open file objects.
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn file(&self, id: FileId) -> Result<&FileObj> {
        self.files
            .get(&id)
            .ok_or_else(|| RvaultError::BadArgument("stale file handle".into()))
    }
}

/// Normalize the vault location and check that it is a directory.
fn vault_dir(path: &Path) -> Result<PathBuf> {
    let canonical = fs::canonicalize(path)
        .map_err(|_| RvaultError::BadArgument(format!("location `{}` not found", path.display())))?;
    if !canonical.is_dir() {
        return Err(RvaultError::BadArgument(format!(
            "path `{}` is not a directory",
            canonical.display()
        )));
    }
    Ok(canonical)
}

/// Parse a UID string (hyphenated or plain hex UUID) into its
/// 16-byte form.
fn parse_uid(uid_hex: &str) -> Result<Uuid> {
    Uuid::parse_str(uid_hex).map_err(|_| {
        RvaultError::BadArgument(
            "invalid user ID (UID); it must be a UUID in hex representation".into(),
        )
    })
}

/// Build the crypto state from a validated header without installing a
/// data key.  Shared between the normal and the recovery open paths.
fn open_header(view: &MetadataView<'_>) -> Result<(CryptoState, Uuid, u8)> {
    let mut crypto = CryptoState::new(view.cipher());
    crypto.set_iv(view.iv())?;
    let uid = Uuid::from_bytes(view.uid());
    Ok((crypto, uid, view.flags()))
}
