//! Recovery blob: the parsed sections of a recovery file.
//!
//! The recovery text format itself is an external collaborator; the
//! core only consumes the in-memory section array, keyed by
//! [`RecoverySection`].  A recovery blob carries the raw metadata
//! record and the effective data key, which together open a vault
//! without the passphrase or the key server.

use crate::crypto::SecureBuffer;
use crate::errors::{Result, RvaultError};

/// Section identifiers of a parsed recovery file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySection {
    /// Raw bytes identical to the vault's metadata file.
    Metadata,
    /// Raw effective data key bytes.
    Ekey,
}

/// A complete recovery blob, ready to open a vault with.
///
/// The key section lives in a [`SecureBuffer`] and is destroyed when
/// the blob is dropped.
pub struct RecoveryBlob {
    metadata: Vec<u8>,
    ekey: SecureBuffer,
}

impl RecoveryBlob {
    /// Build a blob from its two sections.
    ///
    /// The caller keeps ownership of the inputs; key material passed
    /// in should be zeroized by the caller afterwards.
    pub fn new(metadata: Vec<u8>, ekey: &[u8]) -> Self {
        Self {
            metadata,
            ekey: SecureBuffer::from_slice(ekey),
        }
    }

    /// Build a blob from a parsed section array.  Both sections must
    /// be present exactly once.
    pub fn from_sections(sections: &[(RecoverySection, &[u8])]) -> Result<Self> {
        let mut metadata = None;
        let mut ekey = None;
        for (kind, bytes) in sections {
            let slot = match kind {
                RecoverySection::Metadata => &mut metadata,
                RecoverySection::Ekey => &mut ekey,
            };
            if slot.replace(*bytes).is_some() {
                return Err(RvaultError::BadArgument(format!(
                    "duplicate recovery section {kind:?}"
                )));
            }
        }
        match (metadata, ekey) {
            (Some(md), Some(key)) => Ok(Self::new(md.to_vec(), key)),
            _ => Err(RvaultError::BadArgument(
                "recovery blob must contain both a metadata and a key section".into(),
            )),
        }
    }

    pub(crate) fn metadata(&self) -> &[u8] {
        &self.metadata
    }

    pub(crate) fn ekey(&self) -> &[u8] {
        &self.ekey
    }
}

impl std::fmt::Debug for RecoveryBlob {
    /// Never print the key section.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "RecoveryBlob(metadata: {} bytes, ekey: {} bytes)",
            self.metadata.len(),
            self.ekey.len()
        )
    }
}
