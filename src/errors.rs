use std::path::PathBuf;
use thiserror::Error;

/// All errors that the vault core can raise to callers.
#[derive(Debug, Error)]
pub enum RvaultError {
    // --- Argument / usage errors ---
    #[error("Invalid argument: {0}")]
    BadArgument(String),

    #[error("No server URL specified — pass one or set RVAULT_SERVER")]
    NoServerUrl,

    // --- Crypto errors ---
    #[error("Crypto operation failed: {0}")]
    Crypto(String),

    /// Wrong passphrase and tampered metadata are deliberately reported
    /// with the same message.
    #[error("Verification failed — invalid passphrase or corrupted vault")]
    VerificationFailed,

    // --- Vault errors ---
    #[error("Vault metadata corrupted: {0}")]
    CorruptVault(String),

    #[error("Vault already exists at {0}")]
    AlreadyExists(PathBuf),

    #[error("Incompatible vault version {0} — vault may have been created by a newer release")]
    UnsupportedVersion(u8),

    #[error("Invalid or unsupported cipher `{0}`")]
    UnsupportedCipher(String),

    // --- Server errors ---
    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Network error: {0}")]
    Network(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience type alias for vault results.
pub type Result<T> = std::result::Result<T, RvaultError>;
