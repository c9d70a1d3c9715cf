use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::crypto::{Cipher, KdfCost};
use crate::errors::{Result, RvaultError};

/// Environment variable supplying the key server URL when neither the
/// caller nor the config file names one.
pub const SERVER_ENV: &str = "RVAULT_SERVER";

/// Operator-level configuration, loaded from `.rvault.toml`.
///
/// Every field has a sensible default so the vault works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Key server URL.  Falls back to the `RVAULT_SERVER` environment
    /// variable when absent.
    #[serde(default)]
    pub server_url: Option<String>,

    /// Cipher used for newly initialized vaults (existing vaults keep
    /// the cipher recorded in their metadata).
    #[serde(default = "default_cipher")]
    pub cipher: String,

    /// scrypt work factor as log2(N) (default: 15).
    #[serde(default = "default_scrypt_log_n")]
    pub scrypt_log_n: u8,

    /// scrypt block size parameter (default: 8).
    #[serde(default = "default_scrypt_r")]
    pub scrypt_r: u8,

    /// scrypt parallelization parameter (default: 1).
    #[serde(default = "default_scrypt_p")]
    pub scrypt_p: u8,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_cipher() -> String {
    Cipher::PRIMARY.name().to_string()
}

fn default_scrypt_log_n() -> u8 {
    KdfCost::default().log_n
}

fn default_scrypt_r() -> u8 {
    KdfCost::default().r
}

fn default_scrypt_p() -> u8 {
    KdfCost::default().p
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: None,
            cipher: default_cipher(),
            scrypt_log_n: default_scrypt_log_n(),
            scrypt_r: default_scrypt_r(),
            scrypt_p: default_scrypt_p(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for next to the vault.
    const FILE_NAME: &'static str = ".rvault.toml";

    /// Load settings from `<dir>/.rvault.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path)?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            RvaultError::ConfigError(format!("failed to parse {}: {e}", config_path.display()))
        })?;

        Ok(settings)
    }

    /// The effective server URL: explicit setting first, then the
    /// `RVAULT_SERVER` environment variable.
    pub fn server_url(&self) -> Option<String> {
        self.server_url
            .clone()
            .or_else(|| std::env::var(SERVER_ENV).ok())
    }

    /// Resolve the configured cipher name.
    pub fn cipher(&self) -> Result<Cipher> {
        Cipher::from_name(&self.cipher)
    }

    /// Convert the scrypt settings into crypto-layer cost parameters.
    pub fn kdf_cost(&self) -> KdfCost {
        KdfCost {
            log_n: self.scrypt_log_n,
            r: self.scrypt_r,
            p: self.scrypt_p,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn default_settings_are_sensible() {
        let s = Settings::default();
        assert_eq!(s.cipher, "aes-256-gcm");
        assert_eq!(s.scrypt_log_n, 15);
        assert_eq!(s.scrypt_r, 8);
        assert_eq!(s.scrypt_p, 1);
        assert!(s.server_url.is_none());
    }

    #[test]
    fn load_returns_defaults_when_no_config_file() {
        let tmp = TempDir::new().unwrap();
        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(settings.cipher, "aes-256-gcm");
    }

    #[test]
    fn load_parses_toml_file() {
        let tmp = TempDir::new().unwrap();
        let config = r#"
server_url = "https://api.example.org"
cipher = "chacha20-poly1305"
scrypt_log_n = 16
"#;
        fs::write(tmp.path().join(".rvault.toml"), config).unwrap();

        let settings = Settings::load(tmp.path()).unwrap();
        assert_eq!(
            settings.server_url.as_deref(),
            Some("https://api.example.org")
        );
        assert_eq!(settings.cipher().unwrap(), Cipher::Chacha20Poly1305);
        assert_eq!(settings.scrypt_log_n, 16);
        // Rest should be defaults
        assert_eq!(settings.scrypt_r, 8);
    }

    #[test]
    fn load_errors_on_invalid_toml() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(".rvault.toml"), "not valid {{toml").unwrap();

        let result = Settings::load(tmp.path());
        assert!(result.is_err());
    }

    #[test]
    fn unknown_cipher_name_is_rejected() {
        let settings = Settings {
            cipher: "rot13".into(),
            ..Settings::default()
        };
        assert!(settings.cipher().is_err());
    }
}
