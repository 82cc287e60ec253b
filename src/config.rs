//! Vault configuration.
//!
//! Every field has a default, so an absent or partial `vault-config.json`
//! is fine.

use chrono::FixedOffset;
use serde::Deserialize;
use std::path::Path;
use std::{fs, io};

use crate::error::ConfigError;
use crate::stores::DEFAULT_STORAGE_KEY;

/// File name looked up inside the data directory.
pub const CONFIG_FILE_NAME: &str = "vault-config.json";

/// Indian Standard Time, +05:30.
const IST_OFFSET_MINUTES: i32 = 330;

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    /// Logical key the vault blob is stored under.
    pub storage_key: String,
    pub export: ExportConfig,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            export: ExportConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExportConfig {
    /// Worksheet name in the workbook export.
    pub sheet_name: String,
    /// Default export file name, without extension.
    pub file_stem: String,
    /// Offset from UTC used to render "Last Updated", in minutes.
    pub utc_offset_minutes: i32,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            sheet_name: "Student Data".to_string(),
            file_stem: "student-vault-data".to_string(),
            utc_offset_minutes: IST_OFFSET_MINUTES,
        }
    }
}

impl ExportConfig {
    /// The display offset for "Last Updated".
    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "utc_offset_minutes {} is out of range",
                self.utc_offset_minutes
            ))
        })
    }

    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{extension}", self.file_stem)
    }
}

impl VaultConfig {
    /// Parses and validates a config file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: VaultConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `<data_dir>/vault-config.json`, or the defaults if it does not exist.
    pub fn load_from_dir<P: AsRef<Path>>(data_dir: P) -> Result<Self, ConfigError> {
        match Self::load(data_dir.as_ref().join(CONFIG_FILE_NAME)) {
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            other => other,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage_key.is_empty()
            || !self
                .storage_key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigError::Invalid(format!(
                "storage_key {:?} must be non-empty and use only letters, digits, '-' or '_'",
                self.storage_key
            )));
        }
        self.export.offset()?;
        if self.export.file_stem.is_empty() {
            return Err(ConfigError::Invalid("file_stem must not be empty".to_string()));
        }
        Ok(())
    }
}
