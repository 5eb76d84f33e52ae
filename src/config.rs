use crate::cart::TaxSettings;
use crate::error::{PosError, Result};
use crate::inventory::MAX_EXPIRY_WINDOW_DAYS;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "config.json";
const TAX_SETTINGS_KEY: &str = "tax_settings";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database_file: String,
    pub tax: TaxSettings,
    pub token_refresh_minutes: u64,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub low_stock_threshold: i64,
    pub expiry_warning_days: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_file: "pharmacy.db".to_string(),
            tax: TaxSettings::default(),
            token_refresh_minutes: 15,
            access_token_ttl_minutes: 60,
            refresh_token_ttl_days: 7,
            low_stock_threshold: 10,
            expiry_warning_days: 90,
        }
    }
}

impl AppConfig {
    /// Loads `config.json` from the app data directory, falling back to
    /// defaults when the file is absent.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            info!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)?;
        let config: AppConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_EXPIRY_WINDOW_DAYS).contains(&self.expiry_warning_days) {
            return Err(PosError::validation(format!(
                "expiry_warning_days must be between 0 and {}",
                MAX_EXPIRY_WINDOW_DAYS
            )));
        }
        self.tax.validate()
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(dir.join(CONFIG_FILE), raw)?;
        Ok(())
    }

    /// Tax settings stored through the console override the file.
    pub fn effective_tax(&self, conn: &Connection) -> Result<TaxSettings> {
        let stored: Option<String> = conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                [TAX_SETTINGS_KEY],
                |row| row.get(0),
            )
            .optional()?;

        match stored {
            Some(raw) => match serde_json::from_str(&raw) {
                Ok(tax) => Ok(tax),
                Err(e) => {
                    warn!(error = %e, "Ignoring malformed stored tax settings");
                    Ok(self.tax.clone())
                }
            },
            None => Ok(self.tax.clone()),
        }
    }
}

pub fn save_tax_settings(conn: &Connection, tax: &TaxSettings) -> Result<()> {
    tax.validate()?;
    let raw = serde_json::to_string(tax)?;
    conn.execute(
        "INSERT INTO settings (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        rusqlite::params![TAX_SETTINGS_KEY, raw],
    )?;
    Ok(())
}
