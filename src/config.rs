use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::domain::{BusinessCalendar, Cents, CommissionPolicy};

/// Runtime settings of the ledger. Every field has a default, so an empty
/// (or missing) config file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Flat commission charged on a card's first top-up.
    pub commission_cents: Cents,
    /// Daily top-up limit given to new cards unless one is passed explicitly.
    pub default_topup_limit_cents: Option<Cents>,
    /// Offset of the business calendar from UTC.
    pub utc_offset_hours: i32,
    /// Days without activity after which an active card shows as not spinning.
    pub idle_days: i64,
    pub default_currency: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            commission_cents: 1500,
            default_topup_limit_cents: None,
            utc_offset_hours: 3,
            idle_days: 3,
            default_currency: "USD".to_string(),
        }
    }
}

impl LedgerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.commission_cents < 0 {
            bail!("commission_cents must not be negative");
        }
        if let Some(limit) = self.default_topup_limit_cents {
            if limit <= 0 {
                bail!("default_topup_limit_cents must be positive");
            }
        }
        if self.idle_days < 1 {
            bail!("idle_days must be at least 1");
        }
        if !is_currency_code(&self.default_currency) {
            bail!("default_currency must be a three-letter code");
        }
        self.calendar()?;
        Ok(())
    }

    pub fn calendar(&self) -> Result<BusinessCalendar> {
        BusinessCalendar::from_offset_hours(self.utc_offset_hours)
            .with_context(|| format!("utc_offset_hours out of range: {}", self.utc_offset_hours))
    }

    pub fn commission_policy(&self) -> CommissionPolicy {
        CommissionPolicy {
            flat_fee: self.commission_cents,
        }
    }
}

pub(crate) fn is_currency_code(code: &str) -> bool {
    code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase())
}
