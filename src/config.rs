// ⚙️ Engine Configuration - Layered settings via figment
//
// Precedence (highest wins):
// 1. Environment variables (`RECEIPT_*`, `__` separates nested sections)
// 2. `receipt-calc.toml` in the working directory (or an explicit path)
// 3. Built-in defaults

use crate::error::ConfigError;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default config file looked up in the working directory.
pub const CONFIG_FILE: &str = "receipt-calc.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "RECEIPT_";

const fn default_operational_expense() -> f64 {
    1_300_000.0
}

const fn default_category_row() -> i64 {
    3
}

const fn default_debounce_ms() -> u64 {
    500
}

fn default_expense_type() -> String {
    "expense".to_string()
}

fn default_sip_wall_items() -> Vec<String> {
    vec![
        "СИП панели 163 мм высота 2,8м нарощенные пр-ва HotWell.kz".to_string(),
        "СИП панели 163 мм высота 2,5м пр-ва HotWell.kz".to_string(),
    ]
}

fn default_ceiling_item() -> String {
    "Пенополистирол Толщ 150мм (Для Утепления пот. 2-го эт)".to_string()
}

fn default_database_path() -> PathBuf {
    PathBuf::from("receipt-calc.db")
}

// ============================================================================
// COLLECTION NAMES
// ============================================================================

/// Names of the store collections the engine reads from and writes to.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Collections {
    pub clients: String,
    pub categories: String,
    pub transactions: String,
    pub sip_walls_estimates: String,
    pub roof_estimates: String,
    pub estimates: String,
    pub receipt_calculations: String,
}

impl Default for Collections {
    fn default() -> Self {
        Self {
            clients: "clients".to_string(),
            categories: "categories".to_string(),
            transactions: "transactions".to_string(),
            sip_walls_estimates: "sipWallsEstimates".to_string(),
            roof_estimates: "roofEstimates".to_string(),
            estimates: "estimates".to_string(),
            receipt_calculations: "receiptCalculations".to_string(),
        }
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Fixed operational baseline; not sourced from the store.
    #[serde(default = "default_operational_expense")]
    pub operational_expense: f64,

    /// Discriminant (`row`) a classification record must carry to match.
    #[serde(default = "default_category_row")]
    pub category_row: i64,

    /// Transaction `type` tag that contributes to the general expense.
    #[serde(default = "default_expense_type")]
    pub expense_type: String,

    /// Line items summed into `sipWalls`.
    #[serde(default = "default_sip_wall_items")]
    pub sip_wall_items: Vec<String>,

    /// Line item copied into `ceilingInsulation`.
    #[serde(default = "default_ceiling_item")]
    pub ceiling_item: String,

    /// Write-back coalescing window in milliseconds.
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,

    /// SQLite file used by the binary.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub collections: Collections,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operational_expense: default_operational_expense(),
            category_row: default_category_row(),
            expense_type: default_expense_type(),
            sip_wall_items: default_sip_wall_items(),
            ceiling_item: default_ceiling_item(),
            debounce_ms: default_debounce_ms(),
            database_path: default_database_path(),
            collections: Collections::default(),
        }
    }
}

impl EngineConfig {
    /// Load from defaults, `receipt-calc.toml` (if present) and `RECEIPT_*` env vars.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    /// Same as [`EngineConfig::load`] with an explicit TOML path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = Self::figment(path).extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Build the provider chain. Missing files are skipped.
    pub fn figment(path: &Path) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if path.exists() {
            figment = figment.merge(Toml::file(path));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Debounce window as a chrono duration.
    pub fn debounce(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.debounce_ms).unwrap_or(i64::MAX))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.operational_expense.is_finite() {
            return Err(ConfigError::InvalidValue {
                field: "operational_expense".to_string(),
                reason: "must be a finite number".to_string(),
            });
        }
        if self.expense_type.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "expense_type".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.operational_expense, 1_300_000.0);
        assert_eq!(config.category_row, 3);
        assert_eq!(config.expense_type, "expense");
        assert_eq!(config.sip_wall_items.len(), 2);
        assert_eq!(config.debounce_ms, 500);
        assert_eq!(config.collections.sip_walls_estimates, "sipWallsEstimates");
    }

    #[test]
    fn test_toml_and_env_layering() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(
                "custom.toml",
                r#"
                    operational_expense = 900000.0
                    debounce_ms = 250

                    [collections]
                    clients = "customers"
                "#,
            )?;
            jail.set_env("RECEIPT_DEBOUNCE_MS", "100");
            jail.set_env("RECEIPT_COLLECTIONS__CATEGORIES", "tags");

            let config = EngineConfig::load_from(Path::new("custom.toml"))
                .map_err(|e| figment::Error::from(e.to_string()))?;

            assert_eq!(config.operational_expense, 900_000.0);
            assert_eq!(config.debounce_ms, 100);
            assert_eq!(config.collections.clients, "customers");
            assert_eq!(config.collections.categories, "tags");
            // Untouched fields keep their defaults
            assert_eq!(config.collections.transactions, "transactions");
            assert_eq!(config.category_row, 3);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        figment::Jail::expect_with(|_jail| {
            let config = EngineConfig::load_from(Path::new("does-not-exist.toml"))
                .map_err(|e| figment::Error::from(e.to_string()))?;
            assert_eq!(config, EngineConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_rejects_empty_expense_type() {
        figment::Jail::expect_with(|jail| {
            jail.create_file(CONFIG_FILE, r#"expense_type = "   ""#)?;
            let result = EngineConfig::load_from(Path::new(CONFIG_FILE));
            assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
            Ok(())
        });
    }
}
