use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SpendError};
use crate::normalizer::CsvFormat;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub data_dir: String,
    #[serde(default = "default_user")]
    pub user: String,
    #[serde(default)]
    pub csv: CsvFormat,
    #[serde(default)]
    pub ai: AiSettings,
    #[serde(default)]
    pub import: ImportSettings,
    #[serde(default)]
    pub analytics: AnalyticsSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AiSettings {
    pub enabled: bool,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub max_concurrent: usize,
}

impl Default for AiSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 5,
            max_attempts: 2,
            backoff_ms: 500,
            max_concurrent: 4,
        }
    }
}

impl AiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// A batch fails when more than this fraction of its rows cannot be parsed.
    pub max_error_ratio: f64,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self { max_error_ratio: 0.5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyticsSettings {
    pub top_merchants: usize,
    pub unusual_k: f64,
    pub unusual_min_samples: usize,
    pub budget_months: u32,
    pub budget_shrinkage: f64,
}

impl Default for AnalyticsSettings {
    fn default() -> Self {
        Self {
            top_merchants: 5,
            unusual_k: 2.0,
            unusual_min_samples: 3,
            budget_months: 3,
            budget_shrinkage: 0.1,
        }
    }
}

fn default_user() -> String {
    "default".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir().to_string_lossy().to_string(),
            user: default_user(),
            csv: CsvFormat::default(),
            ai: AiSettings::default(),
            import: ImportSettings::default(),
            analytics: AnalyticsSettings::default(),
        }
    }
}

impl Settings {
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("spendtrack.db")
    }
}

fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("SPENDTRACK_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spendtrack")
}

pub fn settings_path() -> PathBuf {
    config_dir().join("settings.json")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("spendtrack")
}

pub fn load_settings() -> Settings {
    let path = settings_path();
    if !path.exists() {
        return Settings::default();
    }
    let content = std::fs::read_to_string(&path).unwrap_or_default();
    match serde_json::from_str(&content) {
        Ok(settings) => settings,
        Err(e) => {
            log::warn!("Ignoring unreadable settings file {}: {e}", path.display());
            Settings::default()
        }
    }
}

pub fn save_settings(settings: &Settings) -> Result<()> {
    std::fs::create_dir_all(config_dir())?;
    let json = serde_json::to_string_pretty(settings)
        .map_err(|e| SpendError::Settings(e.to_string()))?;
    std::fs::write(settings_path(), format!("{json}\n"))?;
    Ok(())
}

pub fn settings_file_exists() -> bool {
    settings_path().exists()
}

pub fn shellexpand_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.to_string_lossy());
        }
    }
    std::fs::canonicalize(path)
        .unwrap_or_else(|_| PathBuf::from(path))
        .to_string_lossy()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::DecimalSeparator;

    #[test]
    fn test_load_merges_with_defaults() {
        let json = r#"{"data_dir": "/tmp/test", "user": "bob", "ai": {"enabled": false}}"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.user, "bob");
        assert!(!s.ai.enabled);
        assert_eq!(s.ai.max_attempts, 2);
        assert_eq!(s.import.max_error_ratio, 0.5);
        assert_eq!(s.analytics.top_merchants, 5);
        assert_eq!(s.csv.decimal, DecimalSeparator::Dot);
    }

    #[test]
    fn test_roundtrip_keeps_csv_format() {
        let mut settings = Settings::default();
        settings.csv = CsvFormat::comma_locale();
        let json = serde_json::to_string_pretty(&settings).unwrap();
        let loaded: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded.csv.decimal, DecimalSeparator::Comma);
        assert_eq!(loaded.csv.date_formats[0], "%d/%m/%Y");
    }

    #[test]
    fn test_db_path_lives_in_data_dir() {
        let settings = Settings {
            data_dir: "/tmp/spend".to_string(),
            ..Settings::default()
        };
        assert_eq!(settings.db_path(), PathBuf::from("/tmp/spend/spendtrack.db"));
    }

    #[test]
    fn test_ai_timeout_never_zero() {
        let ai = AiSettings {
            timeout_secs: 0,
            ..AiSettings::default()
        };
        assert_eq!(ai.timeout(), Duration::from_secs(1));
    }
}
