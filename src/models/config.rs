use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

pub const CONFIG_PATH_ENV: &str = "INFRAWATCH_CONFIG";
const DEFAULT_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub backend: BackendConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub display: DisplayConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Layers `config.toml` (or the file named by `INFRAWATCH_CONFIG`) under
    /// `INFRAWATCH__SECTION__KEY` environment variables. Missing keys keep
    /// their defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from(&path)
    }

    pub fn load_from(path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("INFRAWATCH")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub static_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5001,
            static_dir: "static".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
    /// Refresh access tokens this many seconds before they expire.
    pub refresh_skew_secs: i64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api".to_string(),
            timeout_secs: 30,
            user_agent: format!("InfraWatch-Console/{}", env!("CARGO_PKG_VERSION")),
            refresh_skew_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Seconds a cached response is served without revalidation.
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { ttl_secs: 15 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub timeout_secs: i64,
    pub secure_cookie: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "infrawatch_session".to_string(),
            timeout_secs: 8 * 3600,
            secure_cookie: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub page_size: usize,
    pub map_tile_url: String,
    /// Length of the default report window.
    pub report_days: i64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            map_tile_url: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            report_days: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: String,
    pub file_prefix: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: "logs".to_string(),
            file_prefix: "infrawatch.log".to_string(),
            json: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.server.port, 5001);
        assert_eq!(cfg.display.page_size, 20);
        assert!(cfg.session.secure_cookie);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let cfg = AppConfig::load_from("definitely-not-here").unwrap();
        assert_eq!(cfg.cache.ttl_secs, 15);
    }

    #[test]
    fn test_partial_file_overrides() {
        let dir = std::env::temp_dir().join(format!("infrawatch-cfg-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("console.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "[backend]\nbase_url = \"https://api.example.com\"\n[display]\npage_size = 50").unwrap();

        let cfg = AppConfig::load_from(path.to_str().unwrap()).unwrap();
        assert_eq!(cfg.backend.base_url, "https://api.example.com");
        assert_eq!(cfg.backend.timeout_secs, 30);
        assert_eq!(cfg.display.page_size, 50);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_toml_dump_round_trips() {
        let text = AppConfig::default().to_toml().unwrap();
        let parsed: AppConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.session.cookie_name, "infrawatch_session");
    }
}
