use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure for yardflow
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct YardflowConfig {
    /// Workflow engine limits
    pub engine: EngineConfig,
    /// Database settings (optional; the memory store is used without them)
    pub database: Option<DatabaseConfig>,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Upper bound on any single engine operation. Commit runs after the
    /// deadline check, so a timeout never follows a write that was applied.
    pub operation_timeout_ms: u64,
    /// Page size used when a caller passes limit 0
    pub default_page_size: u32,
    /// Larger limits are clamped to this
    pub max_page_size: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// SQLite URL, e.g. `sqlite://.yardflow/yardflow.db`
    pub url: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Enable automatic migrations
    pub auto_migrate: bool,
    /// How long a writer waits on a locked database before giving up
    pub busy_timeout_ms: u64,
    /// Tenant (yard) this process serves
    pub tenant_id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default log level when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON log lines instead of human-readable ones
    pub json_logs: bool,
}

/// A single problem found by [`YardflowConfig::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub code: &'static str,
    pub message: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
            default_page_size: 50,
            max_page_size: 500,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://.yardflow/yardflow.db".to_string(),
            max_connections: 10,
            auto_migrate: true,
            busy_timeout_ms: 5_000,
            tenant_id: "default".to_string(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Default for YardflowConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            database: Some(DatabaseConfig::default()),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }
}

impl YardflowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (yardflow.toml in the working directory)
    /// 3. Environment variables (prefixed with YARDFLOW__)
    pub fn load() -> Result<Self> {
        Self::load_from(None::<&Path>)
    }

    /// Same as [`load`](Self::load) but reads an explicit file when given.
    pub fn load_from<P: AsRef<Path>>(path: Option<P>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        match path {
            Some(path) => {
                builder = builder.add_source(File::from(path.as_ref()).required(true));
            }
            None => {
                if Path::new("yardflow.toml").exists() {
                    builder = builder.add_source(File::with_name("yardflow"));
                }
            }
        }

        // Double underscore so field names keep their own underscores:
        // YARDFLOW__DATABASE__TENANT_ID=yard-7
        builder = builder.add_source(
            Environment::with_prefix("YARDFLOW")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let yardflow_config: YardflowConfig = config.try_deserialize()?;
        Ok(yardflow_config)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }

    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.engine.operation_timeout_ms == 0 {
            issues.push(ConfigIssue {
                code: "engine.operation_timeout_ms.zero",
                message: "operation timeout must be greater than zero".to_string(),
            });
        }
        if self.engine.default_page_size == 0 {
            issues.push(ConfigIssue {
                code: "engine.default_page_size.zero",
                message: "default page size must be greater than zero".to_string(),
            });
        }
        if self.engine.max_page_size < self.engine.default_page_size {
            issues.push(ConfigIssue {
                code: "engine.max_page_size.too_small",
                message: format!(
                    "max page size {} is below default page size {}",
                    self.engine.max_page_size, self.engine.default_page_size
                ),
            });
        }

        if let Some(database) = &self.database {
            if database.url.trim().is_empty() {
                issues.push(ConfigIssue {
                    code: "database.url.empty",
                    message: "database url must not be empty".to_string(),
                });
            }
            if database.max_connections == 0 {
                issues.push(ConfigIssue {
                    code: "database.max_connections.zero",
                    message: "database pool needs at least one connection".to_string(),
                });
            }
            if database.tenant_id.trim().is_empty() {
                issues.push(ConfigIssue {
                    code: "database.tenant_id.empty",
                    message: "tenant id must not be empty".to_string(),
                });
            }
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = YardflowConfig::default();
        assert!(config.validate().is_empty());
        assert_eq!(config.engine.operation_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn validate_reports_each_problem() {
        let mut config = YardflowConfig::default();
        config.engine.default_page_size = 100;
        config.engine.max_page_size = 10;
        if let Some(database) = config.database.as_mut() {
            database.tenant_id = "  ".to_string();
            database.max_connections = 0;
        }

        let codes: Vec<_> = config.validate().iter().map(|issue| issue.code).collect();
        assert_eq!(
            codes,
            vec![
                "engine.max_page_size.too_small",
                "database.max_connections.zero",
                "database.tenant_id.empty"
            ]
        );
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("yardflow.toml");
        std::fs::write(
            &path,
            r#"
[engine]
operation_timeout_ms = 250
default_page_size = 20
max_page_size = 100

[database]
url = "sqlite://yard.db"
max_connections = 2
auto_migrate = false
busy_timeout_ms = 1000
tenant_id = "odessa-yard"

[observability]
log_level = "debug"
json_logs = true
"#,
        )
        .unwrap();

        let config = YardflowConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.engine.operation_timeout_ms, 250);
        assert_eq!(config.engine.max_page_size, 100);
        let database = config.database.unwrap();
        assert_eq!(database.tenant_id, "odessa-yard");
        assert!(!database.auto_migrate);
        assert!(config.observability.json_logs);
    }

    #[test]
    fn save_then_load_preserves_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.toml");
        let mut config = YardflowConfig::default();
        config.engine.default_page_size = 25;
        config.save_to_file(&path).unwrap();

        let loaded = YardflowConfig::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.engine.default_page_size, 25);
    }
}
