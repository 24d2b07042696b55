//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - quarrydb.toml (default configuration)
//! - quarrydb.local.toml (git-ignored local overrides)
//! - Environment variables (QUARRYDB_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # quarrydb.toml
//! [aggregate]
//! group_concat_max_len = 4096
//! spill_dir = "/var/lib/quarrydb/spill"
//!
//! [optimizer]
//! multi_range_opt_limit = 100
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUARRYDB_AGGREGATE__GROUP_CONCAT_MAX_LEN=8192
//! QUARRYDB_OPTIMIZER__MULTI_RANGE_OPT_LIMIT=50
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(default)]
    pub aggregate: AggregateConfig,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Aggregation engine tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// Maximum byte length of a GROUP_CONCAT result
    #[serde(default = "default_group_concat_max_len")]
    pub group_concat_max_len: usize,

    /// Directory for list-file spill storage (None = system temp dir)
    #[serde(default)]
    pub spill_dir: Option<PathBuf>,

    /// In-memory sort buffer budget, in pages
    #[serde(default = "default_sort_buffer_pages")]
    pub sort_buffer_pages: usize,
}

fn default_group_concat_max_len() -> usize {
    1024
}

fn default_sort_buffer_pages() -> usize {
    16
}

impl Default for AggregateConfig {
    fn default() -> Self {
        AggregateConfig {
            group_concat_max_len: 1024,
            spill_dir: None,
            sort_buffer_pages: 16,
        }
    }
}

/// Plan translation tunables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Largest constant LIMIT the multi-range optimization will accept
    #[serde(default = "default_multi_range_opt_limit")]
    pub multi_range_opt_limit: u64,

    /// Dump translated plans at debug level
    #[serde(default)]
    pub plan_dump: bool,
}

fn default_multi_range_opt_limit() -> u64 {
    100
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig {
            multi_range_opt_limit: 100,
            plan_dump: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format options
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output
    #[default]
    Plain,
    /// Structured JSON output
    Json,
}

impl EngineConfig {
    /// Load configuration from files and environment.
    ///
    /// Precedence (highest wins): environment variables, then
    /// `quarrydb.local.toml`, then `quarrydb.toml`, then built-in
    /// defaults.
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("quarrydb.toml"))
            .merge(Toml::file("quarrydb.local.toml"))
            .merge(Env::prefixed("QUARRYDB_").split("__"))
            .extract()
    }

    /// Load from an explicit config file plus environment overrides.
    pub fn load_from(path: &std::path::Path) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUARRYDB_").split("__"))
            .extract()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.aggregate.group_concat_max_len, 1024);
        assert_eq!(config.optimizer.multi_range_opt_limit, 100);
        assert!(config.aggregate.spill_dir.is_none());
        assert_eq!(config.logging.format, LogFormat::Plain);
    }

    #[test]
    fn test_extract_empty_figment_uses_defaults() {
        let config: EngineConfig = Figment::new().extract().unwrap();
        assert_eq!(config.aggregate.group_concat_max_len, 1024);
        assert!(!config.optimizer.plan_dump);
    }

    #[test]
    fn test_toml_overrides() {
        let config: EngineConfig = Figment::new()
            .merge(figment::providers::Serialized::defaults(EngineConfig::default()))
            .merge(Toml::string(
                r#"
                [aggregate]
                group_concat_max_len = 4096

                [optimizer]
                multi_range_opt_limit = 50
                "#,
            ))
            .extract()
            .unwrap();
        assert_eq!(config.aggregate.group_concat_max_len, 4096);
        assert_eq!(config.optimizer.multi_range_opt_limit, 50);
        assert_eq!(config.aggregate.sort_buffer_pages, 16);
    }
}
