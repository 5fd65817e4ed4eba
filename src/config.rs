//! Configuration System
//!
//! Handles loading compiler options and aggregate definitions from TOML files
//! and environment variables.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::ddl::DdlEmitter;
use crate::registry::Registry;
use crate::rollup::{
    AggregateDefinition, ChainBuilder, CustomRule, Granularity, GranularitySequence,
    RefreshPolicy, RollupError, RuleTable,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub compiler: CompilerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default, rename = "aggregate")]
    pub aggregates: Vec<AggregateConfig>,
}

/// Rollup compiler configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CompilerConfig {
    /// Granularities used by aggregates that do not list their own
    #[serde(default = "default_granularities")]
    pub granularities: Vec<String>,

    /// Populate views when they are created
    #[serde(default)]
    pub with_data: bool,

    /// Fail on expressions that match no rollup rule
    #[serde(default)]
    pub strict: bool,

    /// Disable real-time aggregation on created views
    #[serde(default)]
    pub materialized_only: bool,

    /// Extra rollup rules, applied after the built-in ones
    #[serde(default)]
    pub rules: Vec<CustomRule>,
}

fn default_granularities() -> Vec<String> {
    GranularitySequence::default()
        .iter()
        .map(|g| g.to_string())
        .collect()
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            granularities: default_granularities(),
            with_data: false,
            strict: false,
            materialized_only: false,
            rules: Vec::new(),
        }
    }
}

/// One aggregate definition
#[derive(Debug, Clone, Deserialize)]
pub struct AggregateConfig {
    pub name: String,

    /// Raw relation (hypertable) to aggregate
    pub relation: String,

    #[serde(default = "default_time_column")]
    pub time_column: String,

    /// Select items, e.g. `"count(*) as total"`
    pub select: Vec<String>,

    #[serde(default)]
    pub group_by: Vec<String>,

    pub filter: Option<String>,

    /// Overrides `compiler.granularities`
    pub granularities: Option<Vec<String>>,

    /// Refresh policies keyed by granularity name
    #[serde(default)]
    pub refresh_policy: BTreeMap<String, RefreshPolicy>,
}

fn default_time_column() -> String {
    "created_at".to_string()
}

impl AggregateConfig {
    /// Build the definition described by this entry
    pub fn to_definition(&self) -> Result<AggregateDefinition, RollupError> {
        let mut builder =
            AggregateDefinition::builder(&self.name, &self.relation, &self.time_column);

        for item in &self.select {
            builder = builder.select(item);
        }
        for column in &self.group_by {
            builder = builder.group_by(column);
        }
        if let Some(filter) = &self.filter {
            builder = builder.filter(filter);
        }
        for (granularity, policy) in &self.refresh_policy {
            builder = builder.refresh_policy(granularity.parse()?, policy.clone());
        }

        builder.build()
    }

    /// Granularities of this aggregate, falling back to the compiler default
    pub fn granularities(&self, compiler: &CompilerConfig) -> Result<Vec<Granularity>, RollupError> {
        let names = self.granularities.as_ref().unwrap_or(&compiler.granularities);
        Ok(GranularitySequence::parse(names)?.as_slice().to_vec())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("cascade").join("config.toml")),
            Some(PathBuf::from("/etc/cascade/config.toml")),
            Some(PathBuf::from("./cascade.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    /// Apply environment variable overrides to an existing config
    fn apply_env_overrides(&mut self) {
        if let Ok(with_data) = std::env::var("CASCADE_WITH_DATA") {
            if let Ok(v) = with_data.parse() {
                self.compiler.with_data = v;
            }
        }
        if let Ok(strict) = std::env::var("CASCADE_STRICT") {
            if let Ok(v) = strict.parse() {
                self.compiler.strict = v;
            }
        }

        if let Ok(level) = std::env::var("CASCADE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("CASCADE_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    /// Build a registry with every configured aggregate registered
    pub fn registry(&self) -> Result<Registry, ConfigError> {
        let rules = RuleTable::with_rules(self.compiler.rules.iter().cloned())?;
        let builder = ChainBuilder::new(rules).strict(self.compiler.strict);
        let emitter = DdlEmitter::new()
            .with_data(self.compiler.with_data)
            .materialized_only(self.compiler.materialized_only);

        let mut registry = Registry::new(builder, emitter);
        for aggregate in &self.aggregates {
            let granularities = aggregate.granularities(&self.compiler)?;
            registry
                .register(aggregate.to_definition()?, &granularities)
                .map_err(|e| ConfigError::Aggregate {
                    name: aggregate.name.clone(),
                    error: e,
                })?;
        }

        Ok(registry)
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },

    #[error("Invalid aggregate '{name}': {error}")]
    Aggregate { name: String, error: RollupError },

    #[error(transparent)]
    Rollup(#[from] RollupError),
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Cascade Configuration
#
# Environment variables override these settings:
# - CASCADE_WITH_DATA
# - CASCADE_STRICT
# - CASCADE_LOG_LEVEL
# - CASCADE_LOG_FORMAT

[compiler]
# Granularities for aggregates that do not list their own, finest first
granularities = ["minute", "hour", "day", "month"]

# Populate views when they are created (WITH DATA)
with_data = false

# Fail when an expression matches no rollup rule instead of warning
strict = false

# Disable real-time aggregation on created views
materialized_only = false

# Extra rollup rules. {alias} is the finer view's column, {0}, {1}, ...
# are the arguments of the original call.
# [[compiler.rules]]
# function = "hll"
# template = "hll_union_agg({alias})"

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"

[[aggregate]]
name = "downloads"
relation = "downloads"
time_column = "ts"
select = ["gem_name", "count(*) as total"]
group_by = ["gem_name"]
# filter = "version NOT LIKE '%.pre%'"

[aggregate.refresh_policy.minute]
start_offset = "10 minutes"
end_offset = "1 minute"
schedule_interval = "1 minute"

[aggregate.refresh_policy.hour]
start_offset = "4 hours"
end_offset = "1 hour"
schedule_interval = "1 hour"

[aggregate.refresh_policy.day]
start_offset = "3 days"
end_offset = "1 day"
schedule_interval = "1 day"
"#
    .to_string()
}
