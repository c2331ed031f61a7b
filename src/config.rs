use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Snafu)]
pub enum ConfigError {
    #[snafu(display("Failed to read config file: {}", source))]
    FileRead { source: std::io::Error },

    #[snafu(display("Failed to parse YAML config: {}", source))]
    YamlParse { source: serde_yaml::Error },

    #[snafu(display("Invalid table prefix: {:?}", prefix))]
    InvalidPrefix { prefix: String },
}

type Result<T, E = ConfigError> = std::result::Result<T, E>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
}

fn default_port() -> u16 {
    3306
}

impl DbConfig {
    pub fn from_connection_params(
        host: String,
        port: u16,
        database: String,
        username: String,
        password: String,
    ) -> Self {
        Self {
            host,
            port,
            database,
            username,
            password,
        }
    }

    pub fn connection_string(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

/// Named bundle of permitted optimization action types.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleFrequency {
    Daily,
    #[default]
    Weekly,
    Monthly,
}

impl ScheduleFrequency {
    pub fn interval(&self) -> Duration {
        let days = match self {
            ScheduleFrequency::Daily => 1,
            ScheduleFrequency::Weekly => 7,
            ScheduleFrequency::Monthly => 30,
        };
        Duration::from_secs(days * 86_400)
    }
}

/// Host-owned settings, passed explicitly into every entry point.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerSettings {
    pub table_prefix: String,
    pub risk_level: RiskLevel,
    pub excluded_tables: Vec<String>,
    pub auto_backup: bool,
    pub max_backups: usize,
    pub backup_dir: PathBuf,
    pub state_dir: PathBuf,
    pub schedule_frequency: ScheduleFrequency,
    pub auto_optimize: bool,
    pub notification_email: Option<String>,
    pub revisions_to_keep: u32,
    pub cache_ttl_secs: u64,
    pub history_window_days: i64,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            table_prefix: "wp_".to_string(),
            risk_level: RiskLevel::Medium,
            excluded_tables: Vec::new(),
            auto_backup: true,
            max_backups: 5,
            backup_dir: PathBuf::from("dbmedic-backups"),
            state_dir: PathBuf::from("dbmedic-state"),
            schedule_frequency: ScheduleFrequency::Weekly,
            auto_optimize: false,
            notification_email: None,
            revisions_to_keep: 3,
            cache_ttl_secs: 30 * 60,
            history_window_days: 30,
        }
    }
}

/// Core table suffixes, joined with the prefix to form real table names.
pub const CORE_TABLE_SUFFIXES: &[&str] = &[
    "posts",
    "postmeta",
    "options",
    "comments",
    "commentmeta",
    "users",
    "usermeta",
    "terms",
    "term_taxonomy",
    "term_relationships",
];

pub const BACKUP_HISTORY_SUFFIX: &str = "dbmedic_backup_history";
pub const OPTIMIZATION_HISTORY_SUFFIX: &str = "dbmedic_optimization_history";

impl OptimizerSettings {
    pub fn validate(&self) -> Result<()> {
        // An empty prefix is allowed; anything else must be identifier-safe.
        if !self.table_prefix.is_empty()
            && !crate::identifier::is_safe_identifier(&self.table_prefix)
        {
            return Err(ConfigError::InvalidPrefix {
                prefix: self.table_prefix.clone(),
            });
        }
        Ok(())
    }

    pub fn table(&self, suffix: &str) -> String {
        format!("{}{}", self.table_prefix, suffix)
    }

    pub fn core_tables(&self) -> Vec<String> {
        CORE_TABLE_SUFFIXES.iter().map(|s| self.table(s)).collect()
    }

    pub fn backup_history_table(&self) -> String {
        self.table(BACKUP_HISTORY_SUFFIX)
    }

    pub fn optimization_history_table(&self) -> String {
        self.table(OPTIMIZATION_HISTORY_SUFFIX)
    }

    /// Excluded by configuration, or one of our own record tables.
    pub fn is_excluded(&self, table: &str) -> bool {
        self.excluded_tables.iter().any(|t| t == table)
            || table == self.backup_history_table()
            || table == self.optimization_history_table()
    }

    /// Backups are mandatory at `high`; otherwise `auto_backup` decides.
    pub fn backup_required(&self, level: RiskLevel) -> bool {
        level == RiskLevel::High || self.auto_backup
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

/// On-disk configuration: one database plus the settings used against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DbConfig,
    #[serde(default)]
    pub settings: OptimizerSettings,
}

impl AppConfig {
    pub fn from_config_file(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path).context(FileReadSnafu)?;
        let config: AppConfig = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.settings.validate()?;
        Ok(config)
    }
}
