use std::env;
use std::fmt;
use std::time::Duration;

/// How a first sighting of a query is written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CreateStrategy {
    /// Check-then-create with a blind write. Two simultaneous first sightings
    /// of one key both create and the last one wins.
    #[default]
    AcceptRace,
    /// Insert-if-absent; the loser of a simultaneous create updates instead
    ConditionalCreate,
}

impl CreateStrategy {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "accept_race" | "race" => Some(CreateStrategy::AcceptRace),
            "conditional_create" | "conditional" => Some(CreateStrategy::ConditionalCreate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    KnowledgeBase(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => {
                write!(f, "invalid value for {}: '{}'", var, value)
            }
            ConfigError::KnowledgeBase(msg) => write!(f, "knowledge base: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Service configuration, built once at startup and handed to the ledger
#[derive(Debug, Clone)]
pub struct Config {
    pub owner: String,
    pub environment: String,
    pub region: String,
    pub tag_key: String,
    pub table_name: String,
    pub faq_path: String,
    pub update_ledger: bool,
    pub port: u16,
    pub db_path: String,
    pub store_timeout: Duration,
    pub create_strategy: CreateStrategy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            owner: "helpdesk".to_string(),
            environment: "Test".to_string(),
            region: "us-east-1".to_string(),
            tag_key: "helpdesk-bot".to_string(),
            table_name: "helpdesk_queries".to_string(),
            faq_path: "./data/faq.json".to_string(),
            update_ledger: true,
            port: 9103,
            db_path: "./helpdesk_ledger.db".to_string(),
            store_timeout: Duration::from_millis(2000),
            create_strategy: CreateStrategy::AcceptRace,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let table_name = lookup("HELPDESK_TABLE_NAME").unwrap_or(defaults.table_name);
        if !is_valid_table_name(&table_name) {
            return Err(ConfigError::Invalid {
                var: "HELPDESK_TABLE_NAME",
                value: table_name,
            });
        }

        let update_ledger = match lookup("HELPDESK_UPDATE_LEDGER") {
            Some(v) => parse_bool(&v).ok_or(ConfigError::Invalid {
                var: "HELPDESK_UPDATE_LEDGER",
                value: v,
            })?,
            None => defaults.update_ledger,
        };

        let port = match lookup("HELPDESK_PORT") {
            Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
                var: "HELPDESK_PORT",
                value: v,
            })?,
            None => defaults.port,
        };

        let store_timeout = match lookup("HELPDESK_STORE_TIMEOUT_MS") {
            Some(v) => match v.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "HELPDESK_STORE_TIMEOUT_MS",
                        value: v,
                    });
                }
            },
            None => defaults.store_timeout,
        };

        let create_strategy = match lookup("HELPDESK_CREATE_STRATEGY") {
            Some(v) => CreateStrategy::from_str(&v).ok_or(ConfigError::Invalid {
                var: "HELPDESK_CREATE_STRATEGY",
                value: v,
            })?,
            None => defaults.create_strategy,
        };

        Ok(Self {
            owner: lookup("HELPDESK_OWNER").unwrap_or(defaults.owner),
            environment: lookup("HELPDESK_ENVIRONMENT").unwrap_or(defaults.environment),
            region: lookup("HELPDESK_REGION").unwrap_or(defaults.region),
            tag_key: lookup("HELPDESK_TAG_KEY").unwrap_or(defaults.tag_key),
            table_name,
            faq_path: lookup("HELPDESK_FAQ_PATH").unwrap_or(defaults.faq_path),
            update_ledger,
            port,
            db_path: lookup("HELPDESK_DB_PATH").unwrap_or(defaults.db_path),
            store_timeout,
            create_strategy,
        })
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// The table name is spliced into SQL, so only plain identifiers pass.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
