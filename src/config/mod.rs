/// Configuration management for the automation core
///
/// Handles server configuration, database connection, and engine tuning knobs.

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Workflow runtime and rule engine behaviour
    pub engine: EngineConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server bind address (e.g., "0.0.0.0")
    pub host: String,
    /// Server port number
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection URL (default: "sqlite://data/automation.db")
    pub url: String,
}

/// How the rule engine treats several matching rules for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RuleMatchMode {
    /// Every matching rule runs
    #[default]
    FanOut,
    /// Evaluation stops after the first rule whose conditions match
    FirstMatch,
}

impl RuleMatchMode {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fan_out" | "fanout" => Some(Self::FanOut),
            "first_match" | "firstmatch" => Some(Self::FirstMatch),
            _ => None,
        }
    }
}

/// Engine tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum hops an event chain may take through rules before it is dropped
    pub max_cascade_depth: u32,
    /// Fan-out (default) or first-match rule evaluation
    pub rule_match_mode: RuleMatchMode,
    /// Reject definitions where two transitions share a (state, event) pair
    pub strict_transitions: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_cascade_depth: 8,
            rule_match_mode: RuleMatchMode::FanOut,
            strict_transitions: false,
        }
    }
}

impl EngineConfig {
    /// Engine settings from AUTOMATION_* environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_cascade_depth: std::env::var("AUTOMATION_MAX_CASCADE_DEPTH")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_cascade_depth),
            rule_match_mode: std::env::var("AUTOMATION_RULE_MATCH_MODE")
                .ok()
                .and_then(|v| RuleMatchMode::parse(&v))
                .unwrap_or(defaults.rule_match_mode),
            strict_transitions: std::env::var("AUTOMATION_STRICT_TRANSITIONS")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(defaults.strict_transitions),
        }
    }
}

impl Default for Config {
    /// Default configuration with ENV_VAR support for k8s/container deployment
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: std::env::var("AUTOMATION_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("AUTOMATION_PORT")
                    .unwrap_or_else(|_| "3004".to_string())
                    .parse()
                    .unwrap_or(3004),
            },
            database: DatabaseConfig {
                url: std::env::var("AUTOMATION_DATABASE_URL")
                    .unwrap_or_else(|_| "sqlite://data/automation.db".to_string()),
            },
            engine: EngineConfig::from_env(),
        }
    }
}
