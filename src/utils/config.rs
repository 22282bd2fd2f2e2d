use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::persistence::whitelist::Whitelist;
use crate::utils::error::{GateError, GateResult};
use crate::utils::merge::deep_merge;
use crate::utils::types::EngineKind;

/// Main gate configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GateConfig {
    pub engine: EngineConfig,
    pub auth: AuthConfig,
    pub whitelist: WhitelistConfig,
    pub parity: ParityConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Active storage engine selection, fixed for the process lifetime
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    pub kind: EngineKind,
    pub parameters: HashMap<String, String>,
    pub timeout_seconds: u64,
    pub max_connections: u32,
}

/// Token configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_ttl_seconds: i64,
    /// Cookie the HTTP binding reads the credential from
    pub cookie_name: String,
}

/// Module → table → allowed columns
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct WhitelistConfig {
    pub modules: HashMap<String, HashMap<String, Vec<String>>>,
}

/// Names allowed to exist in only one engine family
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ParityConfig {
    pub command_exceptions: Vec<String>,
    pub structure_exceptions: Vec<String>,
}

/// HTTP binding configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            auth: AuthConfig::default(),
            whitelist: WhitelistConfig::with_builtin_modules(),
            parity: ParityConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            kind: EngineKind::Document,
            parameters: HashMap::new(),
            timeout_seconds: 30,
            max_connections: 10,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            token_ttl_seconds: 3600,
            cookie_name: "token".to_string(),
        }
    }
}

impl Default for ParityConfig {
    fn default() -> Self {
        Self {
            command_exceptions: Vec::new(),
            // id sequences the document engine keeps in place of SQL identity columns
            structure_exceptions: vec!["counters".to_string()],
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "eventgate=info".to_string(),
            json: false,
        }
    }
}

impl WhitelistConfig {
    /// Entries for the modules shipped with the gate
    pub fn with_builtin_modules() -> Self {
        let mut settings_tables = HashMap::new();
        settings_tables.insert(
            "settings.settings".to_string(),
            vec!["key".to_string(), "value".to_string(), "updated_at".to_string()],
        );

        let mut modules = HashMap::new();
        modules.insert("settings".to_string(), settings_tables);
        Self { modules }
    }
}

impl GateConfig {
    /// Load configuration: defaults, then the JSON file merged on top, then environment overrides
    pub fn load(path: Option<&Path>) -> GateResult<Self> {
        let mut merged = serde_json::to_value(GateConfig::default())
            .map_err(|e| GateError::Configuration(format!("Failed to serialize defaults: {}", e)))?;

        if let Some(path) = path {
            let content = std::fs::read_to_string(path).map_err(|e| {
                GateError::Configuration(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let file_value: serde_json::Value = serde_json::from_str(&content).map_err(|e| {
                GateError::Configuration(format!("Invalid JSON in {}: {}", path.display(), e))
            })?;
            // a file whitelist replaces the built-in one instead of extending it
            if let Some(modules) = file_value.pointer("/whitelist/modules") {
                merged["whitelist"]["modules"] = serde_json::Value::Object(Default::default());
                deep_merge(&mut merged["whitelist"]["modules"], modules);
            }
            deep_merge(&mut merged, &file_value);
        }

        let mut config: GateConfig = serde_json::from_value(merged)
            .map_err(|e| GateError::Configuration(format!("Invalid configuration: {}", e)))?;
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> GateResult<()> {
        if let Ok(secret) = std::env::var("EVENTGATE_JWT_SECRET") {
            self.auth.jwt_secret = secret;
        }
        if let Ok(engine) = std::env::var("EVENTGATE_ENGINE") {
            self.engine.kind = engine.parse().map_err(GateError::Configuration)?;
        }
        if let Ok(port) = std::env::var("EVENTGATE_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| GateError::Configuration(format!("Invalid EVENTGATE_PORT: {}", e)))?;
        }
        Ok(())
    }

    /// Reject configurations the gate cannot start with
    pub fn validate(&self) -> GateResult<()> {
        if self.auth.jwt_secret.trim().is_empty() {
            return Err(GateError::Configuration(
                "auth.jwt_secret must be set (or EVENTGATE_JWT_SECRET)".to_string(),
            ));
        }
        if self.auth.token_ttl_seconds <= 0 {
            return Err(GateError::Configuration(
                "auth.token_ttl_seconds must be positive".to_string(),
            ));
        }
        if self.engine.timeout_seconds == 0 {
            return Err(GateError::Configuration(
                "engine.timeout_seconds must be positive".to_string(),
            ));
        }
        Whitelist::from_config(&self.whitelist).validate()
    }
}
