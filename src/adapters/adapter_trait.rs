use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use crate::persistence::catalog::{self, ColumnDef, ColumnKind, TableDef};
use crate::persistence::command::SymbolicCommand;
use crate::utils::{
    config::EngineConfig,
    error::{AdapterError, GateError, GateResult},
    types::{CrudOperation, CrudOutcome, CrudRequest, EngineKind},
};

/// Configuration for adapter initialization
#[derive(Debug, Clone)]
pub struct AdapterInitConfig {
    pub connection_params: HashMap<String, String>,
    pub timeout_seconds: Option<u64>,
    pub max_connections: Option<u32>,
}

impl AdapterInitConfig {
    /// Create a new adapter configuration
    pub fn new() -> Self {
        Self {
            connection_params: HashMap::new(),
            timeout_seconds: Some(30),
            max_connections: Some(10),
        }
    }

    /// Add a connection parameter
    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.connection_params.insert(key.to_string(), value.to_string());
        self
    }

    /// Set timeout in seconds
    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = Some(seconds);
        self
    }

    /// Set maximum connections
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = Some(max);
        self
    }

    pub fn param_or(&self, key: &str, default: &str) -> String {
        self.connection_params
            .get(key)
            .cloned()
            .unwrap_or_else(|| default.to_string())
    }
}

impl Default for AdapterInitConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&EngineConfig> for AdapterInitConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            connection_params: config.parameters.clone(),
            timeout_seconds: Some(config.timeout_seconds),
            max_connections: Some(config.max_connections),
        }
    }
}

/// Native rendering of one symbolic command. Building a plan performs no I/O.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandPlan {
    pub command: SymbolicCommand,
    /// Native structure names the command creates or touches
    pub structures: Vec<String>,
    /// Engine-native statements, in execution order
    pub statements: Vec<String>,
}

impl CommandPlan {
    pub fn to_json(&self, engine: EngineKind) -> Value {
        json!({
            "command": self.command.name(),
            "engine": engine.as_str(),
            "structures": self.structures,
        })
    }
}

/// Storage engine adapter: symbolic command dispatch plus a generic CRUD surface
#[async_trait]
pub trait EngineAdapter: Send + Sync {
    /// Establish connection to the engine. Called once at startup, before the adapter is shared.
    async fn connect(&mut self, config: AdapterInitConfig) -> GateResult<()>;

    /// Release engine resources
    async fn disconnect(&self) -> GateResult<()>;

    fn engine(&self) -> EngineKind;

    fn is_connected(&self) -> bool;

    /// Native plan for a command
    fn plan_command(&self, command: SymbolicCommand) -> CommandPlan;

    /// Run a command's plan against the engine
    async fn execute_command(&self, command: SymbolicCommand) -> GateResult<CommandPlan>;

    /// Run a pre-authorized CRUD request
    async fn execute_crud(&self, request: &CrudRequest) -> GateResult<CrudOutcome>;

    /// Commands with a non-empty native plan
    fn supported_commands(&self) -> Vec<SymbolicCommand> {
        SymbolicCommand::ALL
            .iter()
            .copied()
            .filter(|c| !self.plan_command(*c).statements.is_empty())
            .collect()
    }

    /// Every native structure any command declares
    fn declared_structures(&self) -> BTreeSet<String> {
        SymbolicCommand::ALL
            .iter()
            .flat_map(|c| self.plan_command(*c).structures)
            .collect()
    }
}

/// Build an unconnected adapter for `kind`
pub fn create_adapter(kind: EngineKind) -> Box<dyn EngineAdapter> {
    use crate::adapters::{DocumentAdapter, PostgresAdapter, SqlServerAdapter};
    match kind {
        EngineKind::Postgres => Box::new(PostgresAdapter::new()),
        EngineKind::SqlServer => Box::new(SqlServerAdapter::new()),
        EngineKind::Document => Box::new(DocumentAdapter::new()),
    }
}

/// Bound a native call by `seconds`, reporting expiry against `target`
pub async fn with_timeout<T, F>(target: &str, seconds: u64, future: F) -> GateResult<T>
where
    F: Future<Output = GateResult<T>>,
{
    match tokio::time::timeout(Duration::from_secs(seconds), future).await {
        Ok(result) => result,
        Err(_) => Err(AdapterError::Timeout {
            target: target.to_string(),
            seconds,
        }
        .into()),
    }
}

/// Plain SQL identifier: letters, digits and underscores, not starting with a digit
pub fn is_valid_identifier(name: &str) -> bool {
    static IDENTIFIER: OnceLock<Option<Regex>> = OnceLock::new();
    IDENTIFIER
        .get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").ok())
        .as_ref()
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

/// Map a request onto the catalog, rejecting tables or columns with no native counterpart
pub fn resolve_request(request: &CrudRequest) -> GateResult<&'static TableDef> {
    let table = catalog::find_table(&request.table)
        .ok_or_else(|| AdapterError::unknown_structure(request.table.as_str()))?;

    for column in request.referenced_columns() {
        if !is_valid_identifier(column) || table.column(column).is_none() {
            return Err(AdapterError::unknown_structure(format!("{}.{}", request.table, column)).into());
        }
    }
    Ok(table)
}

/// Columns a read returns: the projection, or the whole table when none was given
pub fn projection<'a>(request: &'a CrudRequest, table: &'static TableDef) -> Vec<&'a str> {
    if request.columns.is_empty() {
        table.column_names()
    } else {
        request.columns.iter().map(String::as_str).collect()
    }
}

/// Reject shapes no engine can run safely
pub fn check_request_shape(request: &CrudRequest, table: &TableDef) -> GateResult<()> {
    match request.operation {
        CrudOperation::Update if request.data.is_empty() => {
            Err(GateError::validation("update requires at least one data column"))
        }
        CrudOperation::Update | CrudOperation::Delete if request.filter.is_empty() => Err(
            GateError::validation(format!("{} requires a filter", request.operation.as_str())),
        ),
        CrudOperation::Upsert => {
            let mut filter_columns: Vec<&str> = request.filter.keys().map(String::as_str).collect();
            filter_columns.sort_unstable();
            let matches_key = table.unique_keys().iter().any(|key| {
                let mut key: Vec<&str> = key.to_vec();
                key.sort_unstable();
                key == filter_columns
            });
            if matches_key {
                Ok(())
            } else {
                Err(GateError::validation(format!(
                    "upsert filter on '{}' must name exactly one unique key",
                    request.table
                )))
            }
        }
        _ => Ok(()),
    }
}

/// A payload value coerced to a column's storage class
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Null(ColumnKind),
    Text(String),
    Int(i64),
    Bool(bool),
    Json(Value),
    Timestamp(DateTime<Utc>),
}

impl Cell {
    /// Coerce a JSON value for `column`; malformed values are validation errors
    pub fn from_json(column: &ColumnDef, value: &Value) -> GateResult<Cell> {
        let invalid = || {
            GateError::validation(format!(
                "value {} is not valid for column '{}' ({:?})",
                value, column.name, column.kind
            ))
        };

        if value.is_null() {
            return Ok(Cell::Null(column.kind));
        }

        match column.kind {
            ColumnKind::Text => match value {
                Value::String(s) => Ok(Cell::Text(s.clone())),
                Value::Number(n) => Ok(Cell::Text(n.to_string())),
                Value::Bool(b) => Ok(Cell::Text(b.to_string())),
                _ => Err(invalid()),
            },
            ColumnKind::Serial | ColumnKind::BigInt => match value {
                Value::Number(n) => n.as_i64().map(Cell::Int).ok_or_else(invalid),
                Value::String(s) => s.trim().parse().map(Cell::Int).map_err(|_| invalid()),
                _ => Err(invalid()),
            },
            ColumnKind::Boolean => match value {
                Value::Bool(b) => Ok(Cell::Bool(*b)),
                Value::String(s) if s == "true" => Ok(Cell::Bool(true)),
                Value::String(s) if s == "false" => Ok(Cell::Bool(false)),
                _ => Err(invalid()),
            },
            ColumnKind::Json => Ok(Cell::Json(value.clone())),
            ColumnKind::Timestamp => match value {
                Value::String(s) => DateTime::parse_from_rfc3339(s)
                    .map(|dt| Cell::Timestamp(dt.with_timezone(&Utc)))
                    .map_err(|_| invalid()),
                _ => Err(invalid()),
            },
        }
    }

    /// Canonical JSON form, as stored by the document engine and returned by reads
    pub fn to_json(&self) -> Value {
        match self {
            Cell::Null(_) => Value::Null,
            Cell::Text(s) => Value::String(s.clone()),
            Cell::Int(i) => json!(i),
            Cell::Bool(b) => Value::Bool(*b),
            Cell::Json(v) => v.clone(),
            Cell::Timestamp(dt) => Value::String(format_timestamp(dt)),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Cell::Null(_))
    }
}

/// RFC 3339 with microsecond precision, which every engine can store losslessly
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, false)
}

/// Coerce every entry of `values` against `table`, keeping the map's order
pub fn cells_for(table: &TableDef, values: &crate::utils::types::Document) -> GateResult<Vec<(&'static str, Cell)>> {
    values
        .iter()
        .map(|(name, value)| {
            let column = table
                .column(name)
                .ok_or_else(|| AdapterError::unknown_structure(format!("{}.{}", table.qualified_name(), name)))?;
            Ok((column.name, Cell::from_json(column, value)?))
        })
        .collect()
}
