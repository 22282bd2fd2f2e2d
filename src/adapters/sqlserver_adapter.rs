use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::adapters::adapter_trait::{
    format_timestamp, projection, resolve_request, with_timeout, AdapterInitConfig, Cell, CommandPlan,
    EngineAdapter,
};
use crate::adapters::sql::{build_statement, ParamList, SqlDialect, SqlStatement};
use crate::persistence::catalog::{ColumnDef, ColumnKind, IndexDef, TableDef};
use crate::persistence::command::SymbolicCommand;
use crate::utils::{
    error::{AdapterError, GateResult},
    types::{CrudOperation, CrudOutcome, CrudRequest, Document, EngineKind},
};

const TARGET: &str = "sqlserver";

/// Server error numbers raised for key, foreign key and NOT NULL violations
const CONSTRAINT_ERRORS: [u32; 4] = [2627, 2601, 547, 515];

/// SQL Server rendering of the catalog and CRUD surface
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerDialect;

impl SqlServerDialect {
    /// Text columns that take part in a key or index must fit the index key size limit
    fn is_indexed(table: &TableDef, column: &str) -> bool {
        table.primary_key.contains(&column) || table.indexes.iter().any(|i| i.columns.contains(&column))
    }

    fn object_name(&self, table: &TableDef) -> String {
        format!("N'{}'", self.qualified(table))
    }
}

impl SqlDialect for SqlServerDialect {
    fn quote(&self, identifier: &str) -> String {
        format!("[{}]", identifier)
    }

    fn placeholder(&self, position: usize) -> String {
        format!("@P{}", position)
    }

    fn column_type(&self, table: &TableDef, column: &ColumnDef) -> String {
        match column.kind {
            ColumnKind::Serial => "BIGINT IDENTITY(1,1)",
            ColumnKind::Text if Self::is_indexed(table, column.name) => "NVARCHAR(255)",
            ColumnKind::Text | ColumnKind::Json => "NVARCHAR(MAX)",
            ColumnKind::BigInt => "BIGINT",
            ColumnKind::Boolean => "BIT",
            ColumnKind::Timestamp => "DATETIMEOFFSET",
        }
        .to_string()
    }

    fn create_schema(&self, schema: &str) -> String {
        format!(
            "IF SCHEMA_ID(N'{}') IS NULL EXEC(N'CREATE SCHEMA {}')",
            schema,
            self.quote(schema)
        )
    }

    fn create_table(&self, table: &TableDef) -> String {
        format!(
            "IF OBJECT_ID({}, N'U') IS NULL CREATE TABLE {} ({})",
            self.object_name(table),
            self.qualified(table),
            self.table_body(table)
        )
    }

    fn create_index(&self, table: &TableDef, index: &IndexDef) -> String {
        format!(
            "IF NOT EXISTS (SELECT 1 FROM sys.indexes WHERE name = N'{}' AND object_id = OBJECT_ID({})) CREATE {}INDEX {} ON {} ({})",
            index.name,
            self.object_name(table),
            if index.unique { "UNIQUE " } else { "" },
            self.quote(index.name),
            self.qualified(table),
            self.column_list(index.columns)
        )
    }

    fn select(&self, columns: &str, from: &str, filter: &str, order: &str, limit: Option<u64>) -> String {
        let top = limit.map(|n| format!("TOP ({}) ", n)).unwrap_or_default();
        let mut sql = format!("SELECT {}{} FROM {}{}", top, columns, from, filter);
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        sql
    }

    fn select_column(&self, column: &ColumnDef) -> String {
        match column.kind {
            ColumnKind::Timestamp => format!(
                "CONVERT(NVARCHAR(40), {}, 127) AS {}",
                self.quote(column.name),
                self.quote(column.name)
            ),
            _ => self.quote(column.name),
        }
    }

    fn upsert(
        &self,
        table: &TableDef,
        key: &[(&'static str, Cell)],
        data: &[(&'static str, Cell)],
        params: &mut ParamList,
    ) -> String {
        let source: Vec<String> = key
            .iter()
            .map(|(name, cell)| {
                format!("{} AS {}", self.placeholder(params.push(cell.clone())), self.quote(name))
            })
            .collect();
        let on: Vec<String> = key
            .iter()
            .map(|(name, _)| format!("target.{} = source.{}", self.quote(name), self.quote(name)))
            .collect();
        let data_positions: Vec<(&str, String)> = data
            .iter()
            .map(|(name, cell)| (*name, self.placeholder(params.push(cell.clone()))))
            .collect();

        let mut sql = format!(
            "MERGE INTO {} WITH (HOLDLOCK) AS target USING (SELECT {}) AS source ON {}",
            self.qualified(table),
            source.join(", "),
            on.join(" AND ")
        );
        if !data_positions.is_empty() {
            let assignments: Vec<String> = data_positions
                .iter()
                .map(|(name, placeholder)| format!("target.{} = {}", self.quote(name), placeholder))
                .collect();
            sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", assignments.join(", ")));
        }

        let mut names: Vec<&str> = key.iter().map(|(name, _)| *name).collect();
        let mut values: Vec<String> = key
            .iter()
            .map(|(name, _)| format!("source.{}", self.quote(name)))
            .collect();
        for (name, placeholder) in &data_positions {
            names.push(name);
            values.push(placeholder.clone());
        }
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
            self.column_list(&names),
            values.join(", ")
        ));
        sql
    }
}

/// Owned parameter in the shape tiberius binds
#[derive(Debug, Clone, PartialEq)]
enum SqlParam {
    Text(Option<String>),
    Int(Option<i64>),
    Bit(Option<bool>),
}

impl SqlParam {
    fn as_dyn(&self) -> &dyn ToSql {
        match self {
            SqlParam::Text(value) => value,
            SqlParam::Int(value) => value,
            SqlParam::Bit(value) => value,
        }
    }
}

impl From<&Cell> for SqlParam {
    fn from(cell: &Cell) -> Self {
        match cell {
            Cell::Null(ColumnKind::Serial | ColumnKind::BigInt) => SqlParam::Int(None),
            Cell::Null(ColumnKind::Boolean) => SqlParam::Bit(None),
            Cell::Null(_) => SqlParam::Text(None),
            Cell::Text(value) => SqlParam::Text(Some(value.clone())),
            Cell::Int(value) => SqlParam::Int(Some(*value)),
            Cell::Bool(value) => SqlParam::Bit(Some(*value)),
            Cell::Json(value) => SqlParam::Text(Some(value.to_string())),
            Cell::Timestamp(value) => SqlParam::Text(Some(format_timestamp(value))),
        }
    }
}

/// Re-render a server timestamp string in canonical form, leaving unparseable text as is
fn normalize_timestamp(raw: &str) -> String {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return format_timestamp(&dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|dt| format_timestamp(&dt.and_utc()))
        .unwrap_or_else(|_| raw.to_string())
}

fn map_tiberius_error(target: &str, error: tiberius::error::Error) -> AdapterError {
    match &error {
        tiberius::error::Error::Server(token) if CONSTRAINT_ERRORS.contains(&token.code()) => {
            AdapterError::ConstraintViolation {
                target: target.to_string(),
                message: token.message().to_string(),
            }
        }
        _ => AdapterError::query_failed(target, error),
    }
}

type TdsClient = Client<Compat<TcpStream>>;

/// SQL Server adapter using tiberius over a single multiplexed connection
#[derive(Debug)]
pub struct SqlServerAdapter {
    /// Idle connection. A call takes it out and puts it back only once it
    /// completes, so a cancelled call drops its connection with it.
    client: Mutex<Option<TdsClient>>,
    config: Option<Config>,
    connected: AtomicBool,
    timeout_seconds: u64,
    dialect: SqlServerDialect,
}

impl SqlServerAdapter {
    /// Create a new SQL Server adapter
    pub fn new() -> Self {
        Self {
            client: Mutex::new(None),
            config: None,
            connected: AtomicBool::new(false),
            timeout_seconds: 30,
            dialect: SqlServerDialect,
        }
    }

    pub fn dialect(&self) -> &SqlServerDialect {
        &self.dialect
    }

    fn not_connected(target: &str) -> AdapterError {
        AdapterError::NotConnected {
            target: target.to_string(),
        }
    }

    async fn open_client(config: &Config, target: &str) -> GateResult<TdsClient> {
        let failed = |message: String| AdapterError::ConnectionFailed {
            target: target.to_string(),
            message,
        };
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| failed(format!("Failed to connect: {}", e)))?;
        tcp.set_nodelay(true).map_err(|e| failed(e.to_string()))?;
        let client = Client::connect(config.clone(), tcp.compat_write())
            .await
            .map_err(|e| failed(format!("Failed to authenticate: {}", e)))?;
        Ok(client)
    }

    /// Take the idle connection out of `slot`, reconnecting when an interrupted
    /// call dropped the previous one
    async fn checkout(&self, slot: &mut Option<TdsClient>, target: &str) -> GateResult<TdsClient> {
        if !self.is_connected() {
            return Err(Self::not_connected(target).into());
        }
        if let Some(client) = slot.take() {
            return Ok(client);
        }
        let config = self.config.as_ref().ok_or_else(|| Self::not_connected(target))?;
        tracing::info!(engine = TARGET, call = %target, "Reconnecting after an interrupted call");
        Self::open_client(config, target).await
    }

    /// Convert a tiberius row using the catalog kinds of the projected columns
    fn convert_row(&self, row: &tiberius::Row, columns: &[&ColumnDef], target: &str) -> GateResult<Document> {
        let failed = |e: tiberius::error::Error| AdapterError::query_failed(target, e);
        let mut document = Document::new();

        for (index, column) in columns.iter().enumerate() {
            let value = match column.kind {
                ColumnKind::Serial | ColumnKind::BigInt => {
                    row.try_get::<i64, usize>(index).map_err(failed)?.map(|v| json!(v))
                }
                ColumnKind::Boolean => row.try_get::<bool, usize>(index).map_err(failed)?.map(Value::Bool),
                ColumnKind::Text => row
                    .try_get::<&str, usize>(index)
                    .map_err(failed)?
                    .map(|v| Value::String(v.to_string())),
                ColumnKind::Json => row
                    .try_get::<&str, usize>(index)
                    .map_err(failed)?
                    .map(|v| serde_json::from_str(v).unwrap_or_else(|_| Value::String(v.to_string()))),
                ColumnKind::Timestamp => row
                    .try_get::<&str, usize>(index)
                    .map_err(failed)?
                    .map(|v| Value::String(normalize_timestamp(v))),
            };
            document.insert(column.name.to_string(), value.unwrap_or(Value::Null));
        }
        Ok(document)
    }

    async fn run_statement(
        &self,
        statement: SqlStatement,
        request: &CrudRequest,
        table: &'static TableDef,
    ) -> GateResult<CrudOutcome> {
        let target = request.table.as_str();
        let params: Vec<SqlParam> = statement.params.iter().map(SqlParam::from).collect();
        let bound: Vec<&dyn ToSql> = params.iter().map(SqlParam::as_dyn).collect();

        let mut slot = self.client.lock().await;
        let mut client = self.checkout(&mut slot, target).await?;
        let outcome = self.send_statement(&mut client, &statement.sql, &bound, request, table).await;
        *slot = Some(client);
        outcome
    }

    async fn send_statement(
        &self,
        client: &mut TdsClient,
        sql: &str,
        bound: &[&dyn ToSql],
        request: &CrudRequest,
        table: &'static TableDef,
    ) -> GateResult<CrudOutcome> {
        let target = request.table.as_str();
        if request.operation == CrudOperation::Read {
            let rows = client
                .query(sql, bound)
                .await
                .map_err(|e| map_tiberius_error(target, e))?
                .into_first_result()
                .await
                .map_err(|e| map_tiberius_error(target, e))?;
            let columns: Vec<&ColumnDef> = projection(request, table)
                .into_iter()
                .filter_map(|name| table.column(name))
                .collect();
            let rows = rows
                .iter()
                .map(|row| self.convert_row(row, &columns, target))
                .collect::<GateResult<Vec<_>>>()?;
            Ok(CrudOutcome::Rows(rows))
        } else {
            let result = client
                .execute(sql, bound)
                .await
                .map_err(|e| map_tiberius_error(target, e))?;
            Ok(CrudOutcome::Affected(result.total()))
        }
    }

    async fn run_plan(&self, plan: &CommandPlan) -> GateResult<()> {
        let target = plan.command.name();
        let mut slot = self.client.lock().await;
        let mut client = self.checkout(&mut slot, target).await?;
        let result = Self::apply_plan(&mut client, plan).await;
        *slot = Some(client);
        result
    }

    async fn apply_plan(client: &mut TdsClient, plan: &CommandPlan) -> GateResult<()> {
        let target = plan.command.name();
        client
            .execute("BEGIN TRANSACTION", &[])
            .await
            .map_err(|e| map_tiberius_error(target, e))?;
        for statement in &plan.statements {
            if let Err(e) = client.execute(statement.as_str(), &[]).await {
                let _ = client.execute("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION", &[]).await;
                return Err(map_tiberius_error(target, e).into());
            }
        }
        client
            .execute("COMMIT TRANSACTION", &[])
            .await
            .map_err(|e| map_tiberius_error(target, e))?;
        Ok(())
    }
}

impl Default for SqlServerAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineAdapter for SqlServerAdapter {
    async fn connect(&mut self, config: AdapterInitConfig) -> GateResult<()> {
        let required = |key: &str| {
            config.connection_params.get(key).cloned().ok_or_else(|| AdapterError::ConnectionFailed {
                target: TARGET.to_string(),
                message: format!("{} parameter is required", key),
            })
        };
        let server = required("server")?;
        let database = required("database")?;
        let username = required("username")?;
        let password = required("password")?;
        let port = config
            .param_or("port", "1433")
            .parse::<u16>()
            .map_err(|e| AdapterError::ConnectionFailed {
                target: TARGET.to_string(),
                message: format!("Invalid port: {}", e),
            })?;
        self.timeout_seconds = config.timeout_seconds.unwrap_or(30);

        let mut tiberius_config = Config::new();
        tiberius_config.host(&server);
        tiberius_config.port(port);
        tiberius_config.database(&database);
        tiberius_config.authentication(AuthMethod::sql_server(&username, &password));
        // Built without a TLS backend
        tiberius_config.encryption(EncryptionLevel::NotSupported);

        let client = with_timeout(
            TARGET,
            self.timeout_seconds,
            Self::open_client(&tiberius_config, TARGET),
        )
        .await?;

        tracing::info!(engine = TARGET, server = %server, database = %database, "Connected");
        *self.client.get_mut() = Some(client);
        self.config = Some(tiberius_config);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> GateResult<()> {
        if let Some(client) = self.client.lock().await.take() {
            if let Err(e) = client.close().await {
                tracing::warn!(engine = TARGET, error = %e, "Error while closing connection");
            }
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn engine(&self) -> EngineKind {
        EngineKind::SqlServer
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn plan_command(&self, command: SymbolicCommand) -> CommandPlan {
        let tables = command.tables();
        CommandPlan {
            command,
            structures: tables.iter().map(TableDef::qualified_name).collect(),
            statements: self.dialect.create_statements(tables),
        }
    }

    async fn execute_command(&self, command: SymbolicCommand) -> GateResult<CommandPlan> {
        if !self.is_connected() {
            return Err(Self::not_connected(command.name()).into());
        }
        let plan = self.plan_command(command);
        with_timeout(command.name(), self.timeout_seconds, self.run_plan(&plan)).await?;
        tracing::debug!(engine = TARGET, command = %command, statements = plan.statements.len(), "Command executed");
        Ok(plan)
    }

    async fn execute_crud(&self, request: &CrudRequest) -> GateResult<CrudOutcome> {
        let table = resolve_request(request)?;
        let statement = build_statement(&self.dialect, request, table)?;
        if !self.is_connected() {
            return Err(Self::not_connected(&request.table).into());
        }
        with_timeout(
            &request.table,
            self.timeout_seconds,
            self.run_statement(statement, request, table),
        )
        .await
    }
}
