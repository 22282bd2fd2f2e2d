use async_trait::async_trait;
use base64::Engine as _;
use chrono::{DateTime, NaiveDateTime, Utc};
use deadpool_postgres::{Config, Object, Pool, Runtime};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_postgres::{types::ToSql, NoTls, Row as PgRow};

use crate::adapters::adapter_trait::{
    format_timestamp, resolve_request, with_timeout, AdapterInitConfig, Cell, CommandPlan, EngineAdapter,
};
use crate::adapters::sql::{build_statement, ParamList, SqlDialect, SqlStatement};
use crate::persistence::catalog::{ColumnDef, ColumnKind, IndexDef, TableDef};
use crate::persistence::command::SymbolicCommand;
use crate::utils::{
    error::{AdapterError, GateResult},
    types::{CrudOperation, CrudOutcome, CrudRequest, Document, EngineKind},
};

const TARGET: &str = "postgres";

/// PostgreSQL rendering of the catalog and CRUD surface
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn quote(&self, identifier: &str) -> String {
        format!("\"{}\"", identifier)
    }

    fn placeholder(&self, position: usize) -> String {
        format!("${}", position)
    }

    fn column_type(&self, _table: &TableDef, column: &ColumnDef) -> String {
        match column.kind {
            ColumnKind::Serial => "BIGSERIAL",
            ColumnKind::Text => "TEXT",
            ColumnKind::BigInt => "BIGINT",
            ColumnKind::Boolean => "BOOLEAN",
            ColumnKind::Json => "JSONB",
            ColumnKind::Timestamp => "TIMESTAMPTZ",
        }
        .to_string()
    }

    fn create_schema(&self, schema: &str) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", self.quote(schema))
    }

    fn create_table(&self, table: &TableDef) -> String {
        format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.qualified(table),
            self.table_body(table)
        )
    }

    fn create_index(&self, table: &TableDef, index: &IndexDef) -> String {
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
            if index.unique { "UNIQUE " } else { "" },
            self.quote(index.name),
            self.qualified(table),
            self.column_list(index.columns)
        )
    }

    fn select(&self, columns: &str, from: &str, filter: &str, order: &str, limit: Option<u64>) -> String {
        let mut sql = format!("SELECT {} FROM {}{}", columns, from, filter);
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(order);
        }
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        sql
    }

    fn upsert(
        &self,
        table: &TableDef,
        key: &[(&'static str, Cell)],
        data: &[(&'static str, Cell)],
        params: &mut ParamList,
    ) -> String {
        let key_names: Vec<&str> = key.iter().map(|(name, _)| *name).collect();
        let mut names = key_names.clone();
        names.extend(data.iter().map(|(name, _)| *name));

        let values: Vec<String> = key
            .iter()
            .chain(data.iter())
            .map(|(_, cell)| self.placeholder(params.push(cell.clone())))
            .collect();

        let action = if data.is_empty() {
            "DO NOTHING".to_string()
        } else {
            let assignments: Vec<String> = data
                .iter()
                .map(|(name, _)| format!("{} = EXCLUDED.{}", self.quote(name), self.quote(name)))
                .collect();
            format!("DO UPDATE SET {}", assignments.join(", "))
        };

        format!(
            "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
            self.qualified(table),
            self.column_list(&names),
            values.join(", "),
            self.column_list(&key_names),
            action
        )
    }
}

static NULL_TEXT: Option<String> = None;
static NULL_INT: Option<i64> = None;
static NULL_BOOL: Option<bool> = None;
static NULL_JSON: Option<Value> = None;
static NULL_TIMESTAMP: Option<DateTime<Utc>> = None;

/// Bind a cell with the Rust type tokio-postgres expects for its column
fn bind(cell: &Cell) -> &(dyn ToSql + Sync) {
    match cell {
        Cell::Null(kind) => match kind {
            ColumnKind::Serial | ColumnKind::BigInt => &NULL_INT,
            ColumnKind::Text => &NULL_TEXT,
            ColumnKind::Boolean => &NULL_BOOL,
            ColumnKind::Json => &NULL_JSON,
            ColumnKind::Timestamp => &NULL_TIMESTAMP,
        },
        Cell::Text(value) => value,
        Cell::Int(value) => value,
        Cell::Bool(value) => value,
        Cell::Json(value) => value,
        Cell::Timestamp(value) => value,
    }
}

/// PostgreSQL adapter using tokio-postgres with connection pooling
#[derive(Debug)]
pub struct PostgresAdapter {
    pool: Option<Pool>,
    connected: AtomicBool,
    timeout_seconds: u64,
    dialect: PostgresDialect,
}

impl PostgresAdapter {
    /// Create a new PostgreSQL adapter
    pub fn new() -> Self {
        Self {
            pool: None,
            connected: AtomicBool::new(false),
            timeout_seconds: 30,
            dialect: PostgresDialect,
        }
    }

    pub fn dialect(&self) -> &PostgresDialect {
        &self.dialect
    }

    fn pool(&self, target: &str) -> GateResult<&Pool> {
        match &self.pool {
            Some(pool) if self.is_connected() => Ok(pool),
            _ => Err(AdapterError::NotConnected {
                target: target.to_string(),
            }
            .into()),
        }
    }

    async fn checkout(&self, target: &str) -> GateResult<Object> {
        self.pool(target)?.get().await.map_err(|e| {
            AdapterError::ConnectionFailed {
                target: target.to_string(),
                message: format!("Failed to get connection from pool: {}", e),
            }
            .into()
        })
    }

    /// Convert PostgreSQL row to a document keyed by column name
    fn convert_pg_row(&self, pg_row: &PgRow, target: &str) -> GateResult<Document> {
        let mut document = Document::new();
        for (index, column) in pg_row.columns().iter().enumerate() {
            document.insert(column.name().to_string(), self.convert_pg_value(pg_row, index, target)?);
        }
        Ok(document)
    }

    /// Convert PostgreSQL value to JSON based on the column type OID
    fn convert_pg_value(&self, row: &PgRow, index: usize, target: &str) -> GateResult<Value> {
        let type_oid = row.columns()[index].type_().oid();
        let failed = |e: tokio_postgres::Error| AdapterError::query_failed(target, format!("Failed to read column {}: {}", index, e));

        let value = match type_oid {
            // TEXT, VARCHAR, CHAR, NAME
            25 | 1043 | 1042 | 19 => row.try_get::<_, Option<String>>(index).map_err(failed)?.map(Value::String),
            20 => row.try_get::<_, Option<i64>>(index).map_err(failed)?.map(|v| json!(v)),
            23 => row.try_get::<_, Option<i32>>(index).map_err(failed)?.map(|v| json!(v)),
            21 => row.try_get::<_, Option<i16>>(index).map_err(failed)?.map(|v| json!(v)),
            700 => row.try_get::<_, Option<f32>>(index).map_err(failed)?.map(|v| json!(v)),
            701 => row.try_get::<_, Option<f64>>(index).map_err(failed)?.map(|v| json!(v)),
            16 => row.try_get::<_, Option<bool>>(index).map_err(failed)?.map(Value::Bool),
            // JSON, JSONB
            114 | 3802 => row.try_get::<_, Option<Value>>(index).map_err(failed)?,
            1184 => row
                .try_get::<_, Option<DateTime<Utc>>>(index)
                .map_err(failed)?
                .map(|v| Value::String(format_timestamp(&v))),
            1114 => row
                .try_get::<_, Option<NaiveDateTime>>(index)
                .map_err(failed)?
                .map(|v| Value::String(format_timestamp(&v.and_utc()))),
            // BYTEA
            17 => row
                .try_get::<_, Option<Vec<u8>>>(index)
                .map_err(failed)?
                .map(|v| Value::String(base64::engine::general_purpose::STANDARD.encode(v))),
            _ => row.try_get::<_, Option<String>>(index).map_err(failed)?.map(Value::String),
        };
        Ok(value.unwrap_or(Value::Null))
    }

    async fn run_statement(&self, statement: SqlStatement, operation: CrudOperation, target: &str) -> GateResult<CrudOutcome> {
        let client = self.checkout(target).await?;
        let params: Vec<&(dyn ToSql + Sync)> = statement.params.iter().map(bind).collect();

        if operation == CrudOperation::Read {
            let pg_rows = client
                .query(statement.sql.as_str(), &params)
                .await
                .map_err(|e| map_pg_error(target, e))?;
            let rows = pg_rows
                .iter()
                .map(|row| self.convert_pg_row(row, target))
                .collect::<GateResult<Vec<_>>>()?;
            Ok(CrudOutcome::Rows(rows))
        } else {
            let affected = client
                .execute(statement.sql.as_str(), &params)
                .await
                .map_err(|e| map_pg_error(target, e))?;
            Ok(CrudOutcome::Affected(affected))
        }
    }

    async fn run_plan(&self, plan: &CommandPlan) -> GateResult<()> {
        let target = plan.command.name();
        let mut client = self.checkout(target).await?;

        // An unfinished transaction rolls back when dropped, including when a
        // timeout cancels this future, so the connection returns to the pool clean
        let transaction = client.transaction().await.map_err(|e| map_pg_error(target, e))?;
        for statement in &plan.statements {
            transaction
                .batch_execute(statement)
                .await
                .map_err(|e| map_pg_error(target, e))?;
        }
        transaction.commit().await.map_err(|e| map_pg_error(target, e))?;
        Ok(())
    }
}

impl Default for PostgresAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Integrity-constraint SQLSTATEs (class 23) become constraint violations
fn map_pg_error(target: &str, error: tokio_postgres::Error) -> AdapterError {
    let is_constraint = error
        .code()
        .map(|state| state.code().starts_with("23"))
        .unwrap_or(false);
    if is_constraint {
        AdapterError::ConstraintViolation {
            target: target.to_string(),
            message: error.to_string(),
        }
    } else {
        AdapterError::query_failed(target, error)
    }
}

#[async_trait]
impl EngineAdapter for PostgresAdapter {
    async fn connect(&mut self, config: AdapterInitConfig) -> GateResult<()> {
        let port = config
            .param_or("port", "5432")
            .parse::<u16>()
            .map_err(|e| AdapterError::ConnectionFailed {
                target: TARGET.to_string(),
                message: format!("Invalid port: {}", e),
            })?;
        let max_size = config.max_connections.unwrap_or(10) as usize;
        self.timeout_seconds = config.timeout_seconds.unwrap_or(30);

        let mut pg_config = Config::new();
        pg_config.host = Some(config.param_or("host", "localhost"));
        pg_config.port = Some(port);
        pg_config.user = Some(config.param_or("user", "postgres"));
        pg_config.password = Some(config.param_or("password", ""));
        pg_config.dbname = Some(config.param_or("dbname", "postgres"));
        pg_config.pool = Some(deadpool_postgres::PoolConfig::new(max_size));

        let pool = pg_config
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| AdapterError::ConnectionFailed {
                target: TARGET.to_string(),
                message: format!("Failed to create pool: {}", e),
            })?;

        // Test the connection
        with_timeout(TARGET, self.timeout_seconds, async {
            pool.get().await.map(|_| ()).map_err(|e| {
                AdapterError::ConnectionFailed {
                    target: TARGET.to_string(),
                    message: format!("Failed to get connection: {}", e),
                }
                .into()
            })
        })
        .await?;

        tracing::info!(engine = TARGET, max_connections = max_size, "Connected");
        self.pool = Some(pool);
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> GateResult<()> {
        if let Some(pool) = &self.pool {
            pool.close();
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
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
        let plan = self.plan_command(command);
        with_timeout(command.name(), self.timeout_seconds, self.run_plan(&plan)).await?;
        tracing::debug!(engine = TARGET, command = %command, statements = plan.statements.len(), "Command executed");
        Ok(plan)
    }

    async fn execute_crud(&self, request: &CrudRequest) -> GateResult<CrudOutcome> {
        let table = resolve_request(request)?;
        let statement = build_statement(&self.dialect, request, table)?;
        self.pool(&request.table)?;
        with_timeout(
            &request.table,
            self.timeout_seconds,
            self.run_statement(statement, request.operation, &request.table),
        )
        .await
    }
}
