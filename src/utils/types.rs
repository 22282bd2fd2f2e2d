use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;

/// A row or document as exchanged on the bus: column name to JSON value
pub type Document = Map<String, Value>;

/// Storage engines an adapter can target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Relational dialect A, the canonical command surface
    Postgres,
    /// Relational dialect B
    SqlServer,
    /// Document store
    Document,
}

impl EngineKind {
    pub const ALL: [EngineKind; 3] = [EngineKind::Postgres, EngineKind::SqlServer, EngineKind::Document];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Postgres => "postgres",
            EngineKind::SqlServer => "sqlserver",
            EngineKind::Document => "document",
        }
    }

    /// Whether the engine stores dotted `schema.table` structures
    pub fn is_relational(&self) -> bool {
        !matches!(self, EngineKind::Document)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Ok(EngineKind::Postgres),
            "sqlserver" | "mssql" => Ok(EngineKind::SqlServer),
            "document" | "documents" => Ok(EngineKind::Document),
            other => Err(format!("unknown engine '{}'", other)),
        }
    }
}

/// Generic row/document operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrudOperation {
    Create,
    Read,
    Update,
    Delete,
    /// Update the rows matching the filter, or insert filter + data when none match
    Upsert,
}

impl CrudOperation {
    pub const ALL: [CrudOperation; 5] = [
        CrudOperation::Create,
        CrudOperation::Read,
        CrudOperation::Update,
        CrudOperation::Delete,
        CrudOperation::Upsert,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CrudOperation::Create => "create",
            CrudOperation::Read => "read",
            CrudOperation::Update => "update",
            CrudOperation::Delete => "delete",
            CrudOperation::Upsert => "upsert",
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, CrudOperation::Read)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    #[serde(rename = "asc", alias = "ASC")]
    Ascending,
    #[serde(rename = "desc", alias = "DESC")]
    Descending,
}

impl Default for OrderDirection {
    fn default() -> Self {
        OrderDirection::Ascending
    }
}

/// One `orderBy` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderColumn {
    pub column: String,
    #[serde(default)]
    pub direction: OrderDirection,
}

/// A generic CRUD call against one logical table, after payload parsing
#[derive(Debug, Clone, PartialEq)]
pub struct CrudRequest {
    pub operation: CrudOperation,
    /// Logical `schema.table` name
    pub table: String,
    /// Values to write (create, update, upsert)
    pub data: Document,
    /// Equality predicates; a JSON null matches missing/NULL values
    pub filter: Document,
    /// Projection for reads
    pub columns: Vec<String>,
    pub order_by: Vec<OrderColumn>,
    pub limit: Option<u64>,
}

impl CrudRequest {
    /// Create a new request with no data, filter or projection
    pub fn new(operation: CrudOperation, table: &str) -> Self {
        Self {
            operation,
            table: table.to_string(),
            data: Document::new(),
            filter: Document::new(),
            columns: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn with_data(mut self, data: Document) -> Self {
        self.data = data;
        self
    }

    pub fn with_filter(mut self, filter: Document) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Every column the request touches, deduplicated, in first-seen order
    pub fn referenced_columns(&self) -> Vec<&str> {
        let mut seen: Vec<&str> = Vec::new();
        let all = self
            .data
            .keys()
            .chain(self.filter.keys())
            .chain(self.columns.iter())
            .chain(self.order_by.iter().map(|o| &o.column));
        for column in all {
            if !seen.contains(&column.as_str()) {
                seen.push(column.as_str());
            }
        }
        seen
    }
}

/// Result of a generic CRUD call
#[derive(Debug, Clone, PartialEq)]
pub enum CrudOutcome {
    Rows(Vec<Document>),
    Affected(u64),
}

impl CrudOutcome {
    /// JSON shape returned over the bus
    pub fn into_json(self) -> Value {
        match self {
            CrudOutcome::Rows(rows) => json!({ "rows": rows }),
            CrudOutcome::Affected(count) => json!({ "affected": count }),
        }
    }

    pub fn rows(&self) -> &[Document] {
        match self {
            CrudOutcome::Rows(rows) => rows,
            CrudOutcome::Affected(_) => &[],
        }
    }
}
