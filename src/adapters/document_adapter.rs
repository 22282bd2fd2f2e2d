use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::adapters::adapter_trait::{
    cells_for, check_request_shape, projection, resolve_request, with_timeout, AdapterInitConfig, CommandPlan,
    EngineAdapter,
};
use crate::adapters::document_store::{compare_values, CollectionIndex, DocumentStore, COUNTERS_COLLECTION};
use crate::persistence::catalog::{ColumnKind, TableDef};
use crate::persistence::command::SymbolicCommand;
use crate::utils::{
    error::{AdapterError, GateResult},
    types::{CrudOperation, CrudOutcome, CrudRequest, Document, EngineKind, OrderDirection},
};

const TARGET: &str = "document";

/// One native step of a command plan
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentOp {
    CreateCollection(String),
    CreateIndex { collection: String, index: CollectionIndex },
}

impl fmt::Display for DocumentOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DocumentOp::CreateCollection(name) => write!(f, "createCollection({})", name),
            DocumentOp::CreateIndex { collection, index } => write!(
                f,
                "createIndex({}, {}, [{}]{})",
                collection,
                index.name,
                index.fields.join(", "),
                if index.unique { ", unique" } else { "" }
            ),
        }
    }
}

/// Document engine adapter over the embedded [`DocumentStore`]
#[derive(Debug)]
pub struct DocumentAdapter {
    store: Arc<DocumentStore>,
    connected: AtomicBool,
    timeout_seconds: u64,
}

impl DocumentAdapter {
    pub fn new() -> Self {
        Self::with_store(Arc::new(DocumentStore::new()))
    }

    /// Adapter over an existing store
    pub fn with_store(store: Arc<DocumentStore>) -> Self {
        Self {
            store,
            connected: AtomicBool::new(false),
            timeout_seconds: 30,
        }
    }

    pub fn store(&self) -> &Arc<DocumentStore> {
        &self.store
    }

    /// Native steps for `command`, counters first when any table needs generated ids
    pub fn plan_ops(&self, command: SymbolicCommand) -> Vec<DocumentOp> {
        let tables = command.tables();
        let mut ops = Vec::new();
        if tables.iter().any(|t| t.serial_column().is_some()) {
            ops.push(DocumentOp::CreateCollection(COUNTERS_COLLECTION.to_string()));
            ops.push(DocumentOp::CreateIndex {
                collection: COUNTERS_COLLECTION.to_string(),
                index: CollectionIndex::new("counters_name_key", &["name"], true),
            });
        }
        for table in tables {
            let collection = table.collection_name();
            ops.push(DocumentOp::CreateCollection(collection.clone()));
            ops.push(DocumentOp::CreateIndex {
                collection: collection.clone(),
                index: CollectionIndex::new(&format!("{}_pkey", collection), table.primary_key, true),
            });
            for index in table.indexes {
                ops.push(DocumentOp::CreateIndex {
                    collection: collection.clone(),
                    index: CollectionIndex::new(index.name, index.columns, index.unique),
                });
            }
        }
        ops
    }

    fn ensure_connected(&self, target: &str) -> GateResult<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(AdapterError::NotConnected {
                target: target.to_string(),
            }
            .into())
        }
    }

    /// Coerce `values` to canonical JSON for `table`
    fn normalize(table: &TableDef, values: &Document) -> GateResult<Document> {
        Ok(cells_for(table, values)?
            .into_iter()
            .map(|(name, cell)| (name.to_string(), cell.to_json()))
            .collect())
    }

    /// NOT NULL columns may not be absent or null after a write
    fn check_required(table: &TableDef, document: &Document, full: bool) -> GateResult<()> {
        for column in table.columns.iter().filter(|c| !c.nullable && c.kind != ColumnKind::Serial) {
            let value = document.get(column.name);
            let missing = match value {
                Some(v) => v.is_null(),
                None => full,
            };
            if missing {
                return Err(AdapterError::ConstraintViolation {
                    target: format!("{}.{}", table.qualified_name(), column.name),
                    message: format!("column '{}' cannot be null", column.name),
                }
                .into());
            }
        }
        Ok(())
    }

    /// Draw the next id for the serial column unless the caller supplied one
    fn assign_serial(&self, table: &TableDef, collection: &str, document: &mut Document) -> GateResult<()> {
        if let Some(serial) = table.serial_column() {
            if document.get(serial.name).map_or(true, Value::is_null) {
                let next = self.store.next_sequence(collection)?;
                document.insert(serial.name.to_string(), Value::from(next));
            }
        }
        Ok(())
    }

    fn insert(&self, table: &TableDef, collection: &str, mut document: Document) -> GateResult<u64> {
        self.assign_serial(table, collection, &mut document)?;
        Self::check_required(table, &document, true)?;
        self.store.insert(collection, document)?;
        Ok(1)
    }

    fn run_crud(&self, request: &CrudRequest, table: &'static TableDef) -> GateResult<CrudOutcome> {
        let collection = table.collection_name();
        if !self.store.has_collection(&collection) {
            return Err(AdapterError::unknown_structure(collection).into());
        }
        let data = Self::normalize(table, &request.data)?;
        let filter = Self::normalize(table, &request.filter)?;

        let outcome = match request.operation {
            CrudOperation::Read => {
                let mut rows = self.store.find(&collection, &filter)?;
                if !request.order_by.is_empty() {
                    rows.sort_by(|a, b| {
                        request
                            .order_by
                            .iter()
                            .map(|o| {
                                let left = a.get(&o.column).unwrap_or(&Value::Null);
                                let right = b.get(&o.column).unwrap_or(&Value::Null);
                                match o.direction {
                                    OrderDirection::Ascending => compare_values(left, right),
                                    OrderDirection::Descending => compare_values(right, left),
                                }
                            })
                            .find(|ordering| ordering.is_ne())
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                }
                if let Some(limit) = request.limit {
                    rows.truncate(limit as usize);
                }
                let columns = projection(request, table);
                let rows = rows
                    .into_iter()
                    .map(|row| {
                        columns
                            .iter()
                            .map(|c| (c.to_string(), row.get(*c).cloned().unwrap_or(Value::Null)))
                            .collect::<Document>()
                    })
                    .collect();
                CrudOutcome::Rows(rows)
            }
            CrudOperation::Create => CrudOutcome::Affected(self.insert(table, &collection, data)?),
            CrudOperation::Update => {
                Self::check_required(table, &data, false)?;
                CrudOutcome::Affected(self.store.update(&collection, &filter, &data)?)
            }
            CrudOperation::Delete => CrudOutcome::Affected(self.store.delete(&collection, &filter)?),
            CrudOperation::Upsert => {
                let changes: Document = data
                    .into_iter()
                    .filter(|(name, _)| !filter.contains_key(name))
                    .collect();
                Self::check_required(table, &changes, false)?;
                let mut document = filter.clone();
                document.extend(changes.clone());
                // drawn outside the collection lock, so an upsert that updates still consumes an id
                self.assign_serial(table, &collection, &mut document)?;
                let affected = self.store.upsert(&collection, &filter, document, &changes, |candidate| {
                    Self::check_required(table, candidate, true)
                })?;
                CrudOutcome::Affected(affected)
            }
        };
        Ok(outcome)
    }
}

impl Default for DocumentAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EngineAdapter for DocumentAdapter {
    async fn connect(&mut self, config: AdapterInitConfig) -> GateResult<()> {
        self.timeout_seconds = config.timeout_seconds.unwrap_or(30);
        if let Some(path) = config.connection_params.get("data_path") {
            self.store = Arc::new(DocumentStore::open(Path::new(path)).await?);
        }
        tracing::info!(
            engine = TARGET,
            snapshot = ?self.store.snapshot_path(),
            collections = self.store.collection_names().len(),
            "Connected"
        );
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> GateResult<()> {
        if self.is_connected() {
            self.store.persist().await?;
        }
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn engine(&self) -> EngineKind {
        EngineKind::Document
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn plan_command(&self, command: SymbolicCommand) -> CommandPlan {
        let ops = self.plan_ops(command);
        let structures = ops
            .iter()
            .filter_map(|op| match op {
                DocumentOp::CreateCollection(name) => Some(name.clone()),
                DocumentOp::CreateIndex { .. } => None,
            })
            .collect();
        CommandPlan {
            command,
            structures,
            statements: ops.iter().map(ToString::to_string).collect(),
        }
    }

    async fn execute_command(&self, command: SymbolicCommand) -> GateResult<CommandPlan> {
        self.ensure_connected(command.name())?;
        let plan = self.plan_command(command);
        with_timeout(command.name(), self.timeout_seconds, async {
            for op in self.plan_ops(command) {
                match op {
                    DocumentOp::CreateCollection(name) => {
                        self.store.create_collection(&name);
                    }
                    DocumentOp::CreateIndex { collection, index } => {
                        self.store.create_index(&collection, index)?;
                    }
                }
            }
            self.store.persist().await
        })
        .await?;
        tracing::debug!(engine = TARGET, command = %command, "Command executed");
        Ok(plan)
    }

    async fn execute_crud(&self, request: &CrudRequest) -> GateResult<CrudOutcome> {
        let table = resolve_request(request)?;
        check_request_shape(request, table)?;
        self.ensure_connected(&request.table)?;

        let outcome = with_timeout(&request.table, self.timeout_seconds, async {
            self.run_crud(request, table)
        })
        .await?;
        if request.operation.is_write() {
            // The write is already applied; a later snapshot or disconnect picks it up
            if let Err(e) = self.store.persist().await {
                tracing::warn!(engine = TARGET, table = %request.table, error = %e, "Snapshot write failed");
            }
        }
        Ok(outcome)
    }
}
