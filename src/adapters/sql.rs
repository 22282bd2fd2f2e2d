//! Statement rendering shared by the relational adapters.
//!
//! Every value travels as a bound parameter; identifiers come from the
//! catalog and are validated before they are quoted.

use crate::adapters::adapter_trait::{cells_for, check_request_shape, projection, Cell};
use crate::persistence::catalog::{ColumnDef, IndexDef, TableDef};
use crate::utils::{
    error::{AdapterError, GateError, GateResult},
    types::{CrudOperation, CrudRequest, OrderDirection},
};

/// SQL text plus its positional parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlStatement {
    pub sql: String,
    pub params: Vec<Cell>,
}

/// Collects parameters and hands back their 1-based positions
#[derive(Debug, Default)]
pub struct ParamList {
    cells: Vec<Cell>,
}

impl ParamList {
    pub fn push(&mut self, cell: Cell) -> usize {
        self.cells.push(cell);
        self.cells.len()
    }

    pub fn into_cells(self) -> Vec<Cell> {
        self.cells
    }
}

/// Dialect hooks; everything not listed here renders the same way on both engines
pub trait SqlDialect {
    fn quote(&self, identifier: &str) -> String;

    fn placeholder(&self, position: usize) -> String;

    fn column_type(&self, table: &TableDef, column: &ColumnDef) -> String;

    fn create_schema(&self, schema: &str) -> String;

    fn create_table(&self, table: &TableDef) -> String;

    fn create_index(&self, table: &TableDef, index: &IndexDef) -> String;

    /// Assemble a SELECT; `filter` and `order` are already rendered and may be empty
    fn select(&self, columns: &str, from: &str, filter: &str, order: &str, limit: Option<u64>) -> String;

    /// Insert-or-update keyed on `key`, which names a unique key of `table`
    fn upsert(
        &self,
        table: &TableDef,
        key: &[(&'static str, Cell)],
        data: &[(&'static str, Cell)],
        params: &mut ParamList,
    ) -> String;

    /// Expression a read uses for `column`
    fn select_column(&self, column: &ColumnDef) -> String {
        self.quote(column.name)
    }

    fn qualified(&self, table: &TableDef) -> String {
        format!("{}.{}", self.quote(table.schema), self.quote(table.name))
    }

    fn column_list(&self, columns: &[&str]) -> String {
        columns
            .iter()
            .map(|c| self.quote(c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Column definitions plus the primary key constraint, without the CREATE wrapper
    fn table_body(&self, table: &TableDef) -> String {
        let mut parts: Vec<String> = table
            .columns
            .iter()
            .map(|column| {
                format!(
                    "{} {}{}",
                    self.quote(column.name),
                    self.column_type(table, column),
                    if column.nullable { "" } else { " NOT NULL" }
                )
            })
            .collect();
        parts.push(format!("PRIMARY KEY ({})", self.column_list(table.primary_key)));
        parts.join(", ")
    }

    /// Native statements creating `tables`, schemas first
    fn create_statements(&self, tables: &[TableDef]) -> Vec<String> {
        let mut statements = Vec::new();
        let mut schemas: Vec<&str> = Vec::new();
        for table in tables {
            if !schemas.contains(&table.schema) {
                schemas.push(table.schema);
                statements.push(self.create_schema(table.schema));
            }
        }
        for table in tables {
            statements.push(self.create_table(table));
            for index in table.indexes {
                statements.push(self.create_index(table, index));
            }
        }
        statements
    }
}

/// Render a CRUD request for `dialect`
pub fn build_statement<D: SqlDialect + ?Sized>(
    dialect: &D,
    request: &CrudRequest,
    table: &'static TableDef,
) -> GateResult<SqlStatement> {
    check_request_shape(request, table)?;

    let data = cells_for(table, &request.data)?;
    let filter = cells_for(table, &request.filter)?;
    let from = dialect.qualified(table);
    let mut params = ParamList::default();

    let sql = match request.operation {
        CrudOperation::Read => {
            let columns = projection(request, table)
                .into_iter()
                .map(|name| {
                    table
                        .column(name)
                        .map(|column| dialect.select_column(column))
                        .ok_or_else(|| {
                            GateError::from(AdapterError::unknown_structure(format!(
                                "{}.{}",
                                request.table, name
                            )))
                        })
                })
                .collect::<GateResult<Vec<_>>>()?
                .join(", ");
            let filter = where_clause(dialect, &filter, &mut params);
            let order = request
                .order_by
                .iter()
                .map(|o| {
                    let direction = match o.direction {
                        OrderDirection::Ascending => "ASC",
                        OrderDirection::Descending => "DESC",
                    };
                    format!("{} {}", dialect.quote(&o.column), direction)
                })
                .collect::<Vec<_>>()
                .join(", ");
            dialect.select(&columns, &from, &filter, &order, request.limit)
        }
        CrudOperation::Create => {
            if data.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", from)
            } else {
                let names: Vec<&str> = data.iter().map(|(name, _)| *name).collect();
                let values: Vec<String> = data
                    .into_iter()
                    .map(|(_, cell)| dialect.placeholder(params.push(cell)))
                    .collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    from,
                    dialect.column_list(&names),
                    values.join(", ")
                )
            }
        }
        CrudOperation::Update => {
            let assignments: Vec<String> = data
                .into_iter()
                .map(|(name, cell)| {
                    format!("{} = {}", dialect.quote(name), dialect.placeholder(params.push(cell)))
                })
                .collect();
            let filter = where_clause(dialect, &filter, &mut params);
            format!("UPDATE {} SET {}{}", from, assignments.join(", "), filter)
        }
        CrudOperation::Delete => {
            let filter = where_clause(dialect, &filter, &mut params);
            format!("DELETE FROM {}{}", from, filter)
        }
        CrudOperation::Upsert => {
            if filter.iter().any(|(_, cell)| cell.is_null()) {
                return Err(GateError::validation("upsert key columns cannot be null"));
            }
            let data: Vec<(&'static str, Cell)> = data
                .into_iter()
                .filter(|(name, _)| !filter.iter().any(|(key, _)| key == name))
                .collect();
            dialect.upsert(table, &filter, &data, &mut params)
        }
    };

    Ok(SqlStatement {
        sql,
        params: params.into_cells(),
    })
}

/// ` WHERE a = $1 AND b IS NULL`, or empty when there is no filter
fn where_clause<D: SqlDialect + ?Sized>(
    dialect: &D,
    filter: &[(&'static str, Cell)],
    params: &mut ParamList,
) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let predicates: Vec<String> = filter
        .iter()
        .map(|(name, cell)| {
            if cell.is_null() {
                format!("{} IS NULL", dialect.quote(name))
            } else {
                format!(
                    "{} = {}",
                    dialect.quote(name),
                    dialect.placeholder(params.push(cell.clone()))
                )
            }
        })
        .collect();
    format!(" WHERE {}", predicates.join(" AND "))
}
