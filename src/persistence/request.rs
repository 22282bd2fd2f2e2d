use serde_json::Value;

use crate::persistence::command::SymbolicCommand;
use crate::utils::{
    error::{GateError, GateResult},
    types::{CrudOperation, CrudRequest, Document, OrderColumn},
};

/// Table marker reserved for symbolic commands
pub const RESERVED_COMMAND_TABLE: &str = "__command__";

pub const COMMAND_EVENT: &str = "persistence.command";
pub const CREATE_EVENT: &str = "persistence.create";
pub const READ_EVENT: &str = "persistence.read";
pub const UPDATE_EVENT: &str = "persistence.update";
pub const DELETE_EVENT: &str = "persistence.delete";
pub const UPSERT_EVENT: &str = "persistence.upsert";

/// Event name serving a generic operation
pub fn crud_event_name(operation: CrudOperation) -> &'static str {
    match operation {
        CrudOperation::Create => CREATE_EVENT,
        CrudOperation::Read => READ_EVENT,
        CrudOperation::Update => UPDATE_EVENT,
        CrudOperation::Delete => DELETE_EVENT,
        CrudOperation::Upsert => UPSERT_EVENT,
    }
}

fn table_field(payload: &Document) -> GateResult<&str> {
    match payload.get("table") {
        Some(Value::String(table)) if !table.is_empty() => Ok(table),
        Some(_) => Err(GateError::validation("field 'table' must be a non-empty string")),
        None => Err(GateError::validation("field 'table' is required")),
    }
}

fn object_field(payload: &Document, name: &str) -> GateResult<Document> {
    match payload.get(name) {
        None | Some(Value::Null) => Ok(Document::new()),
        Some(Value::Object(map)) => Ok(map.clone()),
        Some(_) => Err(GateError::validation(format!("field '{}' must be an object", name))),
    }
}

/// Parse a `persistence.command` payload: `{table: "__command__", data: {command}}`
pub fn parse_command(payload: &Document) -> GateResult<SymbolicCommand> {
    if table_field(payload)? != RESERVED_COMMAND_TABLE {
        return Err(GateError::validation(format!(
            "commands must target the '{}' table",
            RESERVED_COMMAND_TABLE
        )));
    }
    match object_field(payload, "data")?.get("command") {
        Some(Value::String(name)) => name.parse(),
        Some(_) => Err(GateError::validation("field 'data.command' must be a string")),
        None => Err(GateError::validation("field 'data.command' is required")),
    }
}

/// Parse a generic operation payload:
/// `{table, data?, filter?, columns?, orderBy?: [{column, direction}], limit?}`
pub fn parse_crud(operation: CrudOperation, payload: &Document) -> GateResult<CrudRequest> {
    let table = table_field(payload)?;
    if table == RESERVED_COMMAND_TABLE {
        return Err(GateError::validation(format!(
            "the '{}' table is only valid for {}",
            RESERVED_COMMAND_TABLE, COMMAND_EVENT
        )));
    }

    let columns = match payload.get("columns") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| GateError::validation("field 'columns' must list column names"))
            })
            .collect::<GateResult<Vec<_>>>()?,
        Some(_) => return Err(GateError::validation("field 'columns' must be an array")),
    };

    let order_by = match payload.get("orderBy") {
        None | Some(Value::Null) => Vec::new(),
        Some(value) => serde_json::from_value::<Vec<OrderColumn>>(value.clone())
            .map_err(|e| GateError::validation(format!("field 'orderBy' is malformed: {}", e)))?,
    };

    let limit = match payload.get("limit") {
        None | Some(Value::Null) => None,
        Some(value) => Some(
            value
                .as_u64()
                .ok_or_else(|| GateError::validation("field 'limit' must be a non-negative integer"))?,
        ),
    };

    let request = CrudRequest {
        operation,
        table: table.to_string(),
        data: object_field(payload, "data")?,
        filter: object_field(payload, "filter")?,
        columns,
        order_by,
        limit,
    };

    if operation != CrudOperation::Read && (!request.columns.is_empty() || !request.order_by.is_empty()) {
        return Err(GateError::validation(format!(
            "'columns' and 'orderBy' only apply to reads, not {}",
            operation.as_str()
        )));
    }
    Ok(request)
}
