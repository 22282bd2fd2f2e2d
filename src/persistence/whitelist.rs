use std::collections::HashMap;

use crate::persistence::catalog::find_table;
use crate::utils::config::WhitelistConfig;
use crate::utils::error::{GateError, GateResult, PermissionError};

/// Immutable module → table → allowed-column map.
///
/// A missing table key means no access; a present key with no columns means
/// the table is known but no column may be touched.
#[derive(Debug, Clone, Default)]
pub struct Whitelist {
    modules: HashMap<String, HashMap<String, Vec<String>>>,
}

impl Whitelist {
    /// Build from configuration, dropping duplicate columns while keeping their first position
    pub fn from_config(config: &WhitelistConfig) -> Self {
        let modules = config
            .modules
            .iter()
            .map(|(module, tables)| {
                let tables = tables
                    .iter()
                    .map(|(table, columns)| {
                        let mut ordered: Vec<String> = Vec::with_capacity(columns.len());
                        for column in columns {
                            if !ordered.contains(column) {
                                ordered.push(column.clone());
                            }
                        }
                        (table.clone(), ordered)
                    })
                    .collect();
                (module.clone(), tables)
            })
            .collect();
        Self { modules }
    }

    pub fn is_allowed(&self, module: &str, table: &str) -> bool {
        self.modules
            .get(module)
            .map(|tables| tables.contains_key(table))
            .unwrap_or(false)
    }

    /// True only if the table is allowed and every requested column is in its allowed set
    pub fn are_columns_allowed<S: AsRef<str>>(&self, module: &str, table: &str, columns: &[S]) -> bool {
        match self.allowed_columns(module, table) {
            Some(allowed) => columns
                .iter()
                .all(|c| allowed.iter().any(|a| a == c.as_ref())),
            None => false,
        }
    }

    /// Allowed columns in configured order, or `None` when the table is not allowed
    pub fn allowed_columns(&self, module: &str, table: &str) -> Option<&[String]> {
        self.modules
            .get(module)
            .and_then(|tables| tables.get(table))
            .map(Vec::as_slice)
    }

    /// Like [`are_columns_allowed`](Self::are_columns_allowed) but names the first offender
    pub fn check<S: AsRef<str>>(&self, module: &str, table: &str, columns: &[S]) -> GateResult<()> {
        let allowed = self.allowed_columns(module, table).ok_or_else(|| PermissionError::TableDenied {
            module: module.to_string(),
            table: table.to_string(),
        })?;

        if let Some(column) = columns
            .iter()
            .map(|c| -> &str { c.as_ref() })
            .find(|c| !allowed.iter().any(|a| a == *c))
        {
            return Err(PermissionError::ColumnDenied {
                module: module.to_string(),
                table: table.to_string(),
                column: column.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Every (module, table, columns) entry in the map
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &[String])> {
        self.modules.iter().flat_map(|(module, tables)| {
            tables
                .iter()
                .map(move |(table, columns)| (module.as_str(), table.as_str(), columns.as_slice()))
        })
    }

    /// Every listed table must be in the catalog and every listed column in that table
    pub fn validate(&self) -> GateResult<()> {
        for (module, table, columns) in self.entries() {
            let def = find_table(table).ok_or_else(|| {
                GateError::Configuration(format!(
                    "whitelist for module '{}' names unknown table '{}'",
                    module, table
                ))
            })?;
            if let Some(column) = columns.iter().find(|c| def.column(c.as_str()).is_none()) {
                return Err(GateError::Configuration(format!(
                    "whitelist for module '{}' names unknown column '{}.{}'",
                    module, table, column
                )));
            }
        }
        Ok(())
    }
}
