use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::adapters::EngineAdapter;
use crate::bus::{EventBus, EventBusBuilder, EventContext, EventHandler, Identity, Visibility};
use crate::persistence::command::SymbolicCommand;
use crate::persistence::request::{self, COMMAND_EVENT};
use crate::persistence::whitelist::Whitelist;
use crate::utils::{
    error::{GateResult, PermissionError},
    types::{CrudOperation, CrudRequest, EngineKind},
};

/// Single entry point for storage: authorizes each request against the
/// whitelist and forwards it to the one active engine adapter.
pub struct PersistenceDispatcher {
    adapter: Arc<dyn EngineAdapter>,
    whitelist: Arc<Whitelist>,
}

impl PersistenceDispatcher {
    pub fn new(adapter: Arc<dyn EngineAdapter>, whitelist: Arc<Whitelist>) -> Self {
        Self { adapter, whitelist }
    }

    pub fn engine(&self) -> EngineKind {
        self.adapter.engine()
    }

    pub fn adapter(&self) -> &Arc<dyn EngineAdapter> {
        &self.adapter
    }

    pub fn whitelist(&self) -> &Whitelist {
        &self.whitelist
    }

    /// Run a symbolic command. Only core modules may issue commands.
    pub async fn execute_command(&self, caller: &Identity, command: SymbolicCommand) -> GateResult<Value> {
        if !caller.is_core() {
            tracing::warn!(caller = %caller, command = %command, "Rejected command from community module");
            return Err(PermissionError::CoreOnly {
                module: caller.module.clone(),
                event: COMMAND_EVENT.to_string(),
            }
            .into());
        }

        let plan = self.adapter.execute_command(command).await?;
        tracing::info!(
            caller = %caller,
            command = %command,
            engine = %self.engine(),
            structures = plan.structures.len(),
            "Executed persistence command"
        );
        Ok(plan.to_json(self.engine()))
    }

    /// Authorize and run a generic operation. A read without a projection
    /// selects exactly the caller's whitelisted columns.
    pub async fn execute_crud(&self, caller: &Identity, mut request: CrudRequest) -> GateResult<Value> {
        self.whitelist
            .check(&caller.module, &request.table, &request.referenced_columns())
            .map_err(|e| {
                tracing::warn!(caller = %caller, table = %request.table, error = %e, "Rejected by whitelist");
                e
            })?;

        if request.operation == CrudOperation::Read && request.columns.is_empty() {
            request.columns = self
                .whitelist
                .allowed_columns(&caller.module, &request.table)
                .map(<[String]>::to_vec)
                .unwrap_or_default();
            if request.columns.is_empty() {
                return Err(PermissionError::TableDenied {
                    module: caller.module.clone(),
                    table: request.table.clone(),
                }
                .into());
            }
        }

        tracing::debug!(
            caller = %caller,
            operation = request.operation.as_str(),
            table = %request.table,
            engine = %self.engine(),
            "Dispatching"
        );
        Ok(self.adapter.execute_crud(&request).await?.into_json())
    }

    /// Bind every persistence event to this dispatcher under `owner`
    pub fn register(self: &Arc<Self>, bus: &mut EventBusBuilder, owner: &Identity) -> GateResult<()> {
        bus.register_handler(
            COMMAND_EVENT,
            owner,
            Visibility::Protected,
            Arc::new(PersistenceEventHandler {
                dispatcher: Arc::clone(self),
                operation: None,
            }),
        )?;
        for operation in CrudOperation::ALL {
            bus.register_handler(
                request::crud_event_name(operation),
                owner,
                Visibility::Protected,
                Arc::new(PersistenceEventHandler {
                    dispatcher: Arc::clone(self),
                    operation: Some(operation),
                }),
            )?;
        }
        Ok(())
    }
}

/// Bus-facing handler for one persistence event; `None` serves commands
struct PersistenceEventHandler {
    dispatcher: Arc<PersistenceDispatcher>,
    operation: Option<CrudOperation>,
}

#[async_trait]
impl EventHandler for PersistenceEventHandler {
    async fn handle(&self, _bus: &EventBus, ctx: EventContext) -> GateResult<Value> {
        let caller = ctx.caller()?;
        match self.operation {
            None => {
                let command = request::parse_command(&ctx.payload)?;
                self.dispatcher.execute_command(caller, command).await
            }
            Some(operation) => {
                let request = request::parse_crud(operation, &ctx.payload)?;
                self.dispatcher.execute_crud(caller, request).await
            }
        }
    }
}
