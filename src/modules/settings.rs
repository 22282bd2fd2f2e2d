use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::adapters::format_timestamp;
use crate::bus::{EventBus, EventBusBuilder, EventContext, EventHandler, ModuleType, Visibility};
use crate::modules::module_trait::{Module, ModuleContext};
use crate::persistence::{SymbolicCommand, COMMAND_EVENT, READ_EVENT, RESERVED_COMMAND_TABLE, UPSERT_EVENT};
use crate::utils::error::{GateError, GateResult, PermissionError};

pub const SETTINGS_MODULE: &str = "settings";
pub const GET_SETTING_EVENT: &str = "settings.get";
pub const SET_SETTING_EVENT: &str = "settings.set";

const SETTINGS_TABLE: &str = "settings.settings";

/// Core key/value settings store backed by `settings.settings`
#[derive(Debug, Default)]
pub struct SettingsModule;

impl SettingsModule {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Module for SettingsModule {
    fn name(&self) -> &str {
        SETTINGS_MODULE
    }

    fn module_type(&self) -> ModuleType {
        ModuleType::Core
    }

    fn register(&self, ctx: &ModuleContext, bus: &mut EventBusBuilder) -> GateResult<()> {
        bus.register_handler(
            GET_SETTING_EVENT,
            ctx.identity(),
            Visibility::Protected,
            Arc::new(GetSetting { module: ctx.clone() }),
        )?;
        bus.register_handler(
            SET_SETTING_EVENT,
            ctx.identity(),
            Visibility::Protected,
            Arc::new(SetSetting { module: ctx.clone() }),
        )
    }

    async fn initialize(&self, ctx: &ModuleContext, bus: &EventBus) -> GateResult<()> {
        ctx.emit(
            bus,
            COMMAND_EVENT,
            json!({
                "table": RESERVED_COMMAND_TABLE,
                "data": {"command": SymbolicCommand::InitializeSettingsTables.name()}
            }),
        )
        .await?;
        Ok(())
    }
}

/// `settings.get {key}` returns the stored string, or null when unset
struct GetSetting {
    module: ModuleContext,
}

#[async_trait]
impl EventHandler for GetSetting {
    async fn handle(&self, bus: &EventBus, ctx: EventContext) -> GateResult<Value> {
        let key = ctx.required_str("key")?;
        let result = self
            .module
            .emit(
                bus,
                READ_EVENT,
                json!({
                    "table": SETTINGS_TABLE,
                    "filter": {"key": key},
                    "columns": ["value"],
                    "limit": 1
                }),
            )
            .await?;

        Ok(result
            .pointer("/rows/0/value")
            .cloned()
            .unwrap_or(Value::Null))
    }
}

/// `settings.set {key, value}`; core callers only
struct SetSetting {
    module: ModuleContext,
}

#[async_trait]
impl EventHandler for SetSetting {
    async fn handle(&self, bus: &EventBus, ctx: EventContext) -> GateResult<Value> {
        let caller = ctx.caller()?;
        if !caller.is_core() {
            return Err(PermissionError::CoreOnly {
                module: caller.module.clone(),
                event: SET_SETTING_EVENT.to_string(),
            }
            .into());
        }

        let key = ctx.required_str("key")?;
        let value = match ctx.field("value") {
            Some(Value::String(value)) => Value::String(value.clone()),
            Some(Value::Null) => Value::Null,
            Some(_) => return Err(GateError::validation("field 'value' must be a string or null")),
            None => return Err(GateError::validation("field 'value' is required")),
        };

        self.module
            .emit(
                bus,
                UPSERT_EVENT,
                json!({
                    "table": SETTINGS_TABLE,
                    "filter": {"key": key},
                    "data": {"value": value, "updated_at": format_timestamp(&Utc::now())}
                }),
            )
            .await?;
        tracing::info!(key = %key, caller = %caller, "Setting updated");

        Ok(json!({ "key": key }))
    }
}
