use async_trait::async_trait;
use serde_json::Value;

use crate::bus::{
    EventBus, EventBusBuilder, Identity, ModuleType, TokenAuthority, CALLER_MODULE_FIELD, CALLER_MODULE_TYPE_FIELD,
    TOKEN_FIELD,
};
use crate::utils::error::{GateError, GateResult};

/// What a module knows about itself at runtime: its identity and a way to
/// mint its own tokens for nested emits
#[derive(Debug, Clone)]
pub struct ModuleContext {
    identity: Identity,
    authority: TokenAuthority,
}

impl ModuleContext {
    pub fn new(identity: Identity, authority: TokenAuthority) -> Self {
        Self { identity, authority }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// A fresh token for this module
    pub fn token(&self) -> GateResult<String> {
        self.authority.issue(&self.identity)
    }

    /// Decorate `fields` with this module's token and caller fields
    pub fn payload(&self, fields: Value) -> GateResult<Value> {
        let mut payload = match fields {
            Value::Object(map) => map,
            Value::Null => Default::default(),
            _ => return Err(GateError::Internal("module payloads must be JSON objects".to_string())),
        };
        payload.insert(TOKEN_FIELD.to_string(), Value::String(self.token()?));
        payload.insert(CALLER_MODULE_FIELD.to_string(), Value::String(self.identity.module.clone()));
        payload.insert(
            CALLER_MODULE_TYPE_FIELD.to_string(),
            Value::String(self.identity.module_type.to_string()),
        );
        Ok(Value::Object(payload))
    }

    /// Emit on behalf of this module
    pub async fn emit(&self, bus: &EventBus, event_name: &str, fields: Value) -> GateResult<Value> {
        bus.emit(event_name, self.payload(fields)?).await
    }
}

/// A unit of functionality hosted on the bus.
///
/// Startup is two-phase: every module registers its handlers first, then,
/// once the registry is frozen, each module's `initialize` runs in order.
#[async_trait]
pub trait Module: Send + Sync {
    /// Unique module name; also the whitelist key for its persistence calls
    fn name(&self) -> &str;

    fn module_type(&self) -> ModuleType;

    fn register(&self, ctx: &ModuleContext, bus: &mut EventBusBuilder) -> GateResult<()>;

    /// Runs after every module has registered. Failures abort startup.
    async fn initialize(&self, _ctx: &ModuleContext, _bus: &EventBus) -> GateResult<()> {
        Ok(())
    }
}
