use async_trait::async_trait;
use serde_json::Value;

use crate::bus::event_bus::EventBus;
use crate::bus::identity::Identity;
use crate::utils::error::{AuthError, GateError, GateResult};
use crate::utils::types::Document;

/// Whether an event may be called without a token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Protected,
}

/// What a handler receives for one `emit`
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event_name: String,
    /// Identity decoded from the token; `None` only for anonymous calls to public events
    pub caller: Option<Identity>,
    /// Payload fields minus the token
    pub payload: Document,
}

impl EventContext {
    /// The authenticated caller, or an auth error for anonymous calls
    pub fn caller(&self) -> GateResult<&Identity> {
        self.caller
            .as_ref()
            .ok_or_else(|| GateError::Auth(AuthError::MissingToken))
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }

    /// A string field that must be present
    pub fn required_str(&self, name: &str) -> GateResult<&str> {
        match self.payload.get(name) {
            Some(Value::String(value)) => Ok(value),
            Some(_) => Err(GateError::validation(format!("field '{}' must be a string", name))),
            None => Err(GateError::validation(format!("field '{}' is required", name))),
        }
    }
}

/// Capability every registered event handler implements
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one call. `bus` allows nested emits; their errors should be returned, not swallowed.
    async fn handle(&self, bus: &EventBus, ctx: EventContext) -> GateResult<Value>;
}
