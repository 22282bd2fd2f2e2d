use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::bus::handler::{EventContext, EventHandler, Visibility};
use crate::bus::identity::{Identity, ModuleType, TokenAuthority};
use crate::utils::error::{AuthError, GateError, GateResult};

/// Payload field carrying the access token
pub const TOKEN_FIELD: &str = "token";
/// Payload field naming the calling module
pub const CALLER_MODULE_FIELD: &str = "callerModule";
/// Payload field carrying the calling module's type
pub const CALLER_MODULE_TYPE_FIELD: &str = "callerModuleType";

/// One event name bound to its owning module and handler
#[derive(Clone)]
pub struct HandlerRegistration {
    pub event_name: String,
    pub owner: Identity,
    pub visibility: Visibility,
    pub handler: Arc<dyn EventHandler>,
}

impl HandlerRegistration {
    pub fn new(
        event_name: &str,
        owner: Identity,
        visibility: Visibility,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            event_name: event_name.to_string(),
            owner,
            visibility,
            handler,
        }
    }
}

impl std::fmt::Debug for HandlerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistration")
            .field("event_name", &self.event_name)
            .field("owner", &self.owner)
            .field("visibility", &self.visibility)
            .finish()
    }
}

/// Collects registrations during startup. `build` freezes them into an [`EventBus`].
pub struct EventBusBuilder {
    authority: TokenAuthority,
    registrations: HashMap<String, HandlerRegistration>,
}

impl EventBusBuilder {
    pub fn new(authority: TokenAuthority) -> Self {
        Self {
            authority,
            registrations: HashMap::new(),
        }
    }

    /// Register a handler. A second registration for the same event name is rejected
    /// and the first one stays active.
    pub fn register(&mut self, registration: HandlerRegistration) -> GateResult<()> {
        if registration.event_name.trim().is_empty() {
            return Err(GateError::Registration("event name must not be empty".to_string()));
        }
        if let Some(existing) = self.registrations.get(&registration.event_name) {
            return Err(GateError::Registration(format!(
                "event '{}' is already registered by module '{}'",
                registration.event_name, existing.owner.module
            )));
        }

        tracing::debug!(
            event = %registration.event_name,
            owner = %registration.owner,
            visibility = ?registration.visibility,
            "Registered event handler"
        );
        self.registrations
            .insert(registration.event_name.clone(), registration);
        Ok(())
    }

    pub fn register_handler(
        &mut self,
        event_name: &str,
        owner: &Identity,
        visibility: Visibility,
        handler: Arc<dyn EventHandler>,
    ) -> GateResult<()> {
        self.register(HandlerRegistration::new(event_name, owner.clone(), visibility, handler))
    }

    pub fn authority(&self) -> &TokenAuthority {
        &self.authority
    }

    pub fn build(self) -> EventBus {
        EventBus {
            authority: self.authority,
            registry: self.registrations,
        }
    }
}

/// Authenticated broker routing each event name to exactly one handler.
///
/// The registry is immutable once built, so the bus can be shared through an
/// `Arc` and called concurrently without locking.
pub struct EventBus {
    authority: TokenAuthority,
    registry: HashMap<String, HandlerRegistration>,
}

impl EventBus {
    pub fn builder(authority: TokenAuthority) -> EventBusBuilder {
        EventBusBuilder::new(authority)
    }

    /// Authenticate, authorize and dispatch one call.
    ///
    /// Handler failures, including those from nested emits, are returned unchanged.
    #[tracing::instrument(
        name = "emit",
        skip_all,
        fields(event = %event_name, caller = tracing::field::Empty)
    )]
    pub async fn emit(&self, event_name: &str, payload: Value) -> GateResult<Value> {
        let mut payload = match payload {
            Value::Object(map) => map,
            Value::Null => Default::default(),
            _ => return Err(GateError::validation("payload must be a JSON object")),
        };

        let verified = match payload.remove(TOKEN_FIELD) {
            Some(Value::String(token)) => Some(self.authority.verify(&token)),
            Some(Value::Null) | None => None,
            Some(_) => Some(Err(AuthError::InvalidToken("token must be a string".to_string()))),
        };

        let registration = match self.registry.get(event_name) {
            Some(registration) => registration,
            None => {
                return Err(match verified {
                    Some(Ok(_)) => {
                        tracing::debug!("No handler registered");
                        GateError::UnknownEvent(event_name.to_string())
                    }
                    Some(Err(e)) => GateError::Auth(e),
                    None => GateError::Auth(AuthError::MissingToken),
                });
            }
        };

        let caller = match (registration.visibility, verified) {
            (_, Some(Ok(identity))) => Some(identity),
            (Visibility::Protected, Some(Err(e))) => {
                tracing::warn!(error = %e, "Rejected call with bad credential");
                return Err(GateError::Auth(e));
            }
            (Visibility::Protected, None) => {
                tracing::warn!("Rejected call without credential");
                return Err(GateError::Auth(AuthError::MissingToken));
            }
            (Visibility::Public, _) => None,
        };

        if let Some(identity) = &caller {
            check_claimed_identity(&payload, identity)?;
            tracing::Span::current().record("caller", tracing::field::display(identity));
        }

        let ctx = EventContext {
            event_name: event_name.to_string(),
            caller,
            payload,
        };
        let result = registration.handler.handle(self, ctx).await;
        if let Err(e) = &result {
            tracing::debug!(error = %e, "Handler returned error");
        }
        result
    }

    /// Registered event names, sorted
    pub fn event_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.registry.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn registration(&self, event_name: &str) -> Option<&HandlerRegistration> {
        self.registry.get(event_name)
    }

    pub fn authority(&self) -> &TokenAuthority {
        &self.authority
    }
}

/// Payload identity fields are optional, but when present they must match the token
fn check_claimed_identity(payload: &crate::utils::types::Document, identity: &Identity) -> GateResult<()> {
    match payload.get(CALLER_MODULE_FIELD) {
        None | Some(Value::Null) => {}
        Some(Value::String(module)) if module == &identity.module => {}
        Some(Value::String(module)) => {
            return Err(AuthError::IdentityMismatch(format!(
                "payload claims module '{}' but token belongs to '{}'",
                module, identity.module
            ))
            .into())
        }
        Some(_) => return Err(GateError::validation("callerModule must be a string")),
    }

    match payload.get(CALLER_MODULE_TYPE_FIELD) {
        None | Some(Value::Null) => Ok(()),
        Some(Value::String(raw)) => {
            let claimed: ModuleType = raw.parse().map_err(GateError::Validation)?;
            if claimed == identity.module_type {
                Ok(())
            } else {
                Err(AuthError::IdentityMismatch(format!(
                    "payload claims module type '{}' but token carries '{}'",
                    claimed, identity.module_type
                ))
                .into())
            }
        }
        Some(_) => Err(GateError::validation("callerModuleType must be a string")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingHandler {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        async fn handle(&self, _bus: &EventBus, ctx: EventContext) -> GateResult<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({
                "caller": ctx.caller.map(|c| c.module),
                "echo": ctx.payload.get("message").cloned(),
                "sawToken": ctx.payload.contains_key(TOKEN_FIELD),
            }))
        }
    }

    fn authority() -> TokenAuthority {
        TokenAuthority::new("bus-test-secret", 600)
    }

    fn owner() -> Identity {
        Identity::new("pages", ModuleType::Core)
    }

    fn counting(calls: &Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
        Arc::new(CountingHandler { calls: calls.clone() })
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = EventBus::builder(authority());

        builder
            .register_handler("pages.render", &owner(), Visibility::Protected, counting(&calls))
            .unwrap();
        let second = builder.register_handler(
            "pages.render",
            &Identity::new("intruder", ModuleType::Community),
            Visibility::Public,
            counting(&calls),
        );

        match second {
            Err(GateError::Registration(msg)) => assert!(msg.contains("already registered by module 'pages'")),
            other => panic!("Expected Registration error, got {:?}", other),
        }

        let bus = builder.build();
        let registration = bus.registration("pages.render").unwrap();
        assert_eq!(registration.owner, owner());
        assert_eq!(registration.visibility, Visibility::Protected);
    }

    #[test]
    fn test_empty_event_name_is_rejected() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = EventBus::builder(authority());
        let result = builder.register_handler(" ", &owner(), Visibility::Public, counting(&calls));
        assert!(matches!(result, Err(GateError::Registration(_))));
    }

    #[tokio::test]
    async fn test_protected_event_without_token_never_reaches_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = EventBus::builder(authority());
        builder
            .register_handler("protectedEvent", &owner(), Visibility::Protected, counting(&calls))
            .unwrap();
        let bus = builder.build();

        let result = bus.emit("protectedEvent", json!({})).await;

        assert!(matches!(result, Err(GateError::Auth(AuthError::MissingToken))));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_event_with_valid_token() {
        let bus = EventBus::builder(authority()).build();
        let token = bus.authority().issue(&owner()).unwrap();

        let result = bus.emit("doesNotExist", json!({ "token": token })).await;

        match result {
            Err(GateError::UnknownEvent(name)) => assert_eq!(name, "doesNotExist"),
            other => panic!("Expected UnknownEvent, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unknown_event_without_token_is_auth_error() {
        let bus = EventBus::builder(authority()).build();
        let result = bus.emit("doesNotExist", json!({})).await;
        assert!(matches!(result, Err(GateError::Auth(AuthError::MissingToken))));
    }

    #[tokio::test]
    async fn test_identity_is_propagated_and_token_stripped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = EventBus::builder(authority());
        builder
            .register_handler("pages.render", &owner(), Visibility::Protected, counting(&calls))
            .unwrap();
        let bus = builder.build();
        let token = bus
            .authority()
            .issue(&Identity::new("blog", ModuleType::Community))
            .unwrap();

        let result = bus
            .emit(
                "pages.render",
                json!({
                    "token": token,
                    "callerModule": "blog",
                    "callerModuleType": "community",
                    "message": "hi"
                }),
            )
            .await
            .unwrap();

        assert_eq!(result, json!({"caller": "blog", "echo": "hi", "sawToken": false}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_claimed_identity_must_match_token() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = EventBus::builder(authority());
        builder
            .register_handler("pages.render", &owner(), Visibility::Protected, counting(&calls))
            .unwrap();
        let bus = builder.build();
        let token = bus
            .authority()
            .issue(&Identity::new("blog", ModuleType::Community))
            .unwrap();

        let spoofed_module = bus
            .emit("pages.render", json!({"token": token, "callerModule": "settings"}))
            .await;
        assert!(matches!(spoofed_module, Err(GateError::Auth(AuthError::IdentityMismatch(_)))));

        let spoofed_type = bus
            .emit("pages.render", json!({"token": token, "callerModuleType": "core"}))
            .await;
        assert!(matches!(spoofed_type, Err(GateError::Auth(AuthError::IdentityMismatch(_)))));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_public_event_allows_anonymous_callers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = EventBus::builder(authority());
        builder
            .register_handler("pages.public", &owner(), Visibility::Public, counting(&calls))
            .unwrap();
        let bus = builder.build();

        let anonymous = bus.emit("pages.public", json!({"message": "x"})).await.unwrap();
        assert_eq!(anonymous["caller"], Value::Null);

        let stale = bus
            .emit("pages.public", json!({"token": "garbage", "message": "y"}))
            .await
            .unwrap();
        assert_eq!(stale["caller"], Value::Null);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_object_payload_is_validation_error() {
        let bus = EventBus::builder(authority()).build();
        let result = bus.emit("anything", json!([1, 2, 3])).await;
        assert!(matches!(result, Err(GateError::Validation(_))));
    }

    #[test]
    fn test_event_names_sorted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut builder = EventBus::builder(authority());
        for name in ["b.event", "a.event", "c.event"] {
            builder
                .register_handler(name, &owner(), Visibility::Public, counting(&calls))
                .unwrap();
        }
        let bus = builder.build();
        assert_eq!(bus.event_names(), vec!["a.event", "b.event", "c.event"]);
    }
}
