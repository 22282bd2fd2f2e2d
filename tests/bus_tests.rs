use async_trait::async_trait;
use eventgate::bus::{
    EventBus, EventBusBuilder, EventContext, EventHandler, Identity, ModuleType, TokenAuthority, Visibility,
};
use eventgate::utils::error::{AuthError, GateError, GateResult, PermissionError};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts calls and reports who called
struct CountingHandler {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl EventHandler for CountingHandler {
    async fn handle(&self, _bus: &EventBus, ctx: EventContext) -> GateResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "caller": ctx.caller.as_ref().map(|c| c.to_string()) }))
    }
}

/// Forwards to another event with its own identity, surfacing the nested result unchanged
struct Relay {
    identity: Identity,
    target: &'static str,
}

#[async_trait]
impl EventHandler for Relay {
    async fn handle(&self, bus: &EventBus, _ctx: EventContext) -> GateResult<Value> {
        let token = bus.authority().issue(&self.identity)?;
        bus.emit(self.target, json!({ "token": token })).await
    }
}

/// Rejects every call the way a handler enforcing its own policy would
struct CoreGate;

#[async_trait]
impl EventHandler for CoreGate {
    async fn handle(&self, _bus: &EventBus, ctx: EventContext) -> GateResult<Value> {
        let caller = ctx.caller()?;
        if !caller.is_core() {
            return Err(PermissionError::CoreOnly {
                module: caller.module.clone(),
                event: ctx.event_name.clone(),
            }
            .into());
        }
        Ok(Value::Bool(true))
    }
}

fn authority() -> TokenAuthority {
    TokenAuthority::new("integration-secret", 300)
}

fn counting_handler(calls: &Arc<AtomicUsize>) -> Arc<dyn EventHandler> {
    Arc::new(CountingHandler { calls: Arc::clone(calls) })
}

fn pages() -> Identity {
    Identity::new("pages", ModuleType::Core)
}

fn blog() -> Identity {
    Identity::new("blog", ModuleType::Community)
}

fn build(register: impl FnOnce(&mut EventBusBuilder)) -> EventBus {
    let mut builder = EventBus::builder(authority());
    register(&mut builder);
    builder.build()
}

#[tokio::test]
async fn test_protected_event_rejects_missing_token() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bus = build(|b| {
        b.register_handler("protectedEvent", &pages(), Visibility::Protected, counting_handler(&calls))
            .unwrap()
    });

    match bus.emit("protectedEvent", json!({})).await {
        Err(GateError::Auth(AuthError::MissingToken)) => {}
        other => panic!("Expected MissingToken, got {:?}", other),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_protected_event_rejects_foreign_and_expired_tokens() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bus = build(|b| {
        b.register_handler("protectedEvent", &pages(), Visibility::Protected, counting_handler(&calls))
            .unwrap()
    });

    let foreign = TokenAuthority::new("someone-else", 300).issue(&blog()).unwrap();
    assert!(matches!(
        bus.emit("protectedEvent", json!({ "token": foreign })).await,
        Err(GateError::Auth(AuthError::InvalidToken(_)))
    ));

    let expired = TokenAuthority::new("integration-secret", -120).issue(&blog()).unwrap();
    assert!(matches!(
        bus.emit("protectedEvent", json!({ "token": expired })).await,
        Err(GateError::Auth(AuthError::Expired))
    ));

    assert!(matches!(
        bus.emit("protectedEvent", json!({ "token": 42 })).await,
        Err(GateError::Auth(AuthError::InvalidToken(_)))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unknown_event() {
    let bus = build(|_| {});
    let token = bus.authority().issue(&blog()).unwrap();

    match bus.emit("doesNotExist", json!({ "token": token })).await {
        Err(GateError::UnknownEvent(name)) => assert_eq!(name, "doesNotExist"),
        other => panic!("Expected UnknownEvent, got {:?}", other),
    }
    assert!(matches!(
        bus.emit("doesNotExist", json!({ "token": "garbage" })).await,
        Err(GateError::Auth(AuthError::InvalidToken(_)))
    ));
}

#[tokio::test]
async fn test_public_event_runs_with_or_without_identity() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bus = build(|b| {
        b.register_handler("pages.list", &pages(), Visibility::Public, counting_handler(&calls))
            .unwrap()
    });

    let anonymous = bus.emit("pages.list", json!({})).await.unwrap();
    assert_eq!(anonymous, json!({ "caller": null }));

    let bad_token = bus.emit("pages.list", json!({ "token": "garbage" })).await.unwrap();
    assert_eq!(bad_token, json!({ "caller": null }));

    let token = bus.authority().issue(&blog()).unwrap();
    let identified = bus.emit("pages.list", json!({ "token": token })).await.unwrap();
    assert_eq!(identified, json!({ "caller": "blog(community)" }));

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_non_object_payload_is_a_validation_error() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bus = build(|b| {
        b.register_handler("pages.list", &pages(), Visibility::Public, counting_handler(&calls))
            .unwrap()
    });

    assert!(matches!(
        bus.emit("pages.list", json!([1, 2, 3])).await,
        Err(GateError::Validation(_))
    ));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_nested_errors_surface_unchanged() {
    let bus = build(|b| {
        b.register_handler("admin.only", &pages(), Visibility::Protected, Arc::new(CoreGate))
            .unwrap();
        b.register_handler(
            "blog.relay",
            &blog(),
            Visibility::Public,
            Arc::new(Relay {
                identity: blog(),
                target: "admin.only",
            }),
        )
        .unwrap();
        b.register_handler(
            "pages.relay",
            &pages(),
            Visibility::Public,
            Arc::new(Relay {
                identity: pages(),
                target: "admin.only",
            }),
        )
        .unwrap();
    });

    match bus.emit("blog.relay", json!({})).await {
        Err(GateError::Permission(PermissionError::CoreOnly { module, event })) => {
            assert_eq!(module, "blog");
            assert_eq!(event, "admin.only");
        }
        other => panic!("Expected CoreOnly, got {:?}", other),
    }
    assert_eq!(bus.emit("pages.relay", json!({})).await.unwrap(), json!(true));
}

#[tokio::test]
async fn test_concurrent_emits_share_the_bus() {
    let calls = Arc::new(AtomicUsize::new(0));
    let bus = Arc::new(build(|b| {
        b.register_handler("pages.list", &pages(), Visibility::Protected, counting_handler(&calls))
            .unwrap()
    }));
    let token = bus.authority().issue(&blog()).unwrap();

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let bus = Arc::clone(&bus);
            let token = token.clone();
            tokio::spawn(async move { bus.emit("pages.list", json!({ "token": token })).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 32);
}

#[test]
fn test_second_registration_keeps_the_first() {
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    let mut builder = EventBus::builder(authority());
    builder
        .register_handler("pages.list", &pages(), Visibility::Public, counting_handler(&first))
        .unwrap();
    assert!(matches!(
        builder.register_handler("pages.list", &blog(), Visibility::Public, counting_handler(&second)),
        Err(GateError::Registration(_))
    ));
    let bus = builder.build();

    tokio_test::block_on(bus.emit("pages.list", json!({}))).unwrap();
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}
