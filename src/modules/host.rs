use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

use crate::adapters::{create_adapter, AdapterInitConfig, EngineAdapter};
use crate::bus::{EventBus, Identity, ModuleType, TokenAuthority};
use crate::modules::module_trait::{Module, ModuleContext};
use crate::persistence::{PersistenceDispatcher, Whitelist};
use crate::utils::{
    config::GateConfig,
    error::{GateError, GateResult},
    types::EngineKind,
};

/// Module name the persistence events are registered under
pub const PERSISTENCE_MODULE: &str = "persistence";

/// Running gate: the frozen bus, the dispatcher behind it and the hosted modules
pub struct ModuleHost {
    config: GateConfig,
    bus: Arc<EventBus>,
    dispatcher: Arc<PersistenceDispatcher>,
    modules: Vec<Arc<dyn Module>>,
}

impl ModuleHost {
    pub fn builder(config: GateConfig) -> ModuleHostBuilder {
        ModuleHostBuilder::new(config)
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn dispatcher(&self) -> &Arc<PersistenceDispatcher> {
        &self.dispatcher
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn engine(&self) -> EngineKind {
        self.dispatcher.engine()
    }

    pub fn module_names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    pub fn authority(&self) -> &TokenAuthority {
        self.bus.authority()
    }

    /// Context for acting as `identity`, e.g. from the CLI
    pub fn context_for(&self, identity: Identity) -> ModuleContext {
        ModuleContext::new(identity, self.authority().clone())
    }

    pub async fn emit(&self, event_name: &str, payload: Value) -> GateResult<Value> {
        self.bus.emit(event_name, payload).await
    }

    /// Release the engine connection and flush any snapshot
    pub async fn shutdown(&self) -> GateResult<()> {
        tracing::info!(engine = %self.engine(), "Shutting down");
        self.dispatcher.adapter().disconnect().await
    }
}

/// Builder for [`ModuleHost`]
pub struct ModuleHostBuilder {
    config: GateConfig,
    adapter: Option<Box<dyn EngineAdapter>>,
    modules: Vec<Arc<dyn Module>>,
}

impl ModuleHostBuilder {
    pub fn new(config: GateConfig) -> Self {
        Self {
            config,
            adapter: None,
            modules: Vec::new(),
        }
    }

    /// Use this adapter instead of one built from `engine.kind`. It is connected
    /// during `build` unless it already is.
    pub fn with_adapter(mut self, adapter: Box<dyn EngineAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Host a module. Modules register and initialize in the order added.
    pub fn with_module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Connect the engine, register the persistence events and every module,
    /// freeze the bus, then initialize modules in order
    pub async fn build(self) -> GateResult<ModuleHost> {
        let config = self.config;
        config.validate()?;

        let mut seen = HashSet::new();
        for module in &self.modules {
            if module.name() == PERSISTENCE_MODULE || !seen.insert(module.name().to_string()) {
                return Err(GateError::Registration(format!(
                    "module name '{}' is already taken",
                    module.name()
                )));
            }
        }

        let mut adapter = self.adapter.unwrap_or_else(|| create_adapter(config.engine.kind));
        if !adapter.is_connected() {
            adapter.connect(AdapterInitConfig::from(&config.engine)).await?;
        }
        let adapter: Arc<dyn EngineAdapter> = Arc::from(adapter);

        let whitelist = Arc::new(Whitelist::from_config(&config.whitelist));
        let dispatcher = Arc::new(PersistenceDispatcher::new(adapter, whitelist));
        let authority = TokenAuthority::from_config(&config.auth);

        let mut builder = EventBus::builder(authority.clone());
        dispatcher.register(&mut builder, &Identity::new(PERSISTENCE_MODULE, ModuleType::Core))?;

        let contexts: Vec<ModuleContext> = self
            .modules
            .iter()
            .map(|m| ModuleContext::new(Identity::new(m.name(), m.module_type()), authority.clone()))
            .collect();
        for (module, ctx) in self.modules.iter().zip(&contexts) {
            module.register(ctx, &mut builder)?;
        }

        let bus = Arc::new(builder.build());
        for (module, ctx) in self.modules.iter().zip(&contexts) {
            module.initialize(ctx, &bus).await.map_err(|e| {
                tracing::error!(module = %module.name(), error = %e, "Module failed to initialize");
                e
            })?;
            tracing::info!(module = %module.name(), module_type = %module.module_type(), "Module ready");
        }

        tracing::info!(
            engine = %dispatcher.engine(),
            events = bus.event_names().len(),
            modules = self.modules.len(),
            "Event gate started"
        );
        Ok(ModuleHost {
            config,
            bus,
            dispatcher,
            modules: self.modules,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{EventBusBuilder, EventContext, EventHandler, Visibility};
    use crate::modules::SettingsModule;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    fn config() -> GateConfig {
        let mut config = GateConfig::default();
        config.auth.jwt_secret = "host-test-secret".to_string();
        config
    }

    /// Records the order hooks run in
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail_initialize: bool,
    }

    struct Echo;

    #[async_trait]
    impl EventHandler for Echo {
        async fn handle(&self, _bus: &EventBus, ctx: EventContext) -> GateResult<Value> {
            Ok(Value::Object(ctx.payload))
        }
    }

    #[async_trait]
    impl Module for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn module_type(&self) -> ModuleType {
            ModuleType::Community
        }

        fn register(&self, _ctx: &ModuleContext, bus: &mut EventBusBuilder) -> GateResult<()> {
            self.log.lock().unwrap().push(format!("register {}", self.name));
            bus.register_handler(
                &format!("{}.echo", self.name),
                &Identity::new(self.name, ModuleType::Community),
                Visibility::Public,
                Arc::new(Echo),
            )
        }

        async fn initialize(&self, _ctx: &ModuleContext, bus: &EventBus) -> GateResult<()> {
            self.log.lock().unwrap().push(format!("initialize {} ({} events)", self.name, bus.event_names().len()));
            if self.fail_initialize {
                return Err(GateError::Internal("boom".to_string()));
            }
            Ok(())
        }
    }

    fn recorder(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Module> {
        Arc::new(Recorder {
            name,
            log: Arc::clone(log),
            fail_initialize: false,
        })
    }

    #[tokio::test]
    async fn test_registration_precedes_initialization() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let host = ModuleHost::builder(config())
            .with_module(recorder("alpha", &log))
            .with_module(recorder("beta", &log))
            .build()
            .await
            .unwrap();

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "register alpha",
                "register beta",
                "initialize alpha (8 events)",
                "initialize beta (8 events)"
            ]
        );
        assert_eq!(host.module_names(), vec!["alpha", "beta"]);
        assert_eq!(host.engine(), EngineKind::Document);
    }

    #[tokio::test]
    async fn test_initialize_failure_aborts_startup() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing = Arc::new(Recorder {
            name: "alpha",
            log: Arc::clone(&log),
            fail_initialize: true,
        });

        let result = ModuleHost::builder(config())
            .with_module(failing)
            .with_module(recorder("beta", &log))
            .build()
            .await;
        assert!(matches!(result, Err(GateError::Internal(_))));
        assert!(!log.lock().unwrap().iter().any(|entry| entry.starts_with("initialize beta")));
    }

    #[tokio::test]
    async fn test_duplicate_module_names_are_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let result = ModuleHost::builder(config())
            .with_module(recorder("alpha", &log))
            .with_module(recorder("alpha", &log))
            .build()
            .await;
        assert!(matches!(result, Err(GateError::Registration(_))));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_secret_is_a_configuration_error() {
        let result = ModuleHost::builder(GateConfig::default()).build().await;
        assert!(matches!(result, Err(GateError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_settings_module_initializes_its_tables() {
        let host = ModuleHost::builder(config())
            .with_module(Arc::new(SettingsModule::new()))
            .build()
            .await
            .unwrap();

        let ctx = host.context_for(Identity::new("settings", ModuleType::Core));
        ctx.emit(host.bus(), "settings.set", json!({"key": "site.name", "value": "Demo"}))
            .await
            .unwrap();
        let value = ctx.emit(host.bus(), "settings.get", json!({"key": "site.name"})).await.unwrap();
        assert_eq!(value, json!("Demo"));

        host.shutdown().await.unwrap();
        assert!(!host.dispatcher().adapter().is_connected());
    }
}
