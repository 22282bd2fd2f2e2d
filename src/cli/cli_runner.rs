use clap::Parser;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

use crate::adapters::{DocumentAdapter, EngineAdapter, PostgresAdapter, SqlServerAdapter};
use crate::bus::{Identity, ModuleType, TokenAuthority};
use crate::cli::{CliArgs, Commands, OutputFormat, OutputFormatter};
use crate::modules::{ModuleHost, SettingsModule};
use crate::persistence::ParityReport;
use crate::transport;
use crate::utils::{
    config::GateConfig,
    error::{GateError, GateResult},
    logging::init_logging,
};

/// Main CLI runner that handles command execution
pub struct CliRunner {
    config: GateConfig,
}

impl CliRunner {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    /// Load configuration from `path` (if any) plus the environment
    pub fn from_path(path: Option<&Path>) -> GateResult<Self> {
        Ok(Self::new(GateConfig::load(path)?))
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// Start a host with the built-in modules
    pub async fn start_host(&self) -> GateResult<ModuleHost> {
        ModuleHost::builder(self.config.clone())
            .with_module(Arc::new(SettingsModule::new()))
            .build()
            .await
    }

    /// Serve the HTTP binding until Ctrl+C, then shut the host down
    pub async fn serve(&self, port: Option<u16>) -> GateResult<()> {
        let host = self.start_host().await?;
        let mut server = self.config.server.clone();
        if let Some(port) = port {
            server.port = port;
        }

        let result = transport::serve(Arc::clone(host.bus()), &server, &self.config.auth.cookie_name, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        })
        .await;

        host.shutdown().await?;
        result
    }

    /// Emit one event, optionally acting as `module`
    pub async fn emit(
        &self,
        event: &str,
        payload: &str,
        module: Option<&str>,
        module_type: ModuleType,
        format: &OutputFormat,
    ) -> GateResult<String> {
        let payload: Value = serde_json::from_str(payload)
            .map_err(|e| GateError::validation(format!("payload is not valid JSON: {}", e)))?;

        let host = self.start_host().await?;
        let payload = match module {
            Some(module) => host.context_for(Identity::new(module, module_type)).payload(payload)?,
            None => payload,
        };

        let result = host.emit(event, payload).await;
        host.shutdown().await?;
        Ok(OutputFormatter::format_result(&result?, format))
    }

    /// Compare the three shipped adapters. Adapters are inspected unconnected.
    pub fn parity(&self, format: &OutputFormat) -> GateResult<(String, bool)> {
        let postgres = PostgresAdapter::new();
        let sqlserver = SqlServerAdapter::new();
        let document = DocumentAdapter::new();
        let adapters: [&dyn EngineAdapter; 3] = [&postgres, &sqlserver, &document];

        let report = ParityReport::inspect(&adapters, &self.config.parity)?;
        Ok((OutputFormatter::format_parity(&report, format), report.is_clean()))
    }

    /// Mint a token with the configured secret
    pub fn token(&self, module: &str, module_type: ModuleType) -> GateResult<String> {
        self.config.validate()?;
        TokenAuthority::from_config(&self.config.auth).issue(&Identity::new(module, module_type))
    }
}

/// Main entry point for CLI execution
pub async fn run_cli() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    // a missing .env is fine
    dotenvy::dotenv().ok();

    let runner = match CliRunner::from_path(args.config.as_deref()) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("{}", OutputFormatter::format_error(&e));
            std::process::exit(1);
        }
    };
    init_logging(&runner.config().logging);

    let result = match args.command {
        Commands::Serve { port } => runner.serve(port).await.map(|()| None),
        Commands::Emit {
            event,
            payload,
            module,
            module_type,
            format,
        } => runner
            .emit(&event, &payload, module.as_deref(), module_type, &format)
            .await
            .map(Some),
        Commands::Parity { format } => match runner.parity(&format) {
            Ok((output, true)) => Ok(Some(output)),
            Ok((output, false)) => {
                println!("{}", output);
                eprintln!("{}", OutputFormatter::format_info("Engines are out of parity"));
                std::process::exit(2);
            }
            Err(e) => Err(e),
        },
        Commands::Token { module, module_type } => runner.token(&module, module_type).map(Some),
    };

    match result {
        Ok(Some(output)) => {
            println!("{}", output);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(e) => {
            eprintln!("{}", OutputFormatter::format_error(&e));
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::AuthError;

    fn runner() -> CliRunner {
        let mut config = GateConfig::default();
        config.auth.jwt_secret = "cli-test-secret".to_string();
        CliRunner::new(config)
    }

    #[tokio::test]
    async fn test_emit_as_core_module() {
        let output = runner()
            .emit(
                "settings.get",
                r#"{"key": "missing"}"#,
                Some("settings"),
                ModuleType::Core,
                &OutputFormat::Json,
            )
            .await
            .unwrap();
        assert_eq!(output.trim(), "null");
    }

    #[tokio::test]
    async fn test_emit_without_module_is_anonymous() {
        match runner()
            .emit("settings.get", r#"{"key": "k"}"#, None, ModuleType::Community, &OutputFormat::Json)
            .await
        {
            Err(GateError::Auth(AuthError::MissingToken)) => {}
            other => panic!("Expected MissingToken, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_emit_rejects_bad_json() {
        let result = runner()
            .emit("settings.get", "{not json", None, ModuleType::Community, &OutputFormat::Json)
            .await;
        assert!(matches!(result, Err(GateError::Validation(_))));
    }

    #[test]
    fn test_parity_of_shipped_adapters() {
        let (output, clean) = runner().parity(&OutputFormat::Json).unwrap();
        assert!(clean);
        let report: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(report["canonical"], "postgres");
    }

    #[test]
    fn test_token_round_trips() {
        let runner = runner();
        let token = runner.token("blog", ModuleType::Community).unwrap();
        let identity = TokenAuthority::from_config(&runner.config().auth).verify(&token).unwrap();
        assert_eq!(identity, Identity::new("blog", ModuleType::Community));
    }

    #[test]
    fn test_token_requires_secret() {
        let result = CliRunner::new(GateConfig::default()).token("blog", ModuleType::Community);
        assert!(matches!(result, Err(GateError::Configuration(_))));
    }
}
