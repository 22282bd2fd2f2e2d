use eventgate::adapters::{
    create_adapter, AdapterInitConfig, DocumentAdapter, EngineAdapter, PostgresAdapter, SqlServerAdapter,
};
use eventgate::modules::ModuleHost;
use eventgate::persistence::SymbolicCommand;
use eventgate::utils::config::GateConfig;
use eventgate::utils::error::{AdapterError, GateError};
use eventgate::utils::types::{CrudOperation, CrudRequest, Document, EngineKind};
use serde_json::{json, Value};
use std::env;
use std::time::Duration;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

/// Nothing listens on port 1, so connection attempts fail fast
fn unreachable(host_key: &str) -> AdapterInitConfig {
    AdapterInitConfig::new()
        .with_param(host_key, "127.0.0.1")
        .with_param("port", "1")
        .with_timeout(5)
}

fn assert_connection_error(error: GateError) {
    match error {
        GateError::Adapter(AdapterError::ConnectionFailed { .. }) | GateError::Adapter(AdapterError::Timeout { .. }) => {}
        other => panic!("Expected ConnectionFailed or Timeout, got {:?}", other),
    }
}

#[test]
fn test_factory_builds_each_engine() {
    for kind in [EngineKind::Postgres, EngineKind::SqlServer, EngineKind::Document] {
        let adapter = create_adapter(kind);
        assert_eq!(adapter.engine(), kind);
        assert!(!adapter.is_connected());
    }
}

#[tokio::test]
async fn test_postgres_unreachable_server() {
    let mut adapter = PostgresAdapter::new();
    let config = unreachable("host")
        .with_param("user", "eventgate")
        .with_param("dbname", "eventgate");

    assert_connection_error(adapter.connect(config).await.unwrap_err());
    assert!(!adapter.is_connected());
}

#[tokio::test]
async fn test_postgres_invalid_port() {
    let mut adapter = PostgresAdapter::new();
    let config = AdapterInitConfig::new().with_param("port", "not-a-port");

    match adapter.connect(config).await {
        Err(GateError::Adapter(AdapterError::ConnectionFailed { target, message })) => {
            assert_eq!(target, "postgres");
            assert!(message.contains("Invalid port"));
        }
        other => panic!("Expected ConnectionFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sqlserver_requires_credentials() {
    let mut adapter = SqlServerAdapter::new();
    let config = AdapterInitConfig::new().with_param("server", "localhost");

    match adapter.connect(config).await {
        Err(GateError::Adapter(AdapterError::ConnectionFailed { message, .. })) => {
            assert!(message.contains("database"));
        }
        other => panic!("Expected ConnectionFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_sqlserver_unreachable_server() {
    let mut adapter = SqlServerAdapter::new();
    let config = unreachable("server")
        .with_param("database", "eventgate")
        .with_param("username", "sa")
        .with_param("password", "secret");

    assert_connection_error(adapter.connect(config).await.unwrap_err());
    assert!(!adapter.is_connected());
}

#[tokio::test]
async fn test_unconnected_adapters_refuse_work() {
    let read = CrudRequest::new(CrudOperation::Read, "settings.settings");
    let adapters: Vec<Box<dyn EngineAdapter>> = vec![
        Box::new(PostgresAdapter::new()),
        Box::new(SqlServerAdapter::new()),
        Box::new(DocumentAdapter::new()),
    ];

    for adapter in adapters {
        match adapter.execute_crud(&read).await {
            Err(GateError::Adapter(AdapterError::NotConnected { target })) => {
                assert_eq!(target, "settings.settings", "{}", adapter.engine())
            }
            other => panic!("{}: expected NotConnected, got {:?}", adapter.engine(), other),
        }
        assert_err!(adapter.execute_command(SymbolicCommand::InitializeSettingsTables).await);
    }
}

#[tokio::test]
async fn test_document_adapter_lifecycle() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("documents.json");
    let mut adapter = DocumentAdapter::new();

    assert_ok!(
        adapter
            .connect(AdapterInitConfig::new().with_param("data_path", &path.to_string_lossy()))
            .await
    );
    assert!(adapter.is_connected());
    let plan = assert_ok!(adapter.execute_command(SymbolicCommand::InitializeSettingsTables).await);
    assert_eq!(plan.structures, vec!["settings"]);

    assert_ok!(adapter.disconnect().await);
    assert!(!adapter.is_connected());
    assert!(path.exists());
}

#[tokio::test]
async fn test_document_adapter_rejects_corrupt_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("documents.json");
    std::fs::write(&path, "not a snapshot").unwrap();

    let mut adapter = DocumentAdapter::new();
    let result = adapter
        .connect(AdapterInitConfig::new().with_param("data_path", &path.to_string_lossy()))
        .await;
    assert!(matches!(
        result,
        Err(GateError::Adapter(AdapterError::ConnectionFailed { .. }))
    ));
}

#[tokio::test]
async fn test_host_startup_fails_when_engine_is_unreachable() {
    let mut config = GateConfig::default();
    config.auth.jwt_secret = "connection-secret".to_string();
    config.engine.kind = EngineKind::Postgres;
    config.engine.timeout_seconds = 5;
    config.engine.parameters.insert("host".to_string(), "127.0.0.1".to_string());
    config.engine.parameters.insert("port".to_string(), "1".to_string());

    match ModuleHost::builder(config).build().await {
        Err(e) => assert_connection_error(e),
        Ok(_) => panic!("Expected startup to fail"),
    }
}

/// Live-engine tests. Run with: POSTGRES_HOST=localhost POSTGRES_PASSWORD=postgres \
/// MSSQL_SERVER=localhost MSSQL_PASSWORD=... cargo test -- --ignored
#[cfg(test)]
mod integration_tests {
    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn var(name: &str, default: &str) -> String {
        env::var(name).unwrap_or_else(|_| default.to_string())
    }

    fn postgres_config() -> AdapterInitConfig {
        AdapterInitConfig::new()
            .with_param("host", &var("POSTGRES_HOST", "localhost"))
            .with_param("port", &var("POSTGRES_PORT", "5432"))
            .with_param("user", &var("POSTGRES_USER", "postgres"))
            .with_param("password", &var("POSTGRES_PASSWORD", "postgres"))
            .with_param("dbname", &var("POSTGRES_DB", "test"))
            .with_timeout(30)
            .with_max_connections(1)
    }

    fn sqlserver_config() -> AdapterInitConfig {
        AdapterInitConfig::new()
            .with_param("server", &var("MSSQL_SERVER", "localhost"))
            .with_param("port", &var("MSSQL_PORT", "1433"))
            .with_param("database", &var("MSSQL_DATABASE", "master"))
            .with_param("username", &var("MSSQL_USERNAME", "sa"))
            .with_param("password", &var("MSSQL_PASSWORD", ""))
            .with_timeout(30)
    }

    /// Cancel the settings command at several points, then make sure a write on
    /// the same adapter is visible to a fresh one
    async fn assert_writes_commit_after_cancellation(writer: &dyn EngineAdapter, reader: &dyn EngineAdapter) {
        assert_ok!(writer.execute_command(SymbolicCommand::InitializeSettingsTables).await);
        for micros in [10, 100, 1_000, 10_000, 100_000] {
            let _ = tokio::time::timeout(
                Duration::from_micros(micros),
                writer.execute_command(SymbolicCommand::InitializeSettingsTables),
            )
            .await;
        }

        let key = format!("cancelled.{}", uuid::Uuid::new_v4());
        let upsert = CrudRequest::new(CrudOperation::Upsert, "settings.settings")
            .with_filter(doc(json!({"key": key})))
            .with_data(doc(json!({"value": "committed"})));
        assert_ok!(writer.execute_crud(&upsert).await);

        let read = CrudRequest::new(CrudOperation::Read, "settings.settings").with_filter(doc(json!({"key": key})));
        let outcome = assert_ok!(reader.execute_crud(&read).await);
        assert_eq!(outcome.rows().len(), 1, "{} write not visible", writer.engine());
        assert_eq!(outcome.rows()[0]["value"], json!("committed"));

        let delete = CrudRequest::new(CrudOperation::Delete, "settings.settings").with_filter(doc(json!({"key": key})));
        assert_ok!(writer.execute_crud(&delete).await);
    }

    #[tokio::test]
    #[ignore] // Requires a real PostgreSQL instance
    async fn test_postgres_cancelled_command_leaves_no_open_transaction() {
        let mut writer = PostgresAdapter::new();
        let mut reader = PostgresAdapter::new();
        assert_ok!(writer.connect(postgres_config()).await);
        assert_ok!(reader.connect(postgres_config()).await);

        assert_writes_commit_after_cancellation(&writer, &reader).await;
    }

    #[tokio::test]
    #[ignore] // Requires a real SQL Server instance
    async fn test_sqlserver_cancelled_command_reconnects() {
        let mut writer = SqlServerAdapter::new();
        let mut reader = SqlServerAdapter::new();
        assert_ok!(writer.connect(sqlserver_config()).await);
        assert_ok!(reader.connect(sqlserver_config()).await);

        assert_writes_commit_after_cancellation(&writer, &reader).await;
    }
}
