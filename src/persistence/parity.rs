use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

use crate::adapters::EngineAdapter;
use crate::persistence::catalog::flatten_name;
use crate::utils::{
    config::ParityConfig,
    error::{GateError, GateResult},
    types::EngineKind,
};

/// One engine's divergence from the canonical relational adapter
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EngineParity {
    pub engine: String,
    /// Commands the canonical adapter supports and this one lacks
    pub missing_commands: Vec<String>,
    /// Commands only this adapter supports
    pub extra_commands: Vec<String>,
    /// Canonical structures with no counterpart here, after name mapping
    pub missing_structures: Vec<String>,
    /// Structures only this adapter declares
    pub extra_structures: Vec<String>,
}

impl EngineParity {
    pub fn is_clean(&self) -> bool {
        self.missing_commands.is_empty()
            && self.extra_commands.is_empty()
            && self.missing_structures.is_empty()
            && self.extra_structures.is_empty()
    }
}

/// Cross-engine comparison of command surfaces and declared structures
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParityReport {
    pub canonical: String,
    pub engines: Vec<EngineParity>,
}

impl ParityReport {
    /// Compare every adapter against the first PostgreSQL adapter in `adapters`.
    ///
    /// Between the two relational engines structure names must match exactly;
    /// against the document engine they are compared after [`flatten_name`].
    /// Names listed in `config` are ignored on either side.
    pub fn inspect(adapters: &[&dyn EngineAdapter], config: &ParityConfig) -> GateResult<Self> {
        let canonical = adapters
            .iter()
            .find(|a| a.engine() == EngineKind::Postgres)
            .ok_or_else(|| GateError::Configuration("parity needs a postgres adapter as reference".to_string()))?;

        let canonical_commands = command_names(*canonical, config);
        let canonical_structures = canonical.declared_structures();

        let engines = adapters
            .iter()
            .filter(|a| a.engine() != EngineKind::Postgres)
            .map(|adapter| {
                let commands = command_names(*adapter, config);
                let flatten = !adapter.engine().is_relational();
                let expected: BTreeSet<String> = canonical_structures
                    .iter()
                    .map(|s| if flatten { flatten_name(s) } else { s.clone() })
                    .filter(|s| !config.structure_exceptions.contains(s))
                    .collect();
                let declared: BTreeSet<String> = adapter
                    .declared_structures()
                    .into_iter()
                    .filter(|s| !config.structure_exceptions.contains(s))
                    .collect();

                EngineParity {
                    engine: adapter.engine().to_string(),
                    missing_commands: canonical_commands.difference(&commands).cloned().collect(),
                    extra_commands: commands.difference(&canonical_commands).cloned().collect(),
                    missing_structures: expected.difference(&declared).cloned().collect(),
                    extra_structures: declared.difference(&expected).cloned().collect(),
                }
            })
            .collect();

        Ok(Self {
            canonical: canonical.engine().to_string(),
            engines,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.engines.iter().all(EngineParity::is_clean)
    }
}

fn command_names(adapter: &dyn EngineAdapter, config: &ParityConfig) -> BTreeSet<String> {
    adapter
        .supported_commands()
        .into_iter()
        .map(|c| c.name().to_string())
        .filter(|name| !config.command_exceptions.contains(name))
        .collect()
}

impl fmt::Display for ParityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for engine in &self.engines {
            if engine.is_clean() {
                writeln!(f, "{} matches {}", engine.engine, self.canonical)?;
                continue;
            }
            writeln!(f, "{} diverges from {}:", engine.engine, self.canonical)?;
            let sections = [
                ("missing command", &engine.missing_commands),
                ("extra command", &engine.extra_commands),
                ("missing structure", &engine.missing_structures),
                ("extra structure", &engine.extra_structures),
            ];
            for (label, names) in sections {
                for name in names {
                    writeln!(f, "  {}: {}", label, name)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterInitConfig, CommandPlan, DocumentAdapter, PostgresAdapter, SqlServerAdapter};
    use crate::persistence::command::SymbolicCommand;
    use crate::utils::types::{CrudOutcome, CrudRequest};
    use async_trait::async_trait;

    /// Document adapter that forgot one command and renamed a collection
    struct DriftingAdapter(DocumentAdapter);

    #[async_trait]
    impl EngineAdapter for DriftingAdapter {
        async fn connect(&mut self, config: AdapterInitConfig) -> GateResult<()> {
            self.0.connect(config).await
        }

        async fn disconnect(&self) -> GateResult<()> {
            self.0.disconnect().await
        }

        fn engine(&self) -> EngineKind {
            EngineKind::Document
        }

        fn is_connected(&self) -> bool {
            self.0.is_connected()
        }

        fn plan_command(&self, command: SymbolicCommand) -> CommandPlan {
            let mut plan = self.0.plan_command(command);
            match command {
                SymbolicCommand::InitializeModuleRegistry => plan.statements.clear(),
                SymbolicCommand::InitializeThemeTables => {
                    plan.structures = vec!["themes".to_string(), "theme_fonts".to_string()]
                }
                _ => {}
            }
            plan
        }

        async fn execute_command(&self, command: SymbolicCommand) -> GateResult<CommandPlan> {
            self.0.execute_command(command).await
        }

        async fn execute_crud(&self, request: &CrudRequest) -> GateResult<CrudOutcome> {
            self.0.execute_crud(request).await
        }
    }

    #[test]
    fn test_shipped_adapters_are_in_parity() {
        let postgres = PostgresAdapter::new();
        let sqlserver = SqlServerAdapter::new();
        let document = DocumentAdapter::new();

        let report = ParityReport::inspect(&[&postgres, &sqlserver, &document], &ParityConfig::default()).unwrap();
        assert!(report.is_clean(), "{}", report);
        assert_eq!(report.canonical, "postgres");
        assert_eq!(report.engines.len(), 2);
    }

    #[test]
    fn test_every_command_is_supported_everywhere() {
        let postgres = PostgresAdapter::new();
        let sqlserver = SqlServerAdapter::new();
        let document = DocumentAdapter::new();

        for adapter in [&postgres as &dyn EngineAdapter, &sqlserver, &document] {
            assert_eq!(adapter.supported_commands(), SymbolicCommand::ALL.to_vec());
        }
    }

    #[test]
    fn test_counters_needs_the_exception() {
        let postgres = PostgresAdapter::new();
        let document = DocumentAdapter::new();
        let config = ParityConfig {
            command_exceptions: Vec::new(),
            structure_exceptions: Vec::new(),
        };

        let report = ParityReport::inspect(&[&postgres, &document], &config).unwrap();
        assert!(!report.is_clean());
        assert_eq!(report.engines[0].extra_structures, vec!["counters"]);
    }

    #[test]
    fn test_drift_is_reported() {
        let postgres = PostgresAdapter::new();
        let drifting = DriftingAdapter(DocumentAdapter::new());

        let report = ParityReport::inspect(&[&postgres, &drifting], &ParityConfig::default()).unwrap();
        let engine = &report.engines[0];
        assert_eq!(engine.missing_commands, vec!["initialize_module_registry"]);
        assert_eq!(engine.missing_structures, vec!["themes_fonts"]);
        assert_eq!(engine.extra_structures, vec!["theme_fonts"]);
        assert!(report.to_string().contains("missing command: initialize_module_registry"));

        let config = ParityConfig {
            command_exceptions: vec!["initialize_module_registry".to_string()],
            structure_exceptions: vec!["counters".to_string(), "themes_fonts".to_string(), "theme_fonts".to_string()],
        };
        assert!(ParityReport::inspect(&[&postgres, &drifting], &config).unwrap().is_clean());
    }

    #[test]
    fn test_reference_adapter_is_required() {
        let document = DocumentAdapter::new();
        assert!(matches!(
            ParityReport::inspect(&[&document], &ParityConfig::default()),
            Err(GateError::Configuration(_))
        ));
    }
}
