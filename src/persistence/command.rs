use std::fmt;
use std::str::FromStr;

use crate::persistence::catalog::{self, TableDef};
use crate::utils::error::GateError;

/// Schema-level operations every engine adapter must implement.
///
/// Adapters match on this enum exhaustively, so adding a command without
/// teaching every engine about it does not compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SymbolicCommand {
    InitializeSettingsTables,
    InitializeUserTables,
    InitializePageTables,
    InitializeTranslationTables,
    InitializeNotificationTables,
    InitializeThemeTables,
    InitializeModuleRegistry,
}

impl SymbolicCommand {
    pub const ALL: [SymbolicCommand; 7] = [
        SymbolicCommand::InitializeSettingsTables,
        SymbolicCommand::InitializeUserTables,
        SymbolicCommand::InitializePageTables,
        SymbolicCommand::InitializeTranslationTables,
        SymbolicCommand::InitializeNotificationTables,
        SymbolicCommand::InitializeThemeTables,
        SymbolicCommand::InitializeModuleRegistry,
    ];

    /// Wire name carried in `data.command`
    pub fn name(&self) -> &'static str {
        match self {
            SymbolicCommand::InitializeSettingsTables => "initialize_settings_tables",
            SymbolicCommand::InitializeUserTables => "initialize_user_tables",
            SymbolicCommand::InitializePageTables => "initialize_page_tables",
            SymbolicCommand::InitializeTranslationTables => "initialize_translation_tables",
            SymbolicCommand::InitializeNotificationTables => "initialize_notification_tables",
            SymbolicCommand::InitializeThemeTables => "initialize_theme_tables",
            SymbolicCommand::InitializeModuleRegistry => "initialize_module_registry",
        }
    }

    /// Logical tables the command creates, in dependency order
    pub fn tables(&self) -> &'static [TableDef] {
        match self {
            SymbolicCommand::InitializeSettingsTables => &[catalog::SETTINGS],
            SymbolicCommand::InitializeUserTables => &[catalog::USERS, catalog::USER_SESSIONS],
            SymbolicCommand::InitializePageTables => &[catalog::PAGES, catalog::PAGE_WIDGETS],
            SymbolicCommand::InitializeTranslationTables => {
                &[catalog::TRANSLATIONS, catalog::TRANSLATION_LANGUAGES]
            }
            SymbolicCommand::InitializeNotificationTables => &[catalog::NOTIFICATIONS],
            SymbolicCommand::InitializeThemeTables => &[catalog::THEMES, catalog::THEME_FONTS],
            SymbolicCommand::InitializeModuleRegistry => &[catalog::MODULE_REGISTRY],
        }
    }
}

impl fmt::Display for SymbolicCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SymbolicCommand {
    type Err = GateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SymbolicCommand::ALL
            .iter()
            .copied()
            .find(|c| c.name() == s)
            .ok_or_else(|| GateError::validation(format!("unknown symbolic command '{}'", s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_names_round_trip() {
        for command in SymbolicCommand::ALL {
            assert_eq!(command.name().parse::<SymbolicCommand>().unwrap(), command);
            assert_eq!(command.to_string(), command.name());
        }
    }

    #[test]
    fn test_unknown_command_is_validation_error() {
        match "drop_everything".parse::<SymbolicCommand>() {
            Err(GateError::Validation(msg)) => assert!(msg.contains("drop_everything")),
            other => panic!("Expected Validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_every_table_is_created_by_exactly_one_command() {
        let mut created = HashSet::new();
        for command in SymbolicCommand::ALL {
            assert!(!command.tables().is_empty());
            for table in command.tables() {
                assert!(created.insert(table.qualified_name()));
            }
        }
        assert_eq!(created.len(), catalog::TABLES.len());
    }
}
