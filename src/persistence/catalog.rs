//! Logical schema shared by every engine.
//!
//! Tables are declared once as `schema.table`; the relational adapters render
//! them as dialect DDL and the document adapter as collections named with
//! [`flatten_name`].

/// Storage class of a logical column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// Engine-generated integer identity
    Serial,
    Text,
    BigInt,
    Boolean,
    Json,
    /// UTC instant, exchanged as RFC 3339 text
    Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
    pub nullable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexDef {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub unique: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub schema: &'static str,
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub primary_key: &'static [&'static str],
    pub indexes: &'static [IndexDef],
}

impl TableDef {
    /// Dotted name used by the relational engines and the whitelist
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// Collection name used by the document engine
    pub fn collection_name(&self) -> String {
        flatten_parts(self.schema, self.name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name).collect()
    }

    pub fn serial_column(&self) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.kind == ColumnKind::Serial)
    }

    /// Column sets that must be unique: the primary key plus unique indexes
    pub fn unique_keys(&self) -> Vec<&'static [&'static str]> {
        let mut keys = vec![self.primary_key];
        keys.extend(self.indexes.iter().filter(|i| i.unique).map(|i| i.columns));
        keys
    }
}

/// Map a dotted relational name to its document collection name.
///
/// `schema.table` becomes `schema_table`, except that a table named after its
/// own schema keeps only the table name. Undotted names are returned as is.
pub fn flatten_name(qualified: &str) -> String {
    match qualified.split_once('.') {
        Some((schema, table)) => flatten_parts(schema, table),
        None => qualified.to_string(),
    }
}

fn flatten_parts(schema: &str, table: &str) -> String {
    if schema == table {
        table.to_string()
    } else {
        format!("{}_{}", schema, table)
    }
}

/// Look a table up by its dotted name
pub fn find_table(qualified: &str) -> Option<&'static TableDef> {
    TABLES.iter().find(|t| {
        qualified
            .split_once('.')
            .map(|(schema, name)| t.schema == schema && t.name == name)
            .unwrap_or(false)
    })
}

/// Look a table up by its document collection name
pub fn find_collection(collection: &str) -> Option<&'static TableDef> {
    TABLES.iter().find(|t| t.collection_name() == collection)
}

const fn col(name: &'static str, kind: ColumnKind, nullable: bool) -> ColumnDef {
    ColumnDef { name, kind, nullable }
}

const fn idx(name: &'static str, columns: &'static [&'static str], unique: bool) -> IndexDef {
    IndexDef { name, columns, unique }
}

use ColumnKind::*;

pub const SETTINGS: TableDef = TableDef {
    schema: "settings",
    name: "settings",
    columns: &[
        col("key", Text, false),
        col("value", Text, true),
        col("updated_at", Timestamp, true),
    ],
    primary_key: &["key"],
    indexes: &[],
};

pub const USERS: TableDef = TableDef {
    schema: "users",
    name: "users",
    columns: &[
        col("id", Serial, false),
        col("username", Text, false),
        col("email", Text, true),
        col("password_hash", Text, false),
        col("role", Text, false),
        col("created_at", Timestamp, true),
    ],
    primary_key: &["id"],
    indexes: &[idx("users_username_key", &["username"], true)],
};

pub const USER_SESSIONS: TableDef = TableDef {
    schema: "users",
    name: "sessions",
    columns: &[
        col("id", Text, false),
        col("user_id", BigInt, false),
        col("expires_at", Timestamp, false),
    ],
    primary_key: &["id"],
    indexes: &[idx("sessions_user_id_idx", &["user_id"], false)],
};

pub const PAGES: TableDef = TableDef {
    schema: "pages",
    name: "pages",
    columns: &[
        col("id", Serial, false),
        col("slug", Text, false),
        col("title", Text, false),
        col("layout", Json, true),
        col("published", Boolean, false),
        col("updated_at", Timestamp, true),
    ],
    primary_key: &["id"],
    indexes: &[idx("pages_slug_key", &["slug"], true)],
};

pub const PAGE_WIDGETS: TableDef = TableDef {
    schema: "pages",
    name: "widgets",
    columns: &[
        col("id", Serial, false),
        col("page_id", BigInt, false),
        col("widget_type", Text, false),
        col("position", BigInt, false),
        col("config", Json, true),
    ],
    primary_key: &["id"],
    indexes: &[idx("widgets_page_id_idx", &["page_id"], false)],
};

pub const TRANSLATIONS: TableDef = TableDef {
    schema: "translations",
    name: "translations",
    columns: &[
        col("id", Serial, false),
        col("language", Text, false),
        col("namespace", Text, false),
        col("key", Text, false),
        col("value", Text, true),
    ],
    primary_key: &["id"],
    indexes: &[idx(
        "translations_language_namespace_key_key",
        &["language", "namespace", "key"],
        true,
    )],
};

pub const TRANSLATION_LANGUAGES: TableDef = TableDef {
    schema: "translations",
    name: "languages",
    columns: &[
        col("code", Text, false),
        col("name", Text, false),
        col("enabled", Boolean, false),
    ],
    primary_key: &["code"],
    indexes: &[],
};

pub const NOTIFICATIONS: TableDef = TableDef {
    schema: "notifications",
    name: "notifications",
    columns: &[
        col("id", Serial, false),
        col("recipient", Text, false),
        col("channel", Text, false),
        col("body", Json, true),
        col("sent_at", Timestamp, true),
        col("created_at", Timestamp, true),
    ],
    primary_key: &["id"],
    indexes: &[idx("notifications_recipient_idx", &["recipient"], false)],
};

pub const THEMES: TableDef = TableDef {
    schema: "themes",
    name: "themes",
    columns: &[
        col("id", Serial, false),
        col("name", Text, false),
        col("active", Boolean, false),
        col("variables", Json, true),
    ],
    primary_key: &["id"],
    indexes: &[idx("themes_name_key", &["name"], true)],
};

pub const THEME_FONTS: TableDef = TableDef {
    schema: "themes",
    name: "fonts",
    columns: &[
        col("id", Serial, false),
        col("theme_id", BigInt, false),
        col("family", Text, false),
        col("source", Text, false),
    ],
    primary_key: &["id"],
    indexes: &[idx("fonts_theme_id_idx", &["theme_id"], false)],
};

pub const MODULE_REGISTRY: TableDef = TableDef {
    schema: "modules",
    name: "modules",
    columns: &[
        col("name", Text, false),
        col("module_type", Text, false),
        col("version", Text, false),
        col("enabled", Boolean, false),
        col("installed_at", Timestamp, true),
    ],
    primary_key: &["name"],
    indexes: &[],
};

/// Every logical table, in creation order
pub const TABLES: &[TableDef] = &[
    SETTINGS,
    USERS,
    USER_SESSIONS,
    PAGES,
    PAGE_WIDGETS,
    TRANSLATIONS,
    TRANSLATION_LANGUAGES,
    NOTIFICATIONS,
    THEMES,
    THEME_FONTS,
    MODULE_REGISTRY,
];
