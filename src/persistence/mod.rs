// Whitelisted persistence dispatch
pub mod catalog;
pub mod command;
pub mod dispatcher;
pub mod parity;
pub mod request;
pub mod whitelist;

pub use catalog::{find_collection, find_table, flatten_name, ColumnDef, ColumnKind, IndexDef, TableDef, TABLES};
pub use command::*;
pub use dispatcher::*;
pub use parity::*;
pub use request::*;
pub use whitelist::*;
