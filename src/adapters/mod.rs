// Storage engine adapters
pub mod adapter_trait;
pub mod sql;
pub mod postgres_adapter;
pub mod sqlserver_adapter;
pub mod document_store;
pub mod document_adapter;

pub use adapter_trait::*;
pub use sql::*;
pub use postgres_adapter::*;
pub use sqlserver_adapter::*;
pub use document_store::*;
pub use document_adapter::*;
