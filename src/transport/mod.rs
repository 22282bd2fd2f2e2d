// Network bindings of the bus
pub mod http;

pub use http::*;
