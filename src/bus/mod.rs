// Authenticated event bus
pub mod event_bus;
pub mod handler;
pub mod identity;

pub use event_bus::*;
pub use handler::*;
pub use identity::*;
