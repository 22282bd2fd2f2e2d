// Modules hosted on the event bus
pub mod host;
pub mod module_trait;
pub mod settings;

pub use host::*;
pub use module_trait::*;
pub use settings::*;
