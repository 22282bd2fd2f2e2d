// Utility modules
pub mod error;
pub mod config;
pub mod types;
pub mod merge;
pub mod logging;

pub use error::*;
pub use config::*;
pub use types::*;
pub use merge::*;
pub use logging::*;
