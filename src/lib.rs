pub mod adapters;
pub mod bus;
pub mod cli;
pub mod modules;
pub mod persistence;
pub mod transport;
pub mod utils;

pub use adapters::*;
pub use bus::*;
pub use modules::*;
pub use persistence::*;
pub use utils::*;
