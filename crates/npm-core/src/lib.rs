pub mod chains;
pub mod config;
pub mod status;

pub use chains::*;
pub use config::*;
pub use status::*;
