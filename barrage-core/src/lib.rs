mod config;
mod constants;
mod data;
mod document;
mod error;
mod schedule;
mod stats;
mod threshold;

pub use config::*;
pub use constants::*;
pub use data::*;
pub use document::*;
pub use error::*;
pub use stats::*;
pub use threshold::*;
