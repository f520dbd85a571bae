#![doc = "Common types shared across the rq-stats workspace."]

pub mod config;
pub mod error;
pub mod state;
pub mod sync;
pub mod time;

pub use config::*;
pub use error::*;
pub use state::*;
pub use sync::*;
pub use time::*;
