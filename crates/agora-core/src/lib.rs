pub mod config;
pub mod decision;
pub mod error;
pub mod graph;
pub mod hub;
pub mod traits;
pub mod types;

pub use config::RunConfig;
pub use error::{AgoraError, Result};
pub use hub::LiveTraceHub;
pub use types::*;
