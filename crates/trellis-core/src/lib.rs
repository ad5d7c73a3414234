pub mod config;
pub mod diff;
pub mod error;
pub mod hooks;
pub mod schema;
pub mod traits;
pub mod types;

pub use config::TrellisConfig;
pub use diff::StateDiff;
pub use error::{Result, TrellisError};
pub use hooks::{LifecycleHooks, TracingHooks};
pub use types::*;
