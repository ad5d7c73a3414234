//! Trellis: a durable, resumable state-machine runtime for interactive flow
//! graphs.
//!
//! A host builds an [`Engine`] over a [`GraphLoader`], calls
//! [`Engine::start`] to create a session, then alternates
//! [`Engine::render`] with [`Engine::navigate`] or [`Engine::signal`].
//! [`SessionManager`] serializes persisted reads and writes per session.

pub use trellis_core::config::{EngineSection, SessionSection, StoreBackend, StoreConfig};
pub use trellis_core::error::{
    ContextTypeValidationError, ContextValidationError, Result, SchemaViolation, TrellisError,
    UnhandledToolError,
};
pub use trellis_core::hooks::{LifecycleHooks, TracingHooks};
pub use trellis_core::schema::{SchemaRegistry, SchemaType};
pub use trellis_core::traits::{
    ConditionEvaluator, DistributedLocker, GraphLoader, Interpolator, NodeParser, StateStore,
};
pub use trellis_core::types::*;
pub use trellis_core::{StateDiff, TrellisConfig};

pub use trellis_adapters::{
    open_store, FileStateStore, JsonNodeParser, MemoryLoader, MemoryStateStore, SqliteStateStore,
};
pub use trellis_engine::{DefaultEvaluator, Engine, EngineBuilder, SessionManager, TemplateInterpolator};
