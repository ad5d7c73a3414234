pub mod engine;
pub mod evaluator;
pub mod interpolate;
pub mod navigation;
mod render;
mod saga;
pub mod session;
pub mod validation;

pub use engine::{Engine, EngineBuilder};
pub use evaluator::DefaultEvaluator;
pub use interpolate::TemplateInterpolator;
pub use session::SessionManager;
