use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use trellis_adapters::JsonNodeParser;
use trellis_core::config::EngineSection;
use trellis_core::error::{Result, TrellisError};
use trellis_core::hooks::LifecycleHooks;
use trellis_core::schema::SchemaRegistry;
use trellis_core::traits::{ConditionEvaluator, GraphLoader, Interpolator, NodeParser};
use trellis_core::types::{
    ActionRequest, EventType, NavigationInput, Node, NodeEvent, State, Status, ToolCall,
    ToolEvent,
};

use crate::evaluator::DefaultEvaluator;
use crate::interpolate::TemplateInterpolator;
use crate::validation;

/// The state-machine runner.
///
/// Holds only its collaborators and settings. Every operation takes the
/// session `State` by reference and returns a new one; nothing about a
/// session is remembered between calls.
pub struct Engine {
    pub(crate) loader: Arc<dyn GraphLoader>,
    pub(crate) parser: Arc<dyn NodeParser>,
    pub(crate) evaluator: Option<Arc<dyn ConditionEvaluator>>,
    pub(crate) interpolator: Option<Arc<dyn Interpolator>>,
    pub(crate) hooks: Option<Arc<dyn LifecycleHooks>>,
    pub(crate) schemas: SchemaRegistry,
    pub(crate) entry_node: String,
    pub(crate) default_error_node: Option<String>,
    pub(crate) history_warn_threshold: usize,
}

/// Assembles an [`Engine`]. Evaluator and interpolator default to the
/// built-in ones and can be removed; hooks are off unless supplied.
pub struct EngineBuilder {
    loader: Arc<dyn GraphLoader>,
    parser: Arc<dyn NodeParser>,
    evaluator: Option<Arc<dyn ConditionEvaluator>>,
    interpolator: Option<Arc<dyn Interpolator>>,
    hooks: Option<Arc<dyn LifecycleHooks>>,
    schemas: SchemaRegistry,
    entry_node: String,
    default_error_node: Option<String>,
    history_warn_threshold: usize,
}

impl EngineBuilder {
    pub fn new(loader: Arc<dyn GraphLoader>) -> Self {
        Self::from_config(loader, &EngineSection::default())
    }

    /// Start from the `[engine]` section of a config file.
    pub fn from_config(loader: Arc<dyn GraphLoader>, config: &EngineSection) -> Self {
        Self {
            loader,
            parser: Arc::new(JsonNodeParser),
            evaluator: Some(Arc::new(DefaultEvaluator)),
            interpolator: Some(Arc::new(TemplateInterpolator)),
            hooks: None,
            schemas: SchemaRegistry::new(),
            entry_node: config.entry_node.clone(),
            default_error_node: config.default_error_node.clone(),
            history_warn_threshold: config.history_warn_threshold,
        }
    }

    pub fn parser(mut self, parser: Arc<dyn NodeParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn evaluator(mut self, evaluator: Arc<dyn ConditionEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }

    /// Conditional transitions are skipped entirely without an evaluator.
    pub fn without_evaluator(mut self) -> Self {
        self.evaluator = None;
        self
    }

    pub fn interpolator(mut self, interpolator: Arc<dyn Interpolator>) -> Self {
        self.interpolator = Some(interpolator);
        self
    }

    /// Render content and tool arguments verbatim.
    pub fn without_interpolator(mut self) -> Self {
        self.interpolator = None;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn LifecycleHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn entry_node(mut self, id: impl Into<String>) -> Self {
        self.entry_node = id.into();
        self
    }

    pub fn default_error_node(mut self, id: impl Into<String>) -> Self {
        self.default_error_node = Some(id.into());
        self
    }

    pub fn history_warn_threshold(mut self, len: usize) -> Self {
        self.history_warn_threshold = len;
        self
    }

    /// Register a custom `context_schema` type.
    pub fn schema_type<F>(mut self, name: impl Into<String>, validate: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.schemas.register(name, validate);
        self
    }

    pub fn build(self) -> Engine {
        Engine {
            loader: self.loader,
            parser: self.parser,
            evaluator: self.evaluator,
            interpolator: self.interpolator,
            hooks: self.hooks,
            schemas: self.schemas,
            entry_node: self.entry_node,
            default_error_node: self.default_error_node,
            history_warn_threshold: self.history_warn_threshold,
        }
    }
}

impl Engine {
    pub fn builder(loader: Arc<dyn GraphLoader>) -> EngineBuilder {
        EngineBuilder::new(loader)
    }

    pub fn entry_node(&self) -> &str {
        &self.entry_node
    }

    /// Create a session positioned at the entry node.
    ///
    /// Context is the entry node's `default_context` overlaid with
    /// `initial_context`. If the entry node carries a tool call the session
    /// starts out waiting for it.
    pub async fn start(
        &self,
        session_id: &str,
        initial_context: HashMap<String, Value>,
        cancel: &CancellationToken,
    ) -> Result<State> {
        let node = self.fetch_node(&self.entry_node, cancel).await?;

        let mut state = State::new(session_id, self.entry_node.clone());
        state.context.extend(node.default_context.clone());
        state.context.extend(initial_context);

        if let Some(call) = &node.r#do {
            state.status = Status::WaitingForTool;
            state.pending_tool_call = Some(call.correlation_id().to_string());
        }

        info!(session_id, node_id = %node.id, status = %state.status, "Session started");
        self.emit_node_enter(&state.session_id, &node);
        Ok(state)
    }

    /// Compute what the host should do for the current node.
    ///
    /// Read-only: repeated calls on the same state give the same actions,
    /// including the same idempotency keys. Returns the actions and whether
    /// the node is terminal.
    pub async fn render(
        &self,
        state: &State,
        cancel: &CancellationToken,
    ) -> Result<(Vec<ActionRequest>, bool)> {
        if state.is_terminated() {
            return Ok((vec![], true));
        }

        let node = self.fetch_node(&state.current_node_id, cancel).await?;
        validation::validate_execution(&node, state.status)?;
        validation::validate_context(&node, state, &self.schemas)?;

        let mut actions = Vec::new();
        if let Some(text) = self.render_content(&node, state)? {
            actions.push(ActionRequest::RenderContent(text));
        }
        if let Some(request) = self.render_input_request(&node) {
            actions.push(ActionRequest::RequestInput(request));
        }
        if let Some(call) = self.render_tool_call(&node, state)? {
            self.emit_tool_call(&state.session_id, &node.id, &call);
            actions.push(ActionRequest::CallTool(call));
        }

        Ok((actions, node.is_terminal()))
    }

    /// Advance the session with user input or a tool completion.
    pub async fn navigate(
        &self,
        state: &State,
        input: NavigationInput,
        cancel: &CancellationToken,
    ) -> Result<State> {
        if state.is_terminated() {
            return Err(TrellisError::SessionTerminated(state.session_id.clone()));
        }

        match (state.status, input) {
            (Status::WaitingForTool | Status::RollingBack, NavigationInput::Tool(result)) => {
                let pending = state.pending_tool_call.as_deref().unwrap_or_default();
                if result.id != pending {
                    return Err(TrellisError::ToolResultMismatch {
                        expected: pending.to_string(),
                        got: result.id,
                    });
                }
                if state.status == Status::RollingBack {
                    return self.resume_rollback(state, &result, cancel).await;
                }
                let node = self.fetch_node(&state.current_node_id, cancel).await?;
                self.handle_tool_result(state, &node, &result, cancel).await
            }
            (Status::WaitingForTool | Status::RollingBack, NavigationInput::User(_)) => {
                Err(TrellisError::UnexpectedInput {
                    status: state.status.to_string(),
                    message: format!(
                        "expected the result of tool call {}",
                        state.pending_tool_call.as_deref().unwrap_or("<none>")
                    ),
                })
            }
            (_, NavigationInput::Tool(result)) => Err(TrellisError::UnexpectedInput {
                status: state.status.to_string(),
                message: format!("no tool call is pending, got result {}", result.id),
            }),
            (_, NavigationInput::User(value)) => {
                let node = self.fetch_node(&state.current_node_id, cancel).await?;
                validation::validate_execution(&node, state.status)?;
                self.navigate_active(state.clone(), &node, value, cancel).await
            }
        }
    }

    /// Deliver an out-of-band signal such as `interrupt` or `timeout`.
    ///
    /// A node handler for `name` wins over everything, including a pending
    /// tool call. Without a handler the state is left alone and
    /// `UnhandledSignal` is returned.
    pub async fn signal(
        &self,
        state: &State,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<State> {
        let node = self.fetch_node(&state.current_node_id, cancel).await?;
        let Some(target) = node.on_signal.get(name) else {
            debug!(session_id = %state.session_id, node_id = %node.id, signal = name, "Signal not handled");
            return Err(TrellisError::UnhandledSignal(name.to_string()));
        };

        info!(session_id = %state.session_id, node_id = %node.id, signal = name, target = %target, "Signal received");
        let mut next = state.clone();
        next.status = Status::Active;
        next.pending_tool_call = None;
        self.leave_for(next, &node, target, cancel).await
    }

    /// Every node in the graph, parsed, in loader order.
    pub async fn inspect(&self, cancel: &CancellationToken) -> Result<Vec<Node>> {
        let ids = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TrellisError::Cancelled),
            ids = self.loader.list_nodes() => ids?,
        };

        let mut nodes = Vec::with_capacity(ids.len());
        for id in ids {
            nodes.push(self.fetch_node(&id, cancel).await?);
        }
        Ok(nodes)
    }

    /// IDs of nodes changed in the underlying graph, until `cancel` fires.
    /// `None` when the loader cannot watch its source.
    pub fn watch(&self, cancel: &CancellationToken) -> Option<BoxStream<'static, String>> {
        let changes = self.loader.watch()?;
        Some(
            changes
                .take_until(cancel.clone().cancelled_owned())
                .boxed(),
        )
    }

    /// Deterministic key for a tool dispatch at the state's current step.
    pub fn idempotency_key(state: &State, tool_name: &str) -> String {
        let raw = format!(
            "{}:{}:{}",
            state.session_id,
            state.history.len(),
            tool_name
        );
        format!("{:x}", Sha256::digest(raw.as_bytes()))
    }

    pub(crate) async fn fetch_node(&self, id: &str, cancel: &CancellationToken) -> Result<Node> {
        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TrellisError::Cancelled),
            raw = self.loader.get_node(id) => raw?,
        };
        self.parser.parse(&raw)
    }

    pub(crate) fn warn_on_history_growth(&self, state: &State) {
        if state.history.len() > self.history_warn_threshold {
            warn!(
                session_id = %state.session_id,
                history_len = state.history.len(),
                threshold = self.history_warn_threshold,
                "Session history is growing large; rollback depth is unbounded"
            );
        }
    }

    pub(crate) fn emit_node_enter(&self, session_id: &str, node: &Node) {
        if let Some(hooks) = &self.hooks {
            hooks.on_node_enter(&node_event(EventType::NodeEnter, session_id, node));
        }
    }

    pub(crate) fn emit_node_leave(&self, session_id: &str, node: &Node) {
        if let Some(hooks) = &self.hooks {
            hooks.on_node_leave(&node_event(EventType::NodeLeave, session_id, node));
        }
    }

    fn emit_tool_call(&self, session_id: &str, node_id: &str, call: &ToolCall) {
        if let Some(hooks) = &self.hooks {
            let args: serde_json::Map<String, Value> = call
                .args
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect();
            hooks.on_tool_call(&ToolEvent {
                event_type: EventType::ToolCall,
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                node_id: node_id.to_string(),
                tool_name: call.name.clone(),
                input: Some(Value::Object(args)),
                output: None,
                is_error: false,
            });
        }
    }

    pub(crate) fn emit_tool_return(
        &self,
        session_id: &str,
        node_id: &str,
        tool_name: &str,
        output: &Value,
        is_error: bool,
    ) {
        if let Some(hooks) = &self.hooks {
            hooks.on_tool_return(&ToolEvent {
                event_type: EventType::ToolReturn,
                timestamp: Utc::now(),
                session_id: session_id.to_string(),
                node_id: node_id.to_string(),
                tool_name: tool_name.to_string(),
                input: None,
                output: Some(output.clone()),
                is_error,
            });
        }
    }
}

fn node_event(event_type: EventType, session_id: &str, node: &Node) -> NodeEvent {
    NodeEvent {
        event_type,
        timestamp: Utc::now(),
        session_id: session_id.to_string(),
        node_id: node.id.clone(),
        node_type: node.node_type,
    }
}

pub(crate) fn is_rollback_target(target: &str) -> bool {
    target.eq_ignore_ascii_case(trellis_core::types::ROLLBACK_TARGET)
}
