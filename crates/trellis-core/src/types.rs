use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Metadata key carrying the deterministic idempotency key of a rendered tool call.
pub const KEY_IDEMPOTENCY: &str = "idempotency_key";

/// Reserved namespace for engine-owned context.
pub const SYSTEM_NAMESPACE: &str = "sys";

/// SystemContext key holding the most recent navigation input (`sys.ans`).
pub const KEY_ANSWER: &str = "ans";

/// Transition target that starts a SAGA rollback instead of jumping to a node.
pub const ROLLBACK_TARGET: &str = "rollback";

pub const SIGNAL_INTERRUPT: &str = "interrupt";
pub const SIGNAL_SHUTDOWN: &str = "shutdown";
pub const SIGNAL_TIMEOUT: &str = "timeout";

/// Generate a random session identifier.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Kind of vertex in the flow graph.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    Text,
    Question,
    Tool,
    Start,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Text => "text",
            NodeType::Question => "question",
            NodeType::Tool => "tool",
            NodeType::Start => "start",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed, optionally conditional edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(default, alias = "from", skip_serializing_if = "Option::is_none")]
    pub from_node_id: Option<String>,
    #[serde(alias = "to")]
    pub to_node_id: String,
    /// Empty means unconditional.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub condition: String,
}

impl Transition {
    /// Create an unconditional transition.
    pub fn always(to: impl Into<String>) -> Self {
        Self {
            from_node_id: None,
            to_node_id: to.into(),
            condition: String::new(),
        }
    }

    /// Create a conditional transition.
    pub fn when(condition: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_node_id: None,
            to_node_id: to.into(),
            condition: condition.into(),
        }
    }

    pub fn is_conditional(&self) -> bool {
        !self.condition.trim().is_empty()
    }
}

/// A side effect the engine asks the host to perform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub args: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub idempotency_key: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.args.insert(key.into(), value);
        self
    }

    /// The identifier a `ToolResult` must echo back: the call ID, or the name when no ID is set.
    pub fn correlation_id(&self) -> &str {
        if self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }
}

/// Outcome of a tool call, reported by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub id: String,
    #[serde(default)]
    pub result: Value,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub is_denied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result,
            ..Default::default()
        }
    }

    pub fn error(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_error: true,
            error: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn denied(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_denied: true,
            ..Default::default()
        }
    }

    /// Human-readable failure cause: the error string, falling back to the result payload.
    pub fn cause(&self) -> String {
        match &self.error {
            Some(e) if !e.is_empty() => e.clone(),
            _ => match &self.result {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }
}

/// A vertex in the flow graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub content: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub transitions: Vec<Transition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_denied: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub on_signal: BTreeMap<String, String>,
    pub wait: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_to: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required_context: Vec<String>,
    /// Key → type name (`string`, `int`, `float`, `bool`, `[T]`, or a registered custom type).
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub context_schema: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub default_context: HashMap<String, Value>,
    /// Duration string such as `30s`; also marks the node as non-terminal.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#do: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo: Option<ToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_type: Option<InputType>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub input_options: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_default: Option<String>,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

impl Node {
    /// Create a text node with no edges.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn with_type(mut self, node_type: NodeType) -> Self {
        self.node_type = node_type;
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    pub fn with_transition(mut self, transition: Transition) -> Self {
        self.transitions.push(transition);
        self
    }

    /// Append an unconditional transition.
    pub fn to(self, target: impl Into<String>) -> Self {
        self.with_transition(Transition::always(target))
    }

    pub fn with_do(mut self, call: ToolCall) -> Self {
        self.r#do = Some(call);
        self
    }

    pub fn with_undo(mut self, call: ToolCall) -> Self {
        self.undo = Some(call);
        self
    }

    pub fn with_on_error(mut self, target: impl Into<String>) -> Self {
        self.on_error = Some(target.into());
        self
    }

    pub fn with_on_denied(mut self, target: impl Into<String>) -> Self {
        self.on_denied = Some(target.into());
        self
    }

    pub fn with_signal(mut self, name: impl Into<String>, target: impl Into<String>) -> Self {
        self.on_signal.insert(name.into(), target.into());
        self
    }

    pub fn with_save_to(mut self, key: impl Into<String>) -> Self {
        self.save_to = Some(key.into());
        self
    }

    pub fn with_input(mut self, input_type: InputType) -> Self {
        self.input_type = Some(input_type);
        self
    }

    pub fn with_input_default(mut self, default: impl Into<String>) -> Self {
        self.input_default = Some(default.into());
        self
    }

    pub fn with_required_context(mut self, keys: Vec<String>) -> Self {
        self.required_context = keys;
        self
    }

    pub fn with_schema(mut self, key: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.context_schema.insert(key.into(), type_name.into());
        self
    }

    pub fn with_default_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.default_context.insert(key.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: impl Into<String>) -> Self {
        self.timeout = Some(timeout.into());
        self
    }

    pub fn with_wait(mut self) -> Self {
        self.wait = true;
        self
    }

    /// Whether rendering this node pauses for user input.
    pub fn needs_input(&self) -> bool {
        self.wait || self.node_type == NodeType::Question || self.input_type.is_some()
    }

    /// A node with no way out: no transitions, no timeout, no signal handlers.
    pub fn is_terminal(&self) -> bool {
        self.transitions.is_empty() && self.timeout.is_none() && self.on_signal.is_empty()
    }
}

/// Parse a short duration literal (`500ms`, `30s`, `2m`, `1h`, or bare seconds).
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(raw.len());
    let (number, unit) = raw.split_at(split);
    let value: f64 = number.parse().ok()?;
    if value.is_sign_negative() || !value.is_finite() {
        return None;
    }
    let secs = match unit.trim() {
        "ms" => value / 1000.0,
        "" | "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };
    // Out-of-range values are unparseable, not a panic.
    Duration::try_from_secs_f64(secs).ok()
}

/// Current execution mode of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    #[default]
    Active,
    WaitingForTool,
    RollingBack,
    Terminated,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Active => "active",
            Status::WaitingForTool => "waiting_for_tool",
            Status::RollingBack => "rolling_back",
            Status::Terminated => "terminated",
        };
        f.write_str(s)
    }
}

/// Snapshot of one session's execution.
///
/// Values are never mutated in place by the engine: every operation clones
/// the input and returns a fresh state. `status` is the source of truth for
/// termination; the legacy `terminated` flag only exists on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "StateRecord", into = "StateRecord")]
pub struct State {
    pub session_id: String,
    pub current_node_id: String,
    pub status: Status,
    pub pending_tool_call: Option<String>,
    pub context: HashMap<String, Value>,
    pub system_context: HashMap<String, Value>,
    /// Visited node IDs; also the rollback stack (popped from the tail only).
    pub history: Vec<String>,
}

impl State {
    /// Fresh state positioned at `start_node_id`.
    pub fn new(session_id: impl Into<String>, start_node_id: impl Into<String>) -> Self {
        let start = start_node_id.into();
        Self {
            session_id: session_id.into(),
            current_node_id: start.clone(),
            status: Status::Active,
            pending_tool_call: None,
            context: HashMap::new(),
            system_context: HashMap::new(),
            history: vec![start],
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.status == Status::Terminated
    }

    /// Look a key up in Context, then SystemContext.
    pub fn lookup(&self, key: &str) -> Option<&Value> {
        self.context
            .get(key)
            .or_else(|| self.system_context.get(key))
    }

    /// Context merged with SystemContext under the `sys` key, as seen by templates.
    pub fn template_data(&self) -> Value {
        let mut data: serde_json::Map<String, Value> = self
            .context
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let sys: serde_json::Map<String, Value> = self
            .system_context
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        data.insert(SYSTEM_NAMESPACE.to_string(), Value::Object(sys));
        Value::Object(data)
    }
}

/// Wire form of [`State`], carrying the derived legacy `terminated` flag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateRecord {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    current_node_id: String,
    #[serde(default)]
    status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pending_tool_call: Option<String>,
    #[serde(default)]
    context: HashMap<String, Value>,
    #[serde(default)]
    system_context: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    history: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    terminated: bool,
}

impl From<StateRecord> for State {
    fn from(r: StateRecord) -> Self {
        // Records written before `status` existed only carry the flag.
        let status = if r.terminated {
            Status::Terminated
        } else {
            r.status
        };
        Self {
            session_id: r.session_id,
            current_node_id: r.current_node_id,
            status,
            pending_tool_call: r.pending_tool_call.filter(|p| !p.is_empty()),
            context: r.context,
            system_context: r.system_context,
            history: r.history,
        }
    }
}

impl From<State> for StateRecord {
    fn from(s: State) -> Self {
        Self {
            terminated: s.is_terminated(),
            session_id: s.session_id,
            current_node_id: s.current_node_id,
            status: s.status,
            pending_tool_call: s.pending_tool_call,
            context: s.context,
            system_context: s.system_context,
            history: s.history,
        }
    }
}

/// What `Navigate` is being fed.
#[derive(Debug, Clone, PartialEq)]
pub enum NavigationInput {
    /// A value supplied by the user (or host on the user's behalf).
    User(Value),
    /// Completion of the pending tool call.
    Tool(ToolResult),
}

impl NavigationInput {
    pub fn text(s: impl Into<String>) -> Self {
        NavigationInput::User(Value::String(s.into()))
    }
}

impl From<ToolResult> for NavigationInput {
    fn from(r: ToolResult) -> Self {
        NavigationInput::Tool(r)
    }
}

/// Kind of input the host should collect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputType {
    #[default]
    Text,
    Confirm,
    Choice,
}

/// Constraints on the input being requested.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputRequest {
    #[serde(rename = "type")]
    pub input_type: InputType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
}

/// An action the host should perform after `Render`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionRequest {
    RenderContent(String),
    RequestInput(InputRequest),
    CallTool(ToolCall),
}

impl ActionRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            ActionRequest::RenderContent(_) => "RENDER_CONTENT",
            ActionRequest::RequestInput(_) => "REQUEST_INPUT",
            ActionRequest::CallTool(_) => "CALL_TOOL",
        }
    }
}

/// Lifecycle event categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    NodeEnter,
    NodeLeave,
    ToolCall,
    ToolReturn,
}

/// Entry into or exit from a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub node_id: String,
    pub node_type: NodeType,
}

/// A tool being requested or reporting back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolEvent {
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub node_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default)]
    pub is_error: bool,
}
