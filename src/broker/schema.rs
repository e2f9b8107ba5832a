//! Broker Schema Model
//!
//! Design Decision: Plain value types shared by every broker layer
//!
//! Capabilities, invocation requests/results and execution records carry no
//! behavior beyond construction helpers and the execution-status transition
//! table. Parameter schemas deserialize directly from the JSON Schema subset
//! providers advertise in `tools/list` (object, array, string, number,
//! integer, boolean with required/enum/default/minimum/maximum).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Argument bag passed to a capability (name → schema-shaped value)
pub type Arguments = serde_json::Map<String, Value>;

/// Identifier assigned to every tracked invocation
pub type ExecutionId = Uuid;

/// JSON Schema primitive kinds understood by the broker
///
/// Unknown or missing `type` keywords deserialize to `Any`, which the schema
/// bridge emits without a `type` constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    #[default]
    #[serde(other)]
    Any,
}

impl SchemaType {
    pub fn is_any(&self) -> bool {
        matches!(self, SchemaType::Any)
    }

    pub fn as_str(&self) -> Option<&'static str> {
        match self {
            SchemaType::Object => Some("object"),
            SchemaType::Array => Some("array"),
            SchemaType::String => Some("string"),
            SchemaType::Number => Some("number"),
            SchemaType::Integer => Some("integer"),
            SchemaType::Boolean => Some("boolean"),
            SchemaType::Any => None,
        }
    }
}

/// Structured parameter schema (recursive)
///
/// Example (as advertised by a provider):
/// ```json
/// {
///   "type": "object",
///   "properties": {
///     "query": { "type": "string", "description": "Search terms" },
///     "depth": { "type": "integer", "minimum": 1, "maximum": 5, "default": 2 }
///   },
///   "required": ["query"]
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type", default, skip_serializing_if = "SchemaType::is_any")]
    pub kind: SchemaType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Object members (only meaningful for `object`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, ParameterSchema>,

    /// Required member names (only meaningful for `object`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    /// Element schema (only meaningful for `array`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterSchema>>,

    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

impl ParameterSchema {
    fn of(kind: SchemaType) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Empty object schema (no properties, nothing required)
    pub fn object() -> Self {
        Self::of(SchemaType::Object)
    }

    pub fn string() -> Self {
        Self::of(SchemaType::String)
    }

    pub fn number() -> Self {
        Self::of(SchemaType::Number)
    }

    pub fn integer() -> Self {
        Self::of(SchemaType::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(SchemaType::Boolean)
    }

    pub fn array(items: ParameterSchema) -> Self {
        Self {
            items: Some(Box::new(items)),
            ..Self::of(SchemaType::Array)
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add an object member, optionally marking it required
    pub fn property(mut self, name: impl Into<String>, schema: ParameterSchema, required: bool) -> Self {
        let name = name.into();
        if required && !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }
}

/// One invokable operation exposed by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    /// Unique within its provider
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "ParameterSchema::object")]
    pub parameters: ParameterSchema,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_schema: Option<ParameterSchema>,

    /// Owning provider, stamped by the adapter and again by the broker
    #[serde(default)]
    pub provider: String,
}

impl Capability {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: ParameterSchema::object(),
            result_schema: None,
            provider: String::new(),
        }
    }

    pub fn with_parameters(mut self, parameters: ParameterSchema) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }
}

/// A single call request (transient, never stored as-is)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationRequest {
    pub provider: String,
    pub capability: String,

    #[serde(default, rename = "args")]
    pub arguments: Arguments,

    /// Caller override in milliseconds; always wins over the policy
    #[serde(default, rename = "timeout", skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl InvocationRequest {
    pub fn new(provider: impl Into<String>, capability: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            capability: capability.into(),
            arguments: Arguments::new(),
            timeout_ms: None,
        }
    }

    pub fn with_arguments(mut self, arguments: Arguments) -> Self {
        self.arguments = arguments;
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Outcome of one transport call
///
/// Serialized as `{ "success", "data" | "error", "executionTime" }` with the
/// execution time in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(rename = "executionTime", with = "duration_millis")]
    pub execution_time: Duration,
}

impl InvocationResult {
    pub fn success(data: Value, execution_time: Duration) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            execution_time,
        }
    }

    pub fn failure(error: impl Into<String>, execution_time: Duration) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            execution_time,
        }
    }

    /// Error text for an unsuccessful result ("unknown error" if none was given)
    pub fn error_message(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

/// Lifecycle of a tracked invocation
///
/// ```text
/// Pending ──dispatch──> Running ──> Completed | Failed | TimedOut
///    └──────────── pre-dispatch error ──────> Failed
/// ```
///
/// `TimedOut` doubles as the "abandoned" marker: the transport call may still
/// be in flight, and its late completion is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::TimedOut
        )
    }

    /// Monotonic transition table; nothing ever leaves a terminal state
    pub fn can_transition_to(&self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (Pending, Running) | (Pending, Failed) | (Running, Completed) | (Running, Failed) | (Running, TimedOut)
        )
    }
}

/// Tracked lifecycle of one invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: ExecutionId,
    pub provider: String,
    pub capability: String,
    pub arguments: Arguments,
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    pub status: ExecutionStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<InvocationResult>,

    /// Failure or timeout message when no transport result exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionRecord {
    pub fn new(provider: impl Into<String>, capability: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            capability: capability.into(),
            arguments,
            started_at: Utc::now(),
            finished_at: None,
            status: ExecutionStatus::Pending,
            result: None,
            error: None,
        }
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
