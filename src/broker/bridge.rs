// Schema bridge: broker capabilities as OpenAI-style function tools
//
// Each discovered capability becomes a function definition an LLM can call,
// and a `BrokerTool` that forwards the call back through `Broker::invoke`.
//
// Reference: https://platform.openai.com/docs/guides/function-calling

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::broker::manager::Broker;
use crate::broker::schema::{Arguments, Capability, InvocationRequest, ParameterSchema, SchemaType};
use crate::error::{BrokerError, Result};
use crate::tool_executor::ToolExecutor;

/// Tool definition in OpenAI function calling format
///
/// # Example
/// ```json
/// {
///   "type": "function",
///   "function": {
///     "name": "get_weather",
///     "description": "Current weather for a city",
///     "parameters": {
///       "type": "object",
///       "properties": {
///         "city": { "type": "string", "description": "City name" }
///       },
///       "required": ["city"],
///       "additionalProperties": false
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Always "function" for function calling
    #[serde(rename = "type")]
    pub tool_type: String,

    pub function: FunctionDefinition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    /// Capability name, unchanged
    pub name: String,

    /// Capability description, unchanged
    pub description: String,

    /// JSON schema for the function parameters
    pub parameters: Value,
}

impl ToolDefinition {
    pub fn from_capability(capability: &Capability) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: capability.name.clone(),
                description: capability.description.clone(),
                parameters: to_function_schema(&capability.parameters),
            },
        }
    }
}

/// Convert a parameter schema into the function-calling JSON schema dialect
///
/// - object → `properties`, `required`, `additionalProperties: false`
/// - array → `items`
/// - primitives → `type`, `enum`, `default`, `minimum`/`maximum`
///
/// `description` is carried at every level.
pub fn to_function_schema(schema: &ParameterSchema) -> Value {
    let mut out = Map::new();
    if let Some(kind) = schema.kind.as_str() {
        out.insert("type".into(), json!(kind));
    }
    if let Some(ref description) = schema.description {
        out.insert("description".into(), json!(description));
    }

    match schema.kind {
        SchemaType::Object => {
            let properties: Map<String, Value> = schema
                .properties
                .iter()
                .map(|(name, property)| (name.clone(), to_function_schema(property)))
                .collect();
            out.insert("properties".into(), Value::Object(properties));
            out.insert("required".into(), json!(schema.required));
            out.insert("additionalProperties".into(), Value::Bool(false));
        }
        SchemaType::Array => {
            let items = schema
                .items
                .as_deref()
                .map(to_function_schema)
                .unwrap_or_else(|| json!({}));
            out.insert("items".into(), items);
        }
        _ => {
            if let Some(ref values) = schema.enum_values {
                out.insert("enum".into(), json!(values));
            }
            if let Some(minimum) = schema.minimum {
                out.insert("minimum".into(), json!(minimum));
            }
            if let Some(maximum) = schema.maximum {
                out.insert("maximum".into(), json!(maximum));
            }
        }
    }

    if let Some(ref default) = schema.default {
        out.insert("default".into(), default.clone());
    }
    Value::Object(out)
}

/// One capability wrapped as a callable function
#[derive(Clone)]
pub struct BrokerTool {
    pub definition: ToolDefinition,
    pub provider: String,
    pub capability: String,
    broker: Broker,
}

impl BrokerTool {
    pub fn new(broker: Broker, capability: &Capability) -> Self {
        Self {
            definition: ToolDefinition::from_capability(capability),
            provider: capability.provider.clone(),
            capability: capability.name.clone(),
            broker,
        }
    }

    /// Forward the call to the broker and unwrap the payload
    ///
    /// A business failure is raised as `ToolFailed`.
    pub async fn call(&self, arguments: Value) -> Result<Value> {
        let arguments: Arguments = match arguments {
            Value::Object(map) => map,
            Value::Null => Arguments::new(),
            other => {
                return Err(BrokerError::ToolFailed {
                    tool: self.capability.clone(),
                    message: format!("arguments must be a JSON object, got {}", other),
                })
            }
        };

        let request = InvocationRequest::new(&self.provider, &self.capability).with_arguments(arguments);
        let result = self.broker.invoke(request).await?;

        if result.success {
            Ok(result.data.unwrap_or(Value::Null))
        } else {
            Err(BrokerError::ToolFailed {
                tool: self.capability.clone(),
                message: result.error_message().to_string(),
            })
        }
    }
}

/// Curated set of broker tools for one agent role
///
/// Keyed by capability name. When providers collide on a name, the one
/// discovered most recently is kept.
#[derive(Clone, Default)]
pub struct ToolSet {
    tools: BTreeMap<String, BrokerTool>,
}

impl ToolSet {
    /// Every capability currently in the broker's catalog
    pub async fn all(broker: &Broker) -> Self {
        Self::select(broker, |_| true).await
    }

    /// Capabilities whose name matches `pattern` (regex)
    pub async fn matching(broker: &Broker, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|e| BrokerError::Config(format!("Invalid tool pattern '{}': {}", pattern, e)))?;
        Ok(Self::select(broker, |capability| pattern.is_match(&capability.name)).await)
    }

    async fn select<F>(broker: &Broker, keep: F) -> Self
    where
        F: Fn(&Capability) -> bool,
    {
        let mut tools = BTreeMap::new();
        for capability in broker.catalog_by_recency().await.iter().filter(|c| keep(*c)) {
            let tool = BrokerTool::new(broker.clone(), capability);
            if let Some(shadowed) = tools.insert(capability.name.clone(), tool) {
                tracing::warn!(
                    "Tool '{}' from '{}' shadowed by '{}'",
                    capability.name,
                    shadowed.provider,
                    capability.provider
                );
            }
        }
        Self { tools }
    }

    /// Function-call menu for the agent, sorted by name
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|tool| tool.definition.clone()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&BrokerTool> {
        self.tools.get(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

#[async_trait]
impl ToolExecutor for ToolSet {
    fn supports(&self, tool_name: &str) -> bool {
        self.tools.contains_key(tool_name)
    }

    async fn execute_tool(&self, tool_name: &str, arguments: &str) -> anyhow::Result<String> {
        let tool = self
            .get(tool_name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", tool_name))?;

        let arguments: Value = if arguments.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(arguments)?
        };

        tracing::debug!("Executing tool '{}' on provider '{}'", tool_name, tool.provider);
        Ok(match tool.call(arguments).await? {
            Value::String(text) => text,
            other => other.to_string(),
        })
    }
}
