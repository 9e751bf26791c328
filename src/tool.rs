//! Tool protocol and registry
//!
//! A tool is identified by `service:name` and declared by a
//! JSON-schema-compatible parameter descriptor. Tools are invoked through a
//! registry keyed by service. Execution results carry data, metadata, and an
//! optional control hint for the next iteration.

use crate::error::ToolError;
use crate::event::ToolControl;
use crate::types::ToolId;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// JSON-schema-compatible type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

/// Declaration of a single tool parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub required: bool,
    pub description: String,
    /// Allowed values; matched case-insensitively against model output
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "enum")]
    pub enum_values: Option<Vec<String>>,
}

impl ParameterSchema {
    pub fn required(param_type: ParameterType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            required: true,
            description: description.into(),
            enum_values: None,
        }
    }

    pub fn optional(param_type: ParameterType, description: impl Into<String>) -> Self {
        Self {
            param_type,
            required: false,
            description: description.into(),
            enum_values: None,
        }
    }

    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }
}

/// Static description of a tool, shown to the model when deciding calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub id: ToolId,
    pub description: String,
    /// Parameter name → schema; BTreeMap keeps prompt rendering stable
    pub parameters: BTreeMap<String, ParameterSchema>,
}

/// What a tool returns on success
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub data: Value,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control: Option<ToolControl>,
}

impl ToolOutcome {
    pub fn data(data: Value) -> Self {
        Self {
            data,
            metadata: HashMap::new(),
            control: None,
        }
    }

    pub fn with_control(mut self, control: ToolControl) -> Self {
        self.control = Some(control);
        self
    }
}

/// Trait implemented by tool services' individual tools
#[async_trait]
pub trait Tool: Send + Sync {
    /// The tool's static descriptor (id, description, parameter schemas)
    fn descriptor(&self) -> &ToolDescriptor;

    /// Run the tool. Errors are recorded in the call result, never retried
    /// by the engine.
    async fn execute(&self, arguments: BTreeMap<String, Value>) -> Result<ToolOutcome, ToolError>;
}

/// Validate and normalize model-produced arguments against a descriptor.
///
/// Required arguments must be present. Numeric arguments tolerate int/float
/// coercion. Enum arguments are matched case-insensitively and normalized to
/// the declared casing. Values are never invented: anything the model did
/// not produce stays absent.
pub fn conform_arguments(
    descriptor: &ToolDescriptor,
    arguments: &serde_json::Map<String, Value>,
) -> Result<BTreeMap<String, Value>, ToolError> {
    let mut conformed = BTreeMap::new();

    for (name, schema) in &descriptor.parameters {
        let value = match arguments.get(name) {
            Some(Value::Null) | None => {
                if schema.required {
                    return Err(ToolError::InvalidArguments {
                        tool_id: descriptor.id.clone(),
                        reason: format!("missing required argument: {}", name),
                    });
                }
                continue;
            }
            Some(value) => value,
        };

        let normalized = conform_value(value, schema).map_err(|reason| {
            ToolError::InvalidArguments {
                tool_id: descriptor.id.clone(),
                reason: format!("argument `{}`: {}", name, reason),
            }
        })?;
        conformed.insert(name.clone(), normalized);
    }

    Ok(conformed)
}

fn conform_value(value: &Value, schema: &ParameterSchema) -> Result<Value, String> {
    if let Some(allowed) = &schema.enum_values {
        let text = match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return allowed
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(&text))
            .map(|canonical| Value::String(canonical.clone()))
            .ok_or_else(|| format!("`{}` is not one of {:?}", text, allowed));
    }

    match schema.param_type {
        ParameterType::String => match value {
            Value::String(_) => Ok(value.clone()),
            other => Err(format!("expected string, got {}", json_type_name(other))),
        },
        ParameterType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            // int/float coercion: accept a float with zero fraction
            Value::Number(n) => {
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.fract() == 0.0 && f.is_finite() {
                    Ok(Value::from(f as i64))
                } else {
                    Err(format!("expected integer, got {}", n))
                }
            }
            other => Err(format!("expected integer, got {}", json_type_name(other))),
        },
        ParameterType::Number => match value {
            Value::Number(_) => Ok(value.clone()),
            other => Err(format!("expected number, got {}", json_type_name(other))),
        },
        ParameterType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            other => Err(format!("expected boolean, got {}", json_type_name(other))),
        },
        ParameterType::Array => match value {
            Value::Array(_) => Ok(value.clone()),
            other => Err(format!("expected array, got {}", json_type_name(other))),
        },
        ParameterType::Object => match value {
            Value::Object(_) => Ok(value.clone()),
            other => Err(format!("expected object, got {}", json_type_name(other))),
        },
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Registry of tool services
///
/// Tools register under their `service:name` id; lookups and execution go
/// through the service key, so several services can host identically-named
/// tools.
pub struct ToolRegistry {
    services: Arc<RwLock<HashMap<String, HashMap<String, Arc<dyn Tool>>>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            services: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a tool under its descriptor's service
    pub async fn register(&self, tool: Arc<dyn Tool>) -> Result<ToolId, ToolError> {
        let id = tool.descriptor().id.clone();
        let mut services = self.services.write().await;
        let service = services.entry(id.service.clone()).or_default();

        if service.contains_key(&id.name) {
            warn!(tool_id = %id, "attempted to register duplicate tool");
            return Err(ToolError::InvalidArguments {
                tool_id: id.clone(),
                reason: "tool already registered".into(),
            });
        }

        info!(tool_id = %id, "registering tool");
        service.insert(id.name.clone(), tool);
        Ok(id)
    }

    pub async fn get(&self, id: &ToolId) -> Result<Arc<dyn Tool>, ToolError> {
        let services = self.services.read().await;
        let service = services
            .get(&id.service)
            .ok_or_else(|| ToolError::UnknownService(id.service.clone()))?;
        service
            .get(&id.name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(id.clone()))
    }

    pub async fn descriptor(&self, id: &ToolId) -> Result<ToolDescriptor, ToolError> {
        Ok(self.get(id).await?.descriptor().clone())
    }

    /// Execute a tool with validated arguments under a timeout.
    ///
    /// A timeout is reported as an execution error on the call result, like
    /// any other tool failure.
    pub async fn execute(
        &self,
        id: &ToolId,
        arguments: BTreeMap<String, Value>,
        time_limit: Duration,
    ) -> Result<ToolOutcome, ToolError> {
        let tool = self.get(id).await?;
        debug!(tool_id = %id, argument_count = arguments.len(), "executing tool");

        match timeout(time_limit, tool.execute(arguments)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(tool_id = %id, timeout_secs = time_limit.as_secs(), "tool execution timed out");
                Err(ToolError::Execution {
                    tool_id: id.clone(),
                    message: format!("timed out after {:?}", time_limit),
                })
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
