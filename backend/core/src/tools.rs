//! Tool schemas, validated arguments, and normalized results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw parameters supplied by a caller before validation.
pub type ToolParameters = Map<String, Value>;

/// Type tag of a tool parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

/// One entry of a tool's parameter schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub param_type: ParamType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ParamType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            param_type,
            required: false,
            default: None,
            allowed_values: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn one_of(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = Some(values);
        self
    }
}

/// A named function a plugin exposes for invocation during a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Vec<ToolParameter>,
    #[serde(default)]
    pub requires_confirmation: bool,
    #[serde(default)]
    pub requires_auth: bool,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            requires_confirmation: false,
            requires_auth: false,
        }
    }

    pub fn param(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn needs_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }

    pub fn needs_auth(mut self) -> Self {
        self.requires_auth = true;
        self
    }

    /// Check raw parameters against the schema and apply defaults.
    ///
    /// Parameters not declared in the schema are dropped.
    pub fn validate(&self, raw: &ToolParameters) -> Result<ToolArguments, String> {
        let mut values = Map::new();
        let mut problems = Vec::new();

        for param in &self.parameters {
            let value = match raw.get(&param.name).filter(|v| !v.is_null()) {
                Some(v) => v.clone(),
                None => match &param.default {
                    Some(d) => d.clone(),
                    None if param.required => {
                        problems.push(format!("missing required parameter '{}'", param.name));
                        continue;
                    }
                    None => continue,
                },
            };

            if !param.param_type.matches(&value) {
                problems.push(format!(
                    "parameter '{}' expected {:?}, got {}",
                    param.name,
                    param.param_type,
                    json_type_name(&value)
                ));
                continue;
            }

            if let Some(allowed) = &param.allowed_values {
                if !allowed.contains(&value) {
                    problems.push(format!(
                        "parameter '{}' must be one of {}",
                        param.name,
                        Value::Array(allowed.clone())
                    ));
                    continue;
                }
            }

            values.insert(param.name.clone(), value);
        }

        if problems.is_empty() {
            Ok(ToolArguments { values })
        } else {
            Err(problems.join("; "))
        }
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

/// Parameters that passed schema validation, defaults included.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArguments {
    values: Map<String, Value>,
}

impl ToolArguments {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Option<f64> {
        self.values.get(name).and_then(Value::as_f64)
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

/// Why a tool call did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    Validation,
    Execution,
    Timeout,
    Cancelled,
}

/// Token and cost accounting reported by a tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: Option<f64>,
}

/// Normalized outcome of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<ToolUsage>,
}

impl ToolResult {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data,
            error: None,
            error_kind: None,
            usage: None,
        }
    }

    pub fn failure(kind: ToolErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            error: Some(error.into()),
            error_kind: Some(kind),
            usage: None,
        }
    }

    pub fn with_usage(mut self, usage: ToolUsage) -> Self {
        self.usage = Some(usage);
        self
    }
}
