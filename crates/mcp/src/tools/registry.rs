// Tool specifications, argument coercion and the tool registry

use crate::protocol::ToolSchema;
use coinlens_core::error::{ToolError, ToolResult};
use coinlens_core::types::{BatchEntry, ContractSnapshot, MarketSnapshot};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Declared type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    StringList,
}

/// One entry of a tool's ordered parameter list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    /// Advertised choices; values are checked by the handler that parses them
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    /// Lowercase string values while coercing, so equivalent calls share a fingerprint
    #[serde(skip)]
    pub case_insensitive: bool,
}

impl ParamSpec {
    pub fn required(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            required: true,
            default: None,
            description: description.to_string(),
            minimum: None,
            maximum: None,
            choices: Vec::new(),
            case_insensitive: false,
        }
    }

    pub fn optional(name: &str, kind: ParamType, description: &str) -> Self {
        Self {
            required: false,
            ..Self::required(name, kind, description)
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    pub fn with_range(mut self, minimum: i64, maximum: i64) -> Self {
        self.minimum = Some(minimum);
        self.maximum = Some(maximum);
        self
    }

    pub fn with_choices<I, S>(mut self, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.choices = choices.into_iter().map(Into::into).collect();
        self
    }

    pub fn case_insensitive(mut self) -> Self {
        self.case_insensitive = true;
        self
    }

    fn fold(&self, s: String) -> String {
        if self.case_insensitive {
            s.to_lowercase()
        } else {
            s
        }
    }

    fn invalid(&self, expected: &str, value: &Value) -> ToolError {
        ToolError::invalid_argument(format!(
            "'{}' must be {}, got {}",
            self.name, expected, value
        ))
    }

    /// Coerce a supplied (or default) value to the declared type
    pub fn coerce(&self, value: &Value) -> ToolResult<Value> {
        match self.kind {
            ParamType::String => {
                let s = scalar_string(value).ok_or_else(|| self.invalid("a string", value))?;
                if s.is_empty() {
                    return Err(ToolError::invalid_argument(format!(
                        "'{}' must not be empty",
                        self.name
                    )));
                }
                Ok(Value::String(self.fold(s)))
            }
            ParamType::Integer => {
                let n = match value {
                    Value::Number(n) => n
                        .as_i64()
                        .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
                    Value::String(s) => s.trim().parse::<i64>().ok(),
                    _ => None,
                }
                .ok_or_else(|| self.invalid("an integer", value))?;

                let below = self.minimum.is_some_and(|min| n < min);
                let above = self.maximum.is_some_and(|max| n > max);
                if below || above {
                    return Err(ToolError::invalid_argument(format!(
                        "'{}' must be between {} and {}, got {}",
                        self.name,
                        self.minimum.map_or("-inf".to_string(), |m| m.to_string()),
                        self.maximum.map_or("inf".to_string(), |m| m.to_string()),
                        n
                    )));
                }
                Ok(Value::from(n))
            }
            ParamType::Number => {
                let n = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                }
                .filter(|f| f.is_finite())
                .ok_or_else(|| self.invalid("a number", value))?;
                Ok(Value::from(n))
            }
            ParamType::Boolean => match value {
                Value::Bool(b) => Ok(Value::Bool(*b)),
                Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
                Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
                _ => Err(self.invalid("a boolean", value)),
            },
            ParamType::StringList => {
                let items: Vec<String> = match value {
                    Value::Array(items) => items
                        .iter()
                        .map(|item| scalar_string(item).ok_or_else(|| self.invalid("a list of strings", value)))
                        .collect::<ToolResult<Vec<_>>>()?,
                    Value::String(s) => s
                        .split(',')
                        .map(|part| part.trim().to_string())
                        .collect(),
                    _ => return Err(self.invalid("a list of strings", value)),
                };

                let items: Vec<Value> = items
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .map(|s| Value::String(self.fold(s)))
                    .collect();
                if items.is_empty() {
                    return Err(ToolError::invalid_argument(format!(
                        "'{}' must contain at least one entry",
                        self.name
                    )));
                }
                Ok(Value::Array(items))
            }
        }
    }

    fn json_schema(&self) -> Value {
        let mut schema = match self.kind {
            ParamType::String => json!({"type": "string"}),
            ParamType::Integer => json!({"type": "integer"}),
            ParamType::Number => json!({"type": "number"}),
            ParamType::Boolean => json!({"type": "boolean"}),
            ParamType::StringList => json!({"type": "array", "items": {"type": "string"}}),
        };

        if let Value::Object(ref mut map) = schema {
            map.insert("description".to_string(), Value::String(self.description.clone()));
            if let Some(ref default) = self.default {
                map.insert("default".to_string(), default.clone());
            }
            if let Some(min) = self.minimum {
                map.insert("minimum".to_string(), Value::from(min));
            }
            if let Some(max) = self.maximum {
                map.insert("maximum".to_string(), Value::from(max));
            }
            if !self.choices.is_empty() {
                map.insert("enum".to_string(), json!(self.choices));
            }
        }
        schema
    }
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Declared shape of a tool's `data`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputShape {
    MarketSnapshot,
    MarketSnapshotList,
    /// One snapshot for a single currency, a list for several
    MarketSnapshotOrList,
    BatchList,
    ContractSnapshot,
    ContractSnapshotList,
}

impl OutputShape {
    /// Check that a payload (e.g. read back from the cache) has this shape
    pub fn matches(&self, value: &Value) -> bool {
        let value = value.clone();
        match self {
            OutputShape::MarketSnapshot => serde_json::from_value::<MarketSnapshot>(value).is_ok(),
            OutputShape::MarketSnapshotList => {
                serde_json::from_value::<Vec<MarketSnapshot>>(value).is_ok()
            }
            OutputShape::MarketSnapshotOrList => {
                OutputShape::MarketSnapshot.matches(&value)
                    || OutputShape::MarketSnapshotList.matches(&value)
            }
            OutputShape::BatchList => serde_json::from_value::<Vec<BatchEntry>>(value).is_ok(),
            OutputShape::ContractSnapshot => {
                serde_json::from_value::<ContractSnapshot>(value).is_ok()
            }
            OutputShape::ContractSnapshotList => {
                serde_json::from_value::<Vec<ContractSnapshot>>(value).is_ok()
            }
        }
    }
}

/// Immutable description of a tool
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    pub output: OutputShape,
}

impl ToolSpec {
    pub fn new(name: &str, description: &str, output: OutputShape) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            params: Vec::new(),
            output,
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// JSON Schema for the argument object
    pub fn input_schema(&self) -> Value {
        let properties: Map<String, Value> = self
            .params
            .iter()
            .map(|p| (p.name.clone(), p.json_schema()))
            .collect();
        let required: Vec<&str> = self
            .params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }

    pub fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema(),
        }
    }

    /// Validate raw arguments, substitute defaults and coerce every value
    ///
    /// `null` arguments (and `null` values) count as omitted.
    pub fn coerce(&self, arguments: &Value) -> ToolResult<ToolArgs> {
        let empty = Map::new();
        let supplied = match arguments {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(ToolError::invalid_argument(format!(
                    "arguments must be an object, got {}",
                    other
                )))
            }
        };

        if let Some(unknown) = supplied
            .keys()
            .find(|key| !self.params.iter().any(|p| &p.name == *key))
        {
            return Err(ToolError::invalid_argument(format!(
                "unknown argument '{}' for tool '{}'",
                unknown, self.name
            )));
        }

        let mut values = BTreeMap::new();
        for param in &self.params {
            let raw = supplied.get(&param.name).filter(|v| !v.is_null());
            let value = match (raw, &param.default) {
                (Some(value), _) => param.coerce(value)?,
                (None, _) if param.required => {
                    return Err(ToolError::invalid_argument(format!(
                        "missing required argument '{}'",
                        param.name
                    )))
                }
                (None, Some(default)) => param.coerce(default)?,
                (None, None) => continue,
            };
            values.insert(param.name.clone(), value);
        }

        Ok(ToolArgs { values })
    }
}

/// Arguments after coercion, keyed by parameter name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolArgs {
    values: BTreeMap<String, Value>,
}

impl ToolArgs {
    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn required_str(&self, name: &str) -> ToolResult<&str> {
        self.str(name).ok_or_else(|| {
            ToolError::invalid_argument(format!("missing required argument '{}'", name))
        })
    }

    pub fn int(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(Value::as_i64)
    }

    /// Integer argument as `u32`; coercion already enforced the declared range
    pub fn u32(&self, name: &str) -> ToolResult<u32> {
        let n = self.int(name).ok_or_else(|| {
            ToolError::invalid_argument(format!("missing integer argument '{}'", name))
        })?;
        u32::try_from(n)
            .map_err(|_| ToolError::invalid_argument(format!("'{}' is out of range", name)))
    }

    pub fn bool(&self, name: &str) -> Option<bool> {
        self.values.get(name).and_then(Value::as_bool)
    }

    pub fn string_list(&self, name: &str) -> Vec<String> {
        self.values
            .get(name)
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Result of a handler: serialized data plus whether it may be cached
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub data: Value,
    pub cacheable: bool,
}

impl ToolOutput {
    pub fn new(data: &impl Serialize) -> ToolResult<Self> {
        let data = serde_json::to_value(data)
            .map_err(|e| ToolError::Internal(format!("failed to serialize tool output: {}", e)))?;
        Ok(Self {
            data,
            cacheable: true,
        })
    }

    /// Batch results are only cached when every entry resolved
    pub fn batch(entries: &[BatchEntry]) -> ToolResult<Self> {
        let mut output = Self::new(&entries)?;
        output.cacheable = !entries.iter().any(BatchEntry::is_failed);
        Ok(output)
    }
}

/// Tool executor trait
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: ToolArgs) -> ToolResult<ToolOutput>;
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
}

/// A registered spec and its handler
#[derive(Clone)]
pub struct RegisteredTool {
    pub spec: Arc<ToolSpec>,
    pub handler: Arc<dyn ToolHandler>,
}

/// Tool registry; listing order is registration order
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<RegisteredTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; names are unique
    pub fn register(
        &mut self,
        spec: ToolSpec,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), RegistryError> {
        if self.index.contains_key(&spec.name) {
            return Err(RegistryError::Duplicate(spec.name));
        }

        self.index.insert(spec.name.clone(), self.tools.len());
        self.tools.push(RegisteredTool {
            spec: Arc::new(spec),
            handler,
        });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn list_tools(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec.as_ref().clone()).collect()
    }

    /// List all tool schemas for MCP
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|t| t.spec.schema()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
