//! Validation and registration of client tool schemas.

use super::bridge::ToolCallBridge;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{info, warn};

/// A validated client tool schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "empty_parameters")]
    pub parameters: Value,
}

fn empty_parameters() -> Value {
    json!({"type": "object", "properties": {}, "required": []})
}

impl ToolDefinition {
    /// Validate a raw definition, accepting both the bare form and the form
    /// nested under `"function"`.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn from_value(raw: &Value) -> Result<Self, String> {
        let func = raw.get("function").unwrap_or(raw);

        let name = match func.get("name") {
            None | Some(Value::Null) => return Err("tool definition missing 'name' field".into()),
            Some(Value::String(name)) if !name.trim().is_empty() => name.trim().to_owned(),
            Some(Value::String(_)) => return Err("tool 'name' is empty".into()),
            Some(other) => return Err(format!("tool 'name' must be a string, got {other}")),
        };

        let description = match func.get("description") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(_) => return Err(format!("tool '{name}': 'description' must be a string")),
        };

        let parameters = match func.get("parameters") {
            None | Some(Value::Null) => empty_parameters(),
            Some(Value::Object(map)) if map.is_empty() => empty_parameters(),
            Some(params @ Value::Object(_)) => params.clone(),
            Some(_) => return Err(format!("tool '{name}': 'parameters' must be an object")),
        };

        Ok(Self {
            name,
            description,
            parameters,
        })
    }

    /// Raw function schema handed to the language model.
    #[must_use]
    pub fn raw_schema(&self) -> Value {
        json!({
            "type": "function",
            "name": self.name,
            "description": self.description,
            "parameters": self.parameters,
        })
    }
}

/// Parse a list of raw definitions, skipping (and logging) invalid ones.
#[must_use]
pub fn parse_definitions(raw: &[Value]) -> Vec<ToolDefinition> {
    let mut out: Vec<ToolDefinition> = Vec::with_capacity(raw.len());
    for value in raw {
        match ToolDefinition::from_value(value) {
            Ok(def) if out.iter().any(|d| d.name == def.name) => {
                warn!(tool = %def.name, "duplicate client tool definition; keeping the first");
            }
            Ok(def) => out.push(def),
            Err(e) => warn!(error = %e, "skipping invalid client tool definition"),
        }
    }
    out
}

/// The set of client tools registered for the current agent.
#[derive(Debug, Clone, Default)]
pub struct ClientToolSet {
    tools: Vec<ToolDefinition>,
}

impl ClientToolSet {
    #[must_use]
    pub fn new(definitions: &[ToolDefinition]) -> Self {
        for def in definitions {
            info!(tool = %def.name, "registering client tool");
        }
        Self {
            tools: definitions.to_vec(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// Raw schemas for every registered tool.
    #[must_use]
    pub fn schemas(&self) -> Vec<Value> {
        self.tools.iter().map(ToolDefinition::raw_schema).collect()
    }

    /// Forward a model-issued call to the client.
    pub async fn call(&self, bridge: &ToolCallBridge, name: &str, arguments: &Value) -> String {
        if self.get(name).is_none() {
            warn!(tool = %name, "model called an unregistered client tool");
            return format!("Error: unknown tool '{name}'");
        }
        bridge.invoke(name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn accepts_nested_function_format() {
        let raw = json!({
            "type": "function",
            "function": {
                "name": "get_weather",
                "description": "Weather for a city",
                "parameters": {"type": "object", "properties": {"city": {"type": "string"}}}
            }
        });
        let def = ToolDefinition::from_value(&raw).unwrap();
        assert_eq!(def.name, "get_weather");
        assert_eq!(def.parameters["properties"]["city"]["type"], "string");
    }

    #[test]
    fn missing_parameters_get_empty_object_schema() {
        let def = ToolDefinition::from_value(&json!({"name": "get_time"})).unwrap();
        assert_eq!(def.parameters, empty_parameters());
        let schema = def.raw_schema();
        assert_eq!(schema["type"], "function");
        assert_eq!(schema["name"], "get_time");
    }

    #[test]
    fn rejects_invalid_definitions() {
        assert!(ToolDefinition::from_value(&json!({"description": "x"})).is_err());
        assert!(ToolDefinition::from_value(&json!({"name": 42})).is_err());
        assert!(ToolDefinition::from_value(&json!({"name": "a", "description": 1})).is_err());
        assert!(ToolDefinition::from_value(&json!({"name": "a", "parameters": []})).is_err());
    }

    #[test]
    fn parse_definitions_skips_invalid_and_duplicates() {
        let raw = vec![
            json!({"name": "one"}),
            json!({"name": 7}),
            json!({"function": {"name": "two"}}),
            json!({"name": "one", "description": "again"}),
        ];
        let defs = parse_definitions(&raw);
        let names: Vec<&str> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn calling_unregistered_tool_does_not_reach_bridge() {
        let bridge = ToolCallBridge::new(super::super::DEFAULT_TOOL_TIMEOUT);
        let set = ClientToolSet::new(&[]);
        let out = set.call(&bridge, "launch", &json!({})).await;
        assert_eq!(out, "Error: unknown tool 'launch'");
        assert_eq!(bridge.pending_count(), 0);
    }
}
