//! Tool Catalog
//!
//! What an app exposes: its metadata and the ordered list of tool
//! descriptors produced by schema extraction.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::value::ValueKind;

/// App-level metadata shown to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AppMetadata {
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MetadataError {
    #[error("app name must not be empty")]
    EmptyName,
    #[error("app description must not be empty")]
    EmptyDescription,
}

impl AppMetadata {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            icon: None,
        }
    }

    pub fn with_icon(mut self, icon: impl Into<String>) -> Self {
        self.icon = Some(icon.into());
        self
    }

    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.name.trim().is_empty() {
            return Err(MetadataError::EmptyName);
        }
        if self.description.trim().is_empty() {
            return Err(MetadataError::EmptyDescription);
        }
        Ok(())
    }
}

/// One formal parameter of a tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ParamDescriptor {
    pub name: String,
    /// Free-text hint. Empty when the parameter was never hinted.
    #[serde(default)]
    pub hint: String,
    pub kind: ValueKind,
}

/// The public description of one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ToolDescriptor {
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// In formal declaration order.
    pub params: Vec<ParamDescriptor>,
    pub returns: ValueKind,
}

impl ToolDescriptor {
    pub fn param(&self, name: &str) -> Option<&ParamDescriptor> {
        self.params.iter().find(|p| p.name == name)
    }

    /// JSON Schema of the `arguments` object a call to this tool must carry.
    pub fn input_schema(&self) -> Value {
        let mut properties = Map::new();
        for p in &self.params {
            let mut schema = p.kind.json_schema();
            if !p.hint.is_empty() {
                if let Some(obj) = schema.as_object_mut() {
                    obj.insert("description".to_string(), Value::String(p.hint.clone()));
                }
            }
            properties.insert(p.name.clone(), schema);
        }
        let required: Vec<&str> = self.params.iter().map(|p| p.name.as_str()).collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false
        })
    }
}

/// Every tool of one app, in declaration order. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ToolCatalog {
    pub tools: Vec<ToolDescriptor>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}
