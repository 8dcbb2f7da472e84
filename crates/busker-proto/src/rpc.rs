//! Service Methods
//!
//! Params and results of the four methods the invocation service answers,
//! plus the reflection document returned by `rpc.discover`.

use std::collections::BTreeMap;

use schemars::{schema_for, JsonSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::catalog::{AppMetadata, ToolCatalog};
use crate::error::DispatchError;
use crate::value::{ValueKind, WireValue};

pub const METHOD_DESCRIBE: &str = "app.describe";
pub const METHOD_CALL: &str = "tools.call";
pub const METHOD_DISCOVER: &str = "rpc.discover";
pub const METHOD_PING: &str = "ping";

/// Name the service advertises in its reflection document.
pub const SERVICE_NAME: &str = "busker.App";

/// Result of `app.describe`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DescribeAppResult {
    pub app: AppMetadata,
    pub tools: ToolCatalog,
}

/// Params of `tools.call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallParams {
    pub name: String,
    #[serde(default)]
    pub arguments: BTreeMap<String, WireValue>,
}

impl CallParams {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: BTreeMap::new(),
        }
    }

    pub fn arg(mut self, name: impl Into<String>, value: impl Into<WireValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }
}

/// Result of `tools.call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CallResult {
    pub call_id: String,
    /// Absent when the tool returns nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<WireValue>,
    /// One entry per file reference in `value`, in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

/// Where to fetch the bytes behind a file reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Attachment {
    pub index: usize,
    pub name: String,
    pub size: u64,
    /// Path relative to the service root, e.g. `/attachments/<call_id>/0`.
    pub url: String,
}

impl Attachment {
    pub fn path_for(call_id: &str, index: usize) -> String {
        format!("/attachments/{}/{}", call_id, index)
    }
}

/// Result of `ping`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PingResult {
    pub status: String,
    pub version: String,
}

/// Result of `rpc.discover`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ServiceDescription {
    pub service: String,
    pub version: String,
    pub operations: Vec<OperationShape>,
    pub tools: Vec<ToolShape>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OperationShape {
    pub method: String,
    pub description: String,
    pub params_schema: Value,
    pub result_schema: Value,
    /// Schema of `error.data` for this method, when it carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ToolShape {
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    pub input_schema: Value,
    pub returns: ValueKind,
}

/// Params of methods that take none.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NoParams {}

fn schema_value(schema: schemars::Schema) -> Value {
    serde_json::to_value(schema).unwrap_or(Value::Null)
}

impl ServiceDescription {
    /// Build the reflection document for an app's catalog.
    pub fn new(version: impl Into<String>, catalog: &ToolCatalog) -> Self {
        let tools = catalog
            .tools
            .iter()
            .map(|t| ToolShape {
                name: t.name.clone(),
                label: t.label.clone(),
                icon: t.icon.clone(),
                input_schema: t.input_schema(),
                returns: t.returns.clone(),
            })
            .collect();

        Self {
            service: SERVICE_NAME.to_string(),
            version: version.into(),
            operations: standard_operations(),
            tools,
        }
    }

    pub fn operation(&self, method: &str) -> Option<&OperationShape> {
        self.operations.iter().find(|o| o.method == method)
    }
}

/// Shapes of the four service methods.
pub fn standard_operations() -> Vec<OperationShape> {
    vec![
        OperationShape {
            method: METHOD_DESCRIBE.to_string(),
            description: "App metadata and the full tool catalog".to_string(),
            params_schema: schema_value(schema_for!(NoParams)),
            result_schema: schema_value(schema_for!(DescribeAppResult)),
            error_schema: None,
        },
        OperationShape {
            method: METHOD_CALL.to_string(),
            description: "Invoke one tool by name with tagged arguments".to_string(),
            params_schema: schema_value(schema_for!(CallParams)),
            result_schema: schema_value(schema_for!(CallResult)),
            error_schema: Some(schema_value(schema_for!(DispatchError))),
        },
        OperationShape {
            method: METHOD_DISCOVER.to_string(),
            description: "This document".to_string(),
            params_schema: schema_value(schema_for!(NoParams)),
            result_schema: schema_value(schema_for!(ServiceDescription)),
            error_schema: None,
        },
        OperationShape {
            method: METHOD_PING.to_string(),
            description: "Liveness check".to_string(),
            params_schema: schema_value(schema_for!(NoParams)),
            result_schema: schema_value(schema_for!(PingResult)),
            error_schema: None,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ParamDescriptor, ToolDescriptor};
    use serde_json::json;

    #[test]
    fn call_params_wire_form() {
        let params = CallParams::new("Echo").arg("text", "hi");
        let json = serde_json::to_value(&params).unwrap();
        assert_eq!(json, json!({"name": "Echo", "arguments": {"text": {"text": "hi"}}}));
    }

    #[test]
    fn call_params_default_to_no_arguments() {
        let params: CallParams = serde_json::from_value(json!({"name": "Ping"})).unwrap();
        assert!(params.arguments.is_empty());
    }

    #[test]
    fn unit_result_omits_value() {
        let result = CallResult {
            call_id: "c1".into(),
            value: None,
            attachments: vec![],
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json, json!({"call_id": "c1"}));
    }

    #[test]
    fn discovery_lists_every_method_with_schemas() {
        let catalog = ToolCatalog::new(vec![ToolDescriptor {
            name: "Echo".into(),
            label: "Echo".into(),
            icon: None,
            params: vec![ParamDescriptor {
                name: "text".into(),
                hint: String::new(),
                kind: ValueKind::Text,
            }],
            returns: ValueKind::Text,
        }]);
        let doc = ServiceDescription::new("0.1.0", &catalog);

        for method in [METHOD_DESCRIBE, METHOD_CALL, METHOD_DISCOVER, METHOD_PING] {
            let op = doc.operation(method).expect(method);
            assert!(op.params_schema.is_object(), "{} params schema", method);
            assert!(op.result_schema.is_object(), "{} result schema", method);
        }
        assert!(doc.operation(METHOD_CALL).unwrap().error_schema.is_some());
        assert_eq!(doc.tools[0].input_schema["required"], json!(["text"]));
    }

    #[test]
    fn attachment_paths() {
        assert_eq!(Attachment::path_for("abc", 2), "/attachments/abc/2");
    }
}
