//! In-process tool catalog: the explicit table of externally callable
//! operations that the registry store introspects.
//!
//! Tools are registered in this table at initialisation instead of being
//! collected through registration decorators; the table is the single
//! source of truth for the on-disk tool reference.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;

/// One parameter of a tool's schema.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolParam {
    pub name: String,
    /// Type as a plain string ("string", "object", "integer", ...).
    #[serde(rename = "type")]
    pub type_name: String,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

impl ToolParam {
    pub fn required(name: &str, type_name: &str) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            required: true,
            default: None,
        }
    }

    pub fn optional(name: &str, type_name: &str, default: Value) -> Self {
        Self {
            name: name.to_string(),
            type_name: type_name.to_string(),
            required: false,
            default: Some(default),
        }
    }
}

/// Metadata for one externally callable operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub id: String,
    pub category: String,
    pub description: String,
    pub parameters: Vec<ToolParam>,
    pub return_type: String,
    #[serde(default)]
    pub usage_examples: Vec<String>,
}

impl ToolSpec {
    pub fn new(id: &str, category: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            category: category.to_string(),
            description: description.to_string(),
            parameters: Vec::new(),
            return_type: "object".to_string(),
            usage_examples: Vec::new(),
        }
    }

    pub fn param(mut self, param: ToolParam) -> Self {
        self.parameters.push(param);
        self
    }

    pub fn returns(mut self, return_type: &str) -> Self {
        self.return_type = return_type.to_string();
        self
    }

    pub fn example(mut self, example: &str) -> Self {
        self.usage_examples.push(example.to_string());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_collects_parameters() {
        let spec = ToolSpec::new("query_component", "librarian", "Query a component")
            .param(ToolParam::required("project_path", "string"))
            .param(ToolParam::optional("limit", "integer", json!(10)))
            .returns("object")
            .example("query_component(\"/tmp/p1\", \"Foo\")");

        assert_eq!(spec.parameters.len(), 2);
        assert!(spec.parameters[0].required);
        assert_eq!(spec.parameters[1].default, Some(json!(10)));
        assert_eq!(spec.usage_examples.len(), 1);
    }
}
