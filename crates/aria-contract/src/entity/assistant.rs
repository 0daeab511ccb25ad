use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Metadata;

/// Declaration of a function tool: name, description, and a JSON Schema for
/// its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// JSON Schema for the function arguments.
    #[serde(default = "FunctionDecl::default_parameters")]
    pub parameters: Value,
}

impl FunctionDecl {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            parameters: Self::default_parameters(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }

    fn default_parameters() -> Value {
        serde_json::json!({"type": "object", "properties": {}})
    }
}

/// Tool attached to an assistant or a run.
///
/// Function tools are resolved by the external caller through the
/// submit-tool-outputs protocol; the other variants are invoked in-process
/// through the tool registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantTool {
    Function { function: FunctionDecl },
    CodeInterpreter,
    FileSearch,
}

impl AssistantTool {
    pub fn function(decl: FunctionDecl) -> Self {
        Self::Function { function: decl }
    }

    /// The function declaration, if this is a function tool.
    pub fn as_function(&self) -> Option<&FunctionDecl> {
        match self {
            Self::Function { function } => Some(function),
            _ => None,
        }
    }
}

/// Persistent configuration bundle reused across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assistant {
    pub id: String,
    pub model: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instructions: String,
    #[serde(default)]
    pub tools: Vec<AssistantTool>,
    #[serde(default)]
    pub file_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: i64,
    pub modified_at: i64,
}

impl Assistant {
    /// Function tools declared on this assistant, in declaration order.
    pub fn function_tools(&self) -> impl Iterator<Item = &FunctionDecl> {
        self.tools.iter().filter_map(AssistantTool::as_function)
    }
}
