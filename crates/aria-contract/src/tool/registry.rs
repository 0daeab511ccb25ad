use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;

use super::{Tool, ToolDescriptor, ToolError};

#[derive(Debug, Error)]
pub enum ToolRegistryError {
    #[error("tool name already registered: {0}")]
    NameConflict(String),
}

/// Name-keyed tool registry.
///
/// Built once at startup and shared immutably afterwards; readers are
/// lock-free behind an `Arc`.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its descriptor name. Fails when the name is
    /// taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ToolRegistryError> {
        let name = tool.descriptor().name;
        if self.tools.contains_key(&name) {
            return Err(ToolRegistryError::NameConflict(name));
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Descriptors of every registered tool, sorted by name.
    pub fn schemas(&self) -> Vec<ToolDescriptor> {
        let mut schemas: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor()).collect();
        schemas.sort_by(|a, b| a.name.cmp(&b.name));
        schemas
    }

    /// Invoke a tool by name with raw JSON argument text.
    ///
    /// Unknown names fail with [`ToolError::NotFound`]; malformed or
    /// schema-violating arguments with [`ToolError::InvalidArguments`].
    pub async fn invoke(&self, name: &str, arguments_json: &str) -> Result<String, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let args: Value = if arguments_json.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(arguments_json)
                .map_err(|e| ToolError::InvalidArguments(e.to_string()))?
        };
        tool.validate_args(&args)?;
        tool.invoke(args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct UpperTool;

    #[async_trait]
    impl Tool for UpperTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("upper", "Uppercase a string").with_parameters(json!({
                "type": "object",
                "properties": { "text": { "type": "string" } },
                "required": ["text"]
            }))
        }

        async fn invoke(&self, args: Value) -> Result<String, ToolError> {
            let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(text.to_uppercase())
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(UpperTool)).unwrap();
        registry
    }

    #[test]
    fn duplicate_registration_is_a_conflict() {
        let mut registry = registry();
        let err = registry.register(Arc::new(UpperTool)).unwrap_err();
        assert!(matches!(err, ToolRegistryError::NameConflict(name) if name == "upper"));
    }

    #[test]
    fn unregister_frees_the_name() {
        let mut registry = registry();
        assert!(registry.unregister("upper").is_some());
        assert!(registry.is_empty());
        registry.register(Arc::new(UpperTool)).unwrap();
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn invoke_dispatches_by_name() {
        let out = registry().invoke("upper", r#"{"text":"abc"}"#).await.unwrap();
        assert_eq!(out, "ABC");
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let err = registry().invoke("nope", "{}").await.unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn schema_violations_are_invalid_arguments() {
        let err = registry().invoke("upper", "{}").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = registry().invoke("upper", "not json").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn empty_arguments_default_to_empty_object() {
        let mut registry = ToolRegistry::new();

        struct NoArgs;

        #[async_trait]
        impl Tool for NoArgs {
            fn descriptor(&self) -> ToolDescriptor {
                ToolDescriptor::new("ping", "Reply pong")
            }

            async fn invoke(&self, _args: Value) -> Result<String, ToolError> {
                Ok("pong".into())
            }
        }

        registry.register(Arc::new(NoArgs)).unwrap();
        assert_eq!(registry.invoke("ping", "").await.unwrap(), "pong");
    }

    #[test]
    fn schemas_are_sorted_by_name() {
        let mut registry = registry();

        struct Alpha;

        #[async_trait]
        impl Tool for Alpha {
            fn descriptor(&self) -> ToolDescriptor {
                ToolDescriptor::new("alpha", "First")
            }

            async fn invoke(&self, _args: Value) -> Result<String, ToolError> {
                Ok(String::new())
            }
        }

        registry.register(Arc::new(Alpha)).unwrap();
        let names: Vec<_> = registry.schemas().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["alpha", "upper"]);
    }
}
