//! Tool contract: descriptor, trait, argument validation, and the registry.

mod contract;
mod registry;

pub use contract::{validate_against_schema, Tool, ToolDescriptor, ToolError, TypedTool};
pub use registry::{ToolRegistry, ToolRegistryError};
