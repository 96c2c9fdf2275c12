//! Schema-validated tool and workflow registries (spec §4.11/§4.12).

mod tool;
mod workflow;

pub use tool::{
    RegisterToolOptions, ToolContext, ToolDefinition, ToolHandler, ToolInvocationResult, ToolRegistry,
    ToolRegistryStats, ToolStats,
};
pub use workflow::{WorkflowDefinition, WorkflowHandler, WorkflowRegistry, WorkflowRegistryStats};
