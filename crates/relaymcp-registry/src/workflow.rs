//! Workflow Registry (spec §4.12): mirrors the Tool Registry for named,
//! versioned multi-step operations, and can surface itself as two
//! synthesized tools on a [`ToolRegistry`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use relaymcp_core::{time, Error, Result};
use serde_json::Value;

use crate::tool::{RegisterToolOptions, ToolContext, ToolDefinition, ToolHandler, ToolRegistry, ToolStats};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct WorkflowDefinition {
    pub title: String,
    pub description: String,
    pub version: String,
    /// MUST declare at least a `userId` property (spec §4.12).
    pub input_schema: Value,
}

#[async_trait]
pub trait WorkflowHandler: Send + Sync {
    async fn execute(&self, args: Value, context: ToolContext) -> Result<Value>;
}

struct RegisteredWorkflow {
    definition: WorkflowDefinition,
    handler: Arc<dyn WorkflowHandler>,
    validator: jsonschema::Validator,
    registered_at: DateTime<Utc>,
    stats: Mutex<ToolStats>,
}

#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct WorkflowRegistryStats {
    pub total_workflows: usize,
    pub total_calls: u64,
}

pub struct WorkflowRegistry {
    workflows: DashMap<String, Arc<RegisteredWorkflow>>,
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowRegistry {
    pub fn new() -> Self {
        Self {
            workflows: DashMap::new(),
        }
    }

    pub fn register_workflow(
        &self,
        name: impl Into<String>,
        definition: WorkflowDefinition,
        handler: Arc<dyn WorkflowHandler>,
    ) -> Result<()> {
        let declares_user_id = definition
            .input_schema
            .get("properties")
            .and_then(|p| p.as_object())
            .is_some_and(|props| props.contains_key("userId") || props.contains_key("user_id"));
        if !declares_user_id {
            return Err(Error::validation("workflow input_schema must declare a userId property"));
        }

        let validator = jsonschema::validator_for(&definition.input_schema)
            .map_err(|e| Error::validation(format!("invalid input_schema: {e}")))?;

        self.workflows.insert(
            name.into(),
            Arc::new(RegisteredWorkflow {
                definition,
                handler,
                validator,
                registered_at: time::now(),
                stats: Mutex::new(ToolStats::default()),
            }),
        );
        Ok(())
    }

    pub fn get_workflow_names(&self) -> Vec<String> {
        self.workflows.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn get_definition(&self, name: &str) -> Option<WorkflowDefinition> {
        self.workflows.get(name).map(|w| w.definition.clone())
    }

    pub fn validate_workflow_input(&self, name: &str, args: &Value) -> Result<Value> {
        let workflow = self
            .workflows
            .get(name)
            .ok_or_else(|| Error::not_found(format!("workflow {name} not registered")))?;

        let errors: Vec<String> = workflow
            .validator
            .iter_errors(args)
            .map(|e| format!("{}: {e}", e.instance_path))
            .collect();
        if errors.is_empty() {
            Ok(args.clone())
        } else {
            Err(Error::validation(format!(
                "workflow {name} argument validation failed: {}",
                errors.join("; ")
            )))
        }
    }

    pub async fn execute_workflow(&self, name: &str, args: Value, context: ToolContext) -> Result<Value> {
        let workflow = self
            .workflows
            .get(name)
            .ok_or_else(|| Error::not_found(format!("workflow {name} not registered")))?
            .clone();

        let validated = self.validate_workflow_input(name, &args)?;

        let start = std::time::Instant::now();
        let outcome = AssertUnwindSafe(workflow.handler.execute(validated, context))
            .catch_unwind()
            .await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(data)) => {
                workflow.stats.lock().record(elapsed_ms, None);
                Ok(data)
            }
            Ok(Err(error)) => {
                workflow.stats.lock().record(elapsed_ms, Some(error.message().to_string()));
                Err(error)
            }
            Err(_) => {
                let message = format!("workflow {name} handler panicked");
                workflow.stats.lock().record(elapsed_ms, Some(message.clone()));
                Err(Error::workflow(message))
            }
        }
    }

    pub fn get_workflow_stats(&self, name: &str) -> Option<ToolStats> {
        self.workflows.get(name).map(|w| w.stats.lock().clone())
    }

    pub fn get_registry_stats(&self) -> WorkflowRegistryStats {
        let total_calls = self.workflows.iter().map(|w| w.stats.lock().call_count).sum();
        WorkflowRegistryStats {
            total_workflows: self.workflows.len(),
            total_calls,
        }
    }

    /// Surfaces `execute_workflow` and `get_schema_for_workflow` as tools on
    /// `tool_registry` (spec §4.12). `self` must outlive the registration —
    /// callers pass an `Arc<WorkflowRegistry>` that both sides share.
    pub fn surface_as_tools(self: &Arc<Self>, tool_registry: &ToolRegistry) -> Result<()> {
        let names = self.get_workflow_names();
        let execute_schema = serde_json::json!({
            "type": "object",
            "properties": {
                "workflow_name": ToolRegistry::create_dynamic_enum(&names),
                "params": {"type": "object"}
            },
            "required": ["workflow_name"]
        });
        tool_registry.register(
            "execute_workflow",
            ToolDefinition {
                title: "Execute workflow".to_string(),
                description: "Runs a registered multi-step workflow by name".to_string(),
                category: Some("workflow".to_string()),
                tags: vec![],
                input_schema: execute_schema,
            },
            Arc::new(ExecuteWorkflowTool { workflows: self.clone() }),
            Some(RegisterToolOptions {
                category: Some("workflow".to_string()),
            }),
        )?;

        tool_registry.register(
            "get_schema_for_workflow",
            ToolDefinition {
                title: "Get workflow schema".to_string(),
                description: "Returns the input schema for a registered workflow".to_string(),
                category: Some("workflow".to_string()),
                tags: vec![],
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {"workflow_name": ToolRegistry::create_dynamic_enum(&names)},
                    "required": ["workflow_name"]
                }),
            },
            Arc::new(GetSchemaForWorkflowTool { workflows: self.clone() }),
            Some(RegisterToolOptions {
                category: Some("workflow".to_string()),
            }),
        )?;

        Ok(())
    }
}

struct ExecuteWorkflowTool {
    workflows: Arc<WorkflowRegistry>,
}

#[async_trait]
impl ToolHandler for ExecuteWorkflowTool {
    async fn call(&self, args: Value, context: ToolContext) -> Result<Value> {
        let name = args
            .get("workflow_name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("workflow_name is required"))?;
        let params = args.get("params").cloned().unwrap_or_else(|| serde_json::json!({}));
        self.workflows.execute_workflow(name, params, context).await
    }
}

struct GetSchemaForWorkflowTool {
    workflows: Arc<WorkflowRegistry>,
}

#[async_trait]
impl ToolHandler for GetSchemaForWorkflowTool {
    async fn call(&self, args: Value, _context: ToolContext) -> Result<Value> {
        let name = args
            .get("workflow_name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("workflow_name is required"))?;
        let definition = self
            .workflows
            .get_definition(name)
            .ok_or_else(|| Error::not_found(format!("workflow {name} not registered")))?;
        Ok(definition.input_schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoWorkflow;

    #[async_trait]
    impl WorkflowHandler for EchoWorkflow {
        async fn execute(&self, args: Value, _context: ToolContext) -> Result<Value> {
            Ok(args)
        }
    }

    fn onboarding_definition() -> WorkflowDefinition {
        WorkflowDefinition {
            title: "onboarding".to_string(),
            description: "onboard a new user".to_string(),
            version: "1.0.0".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {"userId": {"type": "string"}},
                "required": ["userId"]
            }),
        }
    }

    #[test]
    fn register_rejects_schema_without_user_id() {
        let registry = WorkflowRegistry::new();
        let definition = WorkflowDefinition {
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
            ..onboarding_definition()
        };
        let err = registry
            .register_workflow("onboarding", definition, Arc::new(EchoWorkflow))
            .unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn execute_workflow_validates_and_runs() {
        let registry = WorkflowRegistry::new();
        registry
            .register_workflow("onboarding", onboarding_definition(), Arc::new(EchoWorkflow))
            .unwrap();

        let result = registry
            .execute_workflow("onboarding", serde_json::json!({"userId": "u1"}), ToolContext::default())
            .await
            .unwrap();
        assert_eq!(result["userId"], "u1");
        assert_eq!(registry.get_workflow_stats("onboarding").unwrap().call_count, 1);
    }

    #[tokio::test]
    async fn surface_as_tools_exposes_execute_and_schema_tools() {
        let registry = Arc::new(WorkflowRegistry::new());
        registry
            .register_workflow("onboarding", onboarding_definition(), Arc::new(EchoWorkflow))
            .unwrap();

        let tools = ToolRegistry::new();
        registry.surface_as_tools(&tools).unwrap();

        let result = tools
            .invoke(
                "execute_workflow",
                serde_json::json!({"workflow_name": "onboarding", "params": {"userId": "u1"}}),
                None,
            )
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.data.unwrap()["userId"], "u1");

        let schema_result = tools
            .invoke("get_schema_for_workflow", serde_json::json!({"workflow_name": "onboarding"}), None)
            .await
            .unwrap();
        assert!(schema_result.ok);
    }
}
