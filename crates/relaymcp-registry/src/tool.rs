//! Tool Registry (spec §4.11): schema-validated registration and dispatch.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use relaymcp_core::{sanitize, time, Error, Result};
use serde_json::Value;

/// A tool's declarative definition: everything the registry needs to
/// validate calls and describe the tool to a client.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ToolDefinition {
    pub title: String,
    pub description: String,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Declarative JSON Schema describing accepted arguments.
    pub input_schema: Value,
}

/// A handler invoked once arguments pass [`ToolDefinition::input_schema`]
/// validation.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: Value, context: ToolContext) -> Result<Value>;
}

/// Context propagated into a handler call, extracted from the call's own
/// arguments or an optional caller-supplied fallback (spec §4.11 "Context
/// extraction").
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ToolContext {
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ToolStats {
    pub call_count: u64,
    pub total_execution_time_ms: u64,
    pub average_execution_time_ms: f64,
    pub last_called: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl ToolStats {
    pub(crate) fn record(&mut self, elapsed_ms: u64, error: Option<String>) {
        self.call_count += 1;
        self.total_execution_time_ms += elapsed_ms;
        self.average_execution_time_ms = self.total_execution_time_ms as f64 / self.call_count as f64;
        self.last_called = Some(time::now());
        self.last_error = error;
    }
}

#[derive(Debug, Clone, Default)]
pub struct RegisterToolOptions {
    pub category: Option<String>,
}

struct RegisteredTool {
    definition: ToolDefinition,
    handler: Arc<dyn ToolHandler>,
    validator: jsonschema::Validator,
    registered_at: DateTime<Utc>,
    stats: Mutex<ToolStats>,
}

/// Result of a tool invocation: either the handler's normalized data, or an
/// error-flagged result when validation or the handler itself failed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolInvocationResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct ToolRegistryStats {
    pub total_tools: usize,
    pub total_calls: u64,
}

pub struct ToolRegistry {
    tools: DashMap<String, Arc<RegisteredTool>>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: DashMap::new() }
    }

    /// Overwriting an existing name replaces both validator and handler
    /// atomically from the caller's perspective (spec §4.11).
    pub fn register(
        &self,
        name: impl Into<String>,
        mut definition: ToolDefinition,
        handler: Arc<dyn ToolHandler>,
        options: Option<RegisterToolOptions>,
    ) -> Result<()> {
        if let Some(options) = options {
            if definition.category.is_none() {
                definition.category = options.category;
            }
        }

        let validator = jsonschema::validator_for(&definition.input_schema)
            .map_err(|e| Error::validation(format!("invalid input_schema: {e}")))?;

        let registered = Arc::new(RegisteredTool {
            definition,
            handler,
            validator,
            registered_at: time::now(),
            stats: Mutex::new(ToolStats::default()),
        });
        self.tools.insert(name.into(), registered);
        Ok(())
    }

    /// Validates `args` against the declared schema, substituting schema
    /// `default`s for missing top-level properties first. Returns the
    /// normalized arguments, or a human-readable error naming the failing
    /// field paths.
    pub fn validate_tool_input(&self, name: &str, args: &Value) -> Result<Value> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::not_found(format!("tool {name} not registered")))?;

        let mut normalized = args.clone();
        apply_schema_defaults(&tool.definition.input_schema, &mut normalized);

        let errors: Vec<String> = tool
            .validator
            .iter_errors(&normalized)
            .map(|e| format!("{}: {e}", e.instance_path))
            .collect();

        if errors.is_empty() {
            Ok(normalized)
        } else {
            Err(Error::validation(format!(
                "tool {name} argument validation failed: {}",
                errors.join("; ")
            )))
        }
    }

    /// Validates, extracts context, and invokes the handler. Handler errors
    /// (including panics) are caught and returned as an error-flagged
    /// result rather than propagated, and statistics are updated atomically
    /// regardless of outcome.
    pub async fn invoke(&self, name: &str, args: Value, extra: Option<ToolContext>) -> Result<ToolInvocationResult> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| Error::not_found(format!("tool {name} not registered")))?
            .clone();

        tracing::debug!(tool = name, args = %sanitize::sanitize_for_log(&args), "invoking tool");

        let validated = match self.validate_tool_input(name, &args) {
            Ok(v) => v,
            Err(error) => {
                tool.stats.lock().record(0, Some(error.message().to_string()));
                return Ok(ToolInvocationResult {
                    ok: false,
                    data: None,
                    error: Some(error.message().to_string()),
                });
            }
        };

        let context = extract_context(&validated, extra.as_ref());
        let start = std::time::Instant::now();
        let outcome = AssertUnwindSafe(tool.handler.call(validated, context)).catch_unwind().await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(data)) => {
                tool.stats.lock().record(elapsed_ms, None);
                ToolInvocationResult {
                    ok: true,
                    data: Some(data),
                    error: None,
                }
            }
            Ok(Err(error)) => {
                tool.stats.lock().record(elapsed_ms, Some(error.message().to_string()));
                ToolInvocationResult {
                    ok: false,
                    data: None,
                    error: Some(error.message().to_string()),
                }
            }
            Err(_) => {
                let message = format!("tool {name} handler panicked");
                tool.stats.lock().record(elapsed_ms, Some(message.clone()));
                ToolInvocationResult {
                    ok: false,
                    data: None,
                    error: Some(message),
                }
            }
        };
        Ok(result)
    }

    pub fn get_tool_stats(&self, name: &str) -> Option<ToolStats> {
        self.tools.get(name).map(|tool| tool.stats.lock().clone())
    }

    pub fn get_registry_stats(&self) -> ToolRegistryStats {
        let total_calls = self.tools.iter().map(|tool| tool.stats.lock().call_count).sum();
        ToolRegistryStats {
            total_tools: self.tools.len(),
            total_calls,
        }
    }

    pub fn get_tools_by_category(&self, category: &str) -> Vec<String> {
        self.tools
            .iter()
            .filter(|entry| entry.value().definition.category.as_deref() == Some(category))
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn get_definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.get(name).map(|tool| tool.definition.clone())
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn registered_at(&self, name: &str) -> Option<DateTime<Utc>> {
        self.tools.get(name).map(|tool| tool.registered_at)
    }

    pub fn remove_tool(&self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn clear(&self) {
        self.tools.clear();
    }

    /// Builds a closed-set validator schema from a list of strings, e.g. the
    /// set of registered workflow names.
    pub fn create_dynamic_enum(values: &[String]) -> Value {
        serde_json::json!({ "type": "string", "enum": values })
    }
}

fn apply_schema_defaults(schema: &Value, args: &mut Value) {
    let (Some(properties), Some(object)) = (schema.get("properties").and_then(Value::as_object), args.as_object_mut())
    else {
        return;
    };
    for (field, field_schema) in properties {
        if !object.contains_key(field) {
            if let Some(default) = field_schema.get("default") {
                object.insert(field.clone(), default.clone());
            }
        }
    }
}

/// camelCase from `args` takes precedence over `extra`; `extra` only fills
/// keys `args` left absent. Non-string values never populate a context field.
fn extract_context(args: &Value, extra: Option<&ToolContext>) -> ToolContext {
    let from_args = |camel: &str, snake: &str| -> Option<String> {
        args.get(camel)
            .or_else(|| args.get(snake))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    ToolContext {
        user_id: from_args("userId", "user_id").or_else(|| extra.and_then(|e| e.user_id.clone())),
        request_id: from_args("requestId", "request_id").or_else(|| extra.and_then(|e| e.request_id.clone())),
        client_id: from_args("clientId", "client_id").or_else(|| extra.and_then(|e| e.client_id.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoHandler;

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(&self, args: Value, context: ToolContext) -> Result<Value> {
            Ok(serde_json::json!({"args": args, "user_id": context.user_id}))
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl ToolHandler for FailingHandler {
        async fn call(&self, _args: Value, _context: ToolContext) -> Result<Value> {
            Err(Error::workflow("handler exploded"))
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl ToolHandler for PanickingHandler {
        async fn call(&self, _args: Value, _context: ToolContext) -> Result<Value> {
            panic!("boom");
        }
    }

    fn greet_definition() -> ToolDefinition {
        ToolDefinition {
            title: "greet".to_string(),
            description: "says hello".to_string(),
            category: Some("demo".to_string()),
            tags: vec![],
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "name": {"type": "string"},
                    "greeting": {"type": "string", "default": "hello"}
                },
                "required": ["name"]
            }),
        }
    }

    #[test]
    fn register_then_validate_input_applies_defaults() {
        let registry = ToolRegistry::new();
        registry
            .register("greet", greet_definition(), Arc::new(EchoHandler), None)
            .unwrap();

        let normalized = registry
            .validate_tool_input("greet", &serde_json::json!({"name": "Ada"}))
            .unwrap();
        assert_eq!(normalized["greeting"], "hello");
    }

    #[test]
    fn validate_input_reports_missing_required_field() {
        let registry = ToolRegistry::new();
        registry
            .register("greet", greet_definition(), Arc::new(EchoHandler), None)
            .unwrap();
        let err = registry.validate_tool_input("greet", &serde_json::json!({})).unwrap_err();
        assert_eq!(err.category(), relaymcp_core::ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn invoke_extracts_user_id_from_args() {
        let registry = ToolRegistry::new();
        registry
            .register("greet", greet_definition(), Arc::new(EchoHandler), None)
            .unwrap();
        let result = registry
            .invoke("greet", serde_json::json!({"name": "Ada", "user_id": "u1"}), None)
            .await
            .unwrap();
        assert!(result.ok);
        assert_eq!(result.data.unwrap()["user_id"], "u1");
        assert_eq!(registry.get_tool_stats("greet").unwrap().call_count, 1);
    }

    #[tokio::test]
    async fn invoke_surfaces_handler_error_without_propagating() {
        let registry = ToolRegistry::new();
        registry
            .register("broken", greet_definition(), Arc::new(FailingHandler), None)
            .unwrap();
        let result = registry
            .invoke("broken", serde_json::json!({"name": "Ada"}), None)
            .await
            .unwrap();
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("handler exploded"));
        assert_eq!(registry.get_tool_stats("broken").unwrap().last_error.as_deref(), Some("handler exploded"));
    }

    #[tokio::test]
    async fn invoke_catches_handler_panics() {
        let registry = ToolRegistry::new();
        registry
            .register("panicky", greet_definition(), Arc::new(PanickingHandler), None)
            .unwrap();
        let result = registry
            .invoke("panicky", serde_json::json!({"name": "Ada"}), None)
            .await
            .unwrap();
        assert!(!result.ok);
        assert!(result.error.unwrap().contains("panicked"));
    }

    #[test]
    fn get_tools_by_category_filters_correctly() {
        let registry = ToolRegistry::new();
        registry
            .register("greet", greet_definition(), Arc::new(EchoHandler), None)
            .unwrap();
        assert_eq!(registry.get_tools_by_category("demo"), vec!["greet".to_string()]);
        assert!(registry.get_tools_by_category("other").is_empty());
    }

    #[test]
    fn remove_tool_and_clear() {
        let registry = ToolRegistry::new();
        registry
            .register("greet", greet_definition(), Arc::new(EchoHandler), None)
            .unwrap();
        assert!(registry.remove_tool("greet"));
        assert!(!registry.remove_tool("greet"));

        registry
            .register("greet", greet_definition(), Arc::new(EchoHandler), None)
            .unwrap();
        registry.clear();
        assert_eq!(registry.get_registry_stats().total_tools, 0);
    }

    #[test]
    fn create_dynamic_enum_builds_closed_set_schema() {
        let schema = ToolRegistry::create_dynamic_enum(&["a".to_string(), "b".to_string()]);
        assert_eq!(schema["enum"], serde_json::json!(["a", "b"]));
    }
}
