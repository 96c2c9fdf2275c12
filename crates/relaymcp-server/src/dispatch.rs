//! Bridges the transport layer's opaque `Value` messages into tool/workflow
//! invocations. Full protocol message parsing is out of scope (spec §1
//! "assumed provided by an external protocol library"); this decodes just
//! enough of a JSON-RPC-shaped envelope — `{"id", "method", "params"}` — to
//! reach [`ToolRegistry::invoke`] and [`WorkflowRegistry::execute_workflow`].

use std::sync::Arc;

use async_trait::async_trait;
use relaymcp_core::{Error, Result};
use relaymcp_registry::{ToolContext, ToolRegistry, WorkflowRegistry};
use relaymcp_transport::MessageDispatcher;
use serde_json::{json, Value};

pub struct RegistryDispatcher {
    pub tools: Arc<ToolRegistry>,
    pub workflows: Arc<WorkflowRegistry>,
}

#[async_trait]
impl MessageDispatcher for RegistryDispatcher {
    async fn dispatch(&self, session_id: &str, message: Value) -> Result<Value> {
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("message is missing a \"method\" field"))?;
        let params = message.get("params").cloned().unwrap_or(json!({}));

        let result = match method {
            "tools/list" => Ok(json!({ "tools": self.tools.tool_names() })),
            "tools/call" => self.call_tool(session_id, &params).await,
            "workflows/list" => Ok(json!({ "workflows": self.workflows.get_workflow_names() })),
            "workflows/execute" => self.execute_workflow(session_id, &params).await,
            other => Err(Error::not_found(format!("unknown method {other}"))),
        };

        Ok(match result {
            Ok(value) => json!({ "id": id, "result": value }),
            Err(error) => json!({
                "id": id,
                "error": {
                    "category": error.category(),
                    "message": error.message(),
                }
            }),
        })
    }
}

impl RegistryDispatcher {
    async fn call_tool(&self, session_id: &str, params: &Value) -> Result<Value> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("params.name is required for tools/call"))?;
        let arguments = params.get("arguments").cloned().unwrap_or(json!({}));
        let context = tool_context(session_id, params);

        let outcome = self.tools.invoke(name, arguments, Some(context)).await?;
        Ok(serde_json::to_value(outcome)?)
    }

    async fn execute_workflow(&self, session_id: &str, params: &Value) -> Result<Value> {
        let name = params
            .get("workflow_name")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::validation("params.workflow_name is required for workflows/execute"))?;
        let args = params.get("params").cloned().unwrap_or(json!({}));
        let context = tool_context(session_id, params);

        self.workflows.execute_workflow(name, args, context).await
    }
}

fn tool_context(session_id: &str, params: &Value) -> ToolContext {
    ToolContext {
        user_id: params.get("user_id").and_then(Value::as_str).map(str::to_string),
        request_id: Some(session_id.to_string()),
        client_id: params.get("client_id").and_then(Value::as_str).map(str::to_string),
    }
}
