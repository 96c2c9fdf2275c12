//! Minimal RelayMCP server: one "hello" tool, served over whichever
//! transport `RELAYMCP_TRANSPORT_TYPE` selects (defaults to stdio).

use std::sync::Arc;

use async_trait::async_trait;
use relaymcp_core::Result;
use relaymcp_kv::{KvStore, MemoryKv};
use relaymcp_registry::{RegisterToolOptions, ToolContext, ToolDefinition, ToolHandler};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

struct Hello;

#[async_trait]
impl ToolHandler for Hello {
    async fn call(&self, args: Value, _context: ToolContext) -> Result<Value> {
        let name = args.get("name").and_then(Value::as_str).unwrap_or("world");
        Ok(json!({ "greeting": format!("Hello, {name}!") }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let kv: Arc<dyn KvStore> = Arc::new(MemoryKv::new());
    let state = relaymcp_server::build(kv)?;

    state.tools.register(
        "hello",
        ToolDefinition {
            title: "Hello".to_string(),
            description: "Greets the caller by name".to_string(),
            category: Some("demo".to_string()),
            tags: vec![],
            input_schema: json!({
                "type": "object",
                "properties": { "name": { "type": "string" } },
            }),
        },
        Arc::new(Hello),
        Some(RegisterToolOptions::default()),
    )?;

    relaymcp_server::serve(state).await?;
    Ok(())
}
