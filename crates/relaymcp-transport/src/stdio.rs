//! Stdio transport (spec §5: "single-threaded by contract — one client, one
//! request at a time"). Newline-delimited JSON in on stdin, newline-delimited
//! JSON out on stdout; no session binding, no persistence, no event replay —
//! those exist to let many concurrent HTTP clients reconnect, which a single
//! local stdio client never needs.

use std::sync::Arc;

use relaymcp_core::{Error, Result};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::transport::MessageDispatcher;

const STDIO_SESSION_ID: &str = "stdio";

/// Reads one JSON message per line from stdin, dispatches it, and writes the
/// response as one JSON line to stdout. Returns once stdin reaches EOF.
/// Unparseable lines are logged and skipped rather than terminating the loop.
pub async fn run_stdio(dispatcher: Arc<dyn MessageDispatcher>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await.map_err(Error::from)? {
        if line.trim().is_empty() {
            continue;
        }

        let message: Value = match serde_json::from_str(&line) {
            Ok(value) => value,
            Err(error) => {
                tracing::warn!(%error, "dropping unparseable stdio line");
                continue;
            }
        };

        let response = dispatcher.dispatch(STDIO_SESSION_ID, message).await?;
        let mut encoded = serde_json::to_vec(&response)?;
        encoded.push(b'\n');
        stdout.write_all(&encoded).await.map_err(Error::from)?;
        stdout.flush().await.map_err(Error::from)?;
    }
    Ok(())
}
