//! Transport Manager / Session Manager (spec §4.13): owns the live
//! `session_id → Transport` map and the request pipeline that ties together
//! access-token validation, session persistence, message dispatch, and
//! event-store replay.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use relaymcp_core::{time, Error, Result};
use relaymcp_events::ChunkedEventStore;
use relaymcp_oauth::TokenManager;
use relaymcp_session::{TransportConfigSnapshot, TransportPersistenceStore, TransportSession};
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::transport::{BroadcastTransport, MessageDispatcher, Transport};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub hostname: String,
    pub port: u16,
    pub allowed_hosts: Vec<String>,
    /// How long `shutdown` waits for in-flight requests to drain before
    /// clearing the live map regardless (spec §4.13 "on graceful shutdown").
    pub shutdown_grace: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            hostname: "0.0.0.0".to_string(),
            port: 8080,
            allowed_hosts: vec!["localhost".to_string(), "127.0.0.1".to_string()],
            shutdown_grace: Duration::from_secs(30),
        }
    }
}

/// Result of one `handle_request` call (spec §4.13 steps 1-6).
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub session_id: String,
    pub response: Value,
    pub event_id: String,
}

#[derive(Debug, Clone)]
pub struct ReplayedEvent {
    pub event_id: String,
    pub message: Value,
}

#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub restored_count: usize,
    pub failed_count: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownReport {
    pub sessions_marked_inactive: usize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct SessionManager {
    live: DashMap<String, Arc<BroadcastTransport>>,
    persistence: Arc<TransportPersistenceStore>,
    events: Arc<ChunkedEventStore>,
    tokens: Arc<TokenManager>,
    dispatcher: Arc<dyn MessageDispatcher>,
    config: ManagerConfig,
    in_flight: AtomicUsize,
}

impl SessionManager {
    pub fn new(
        persistence: Arc<TransportPersistenceStore>,
        events: Arc<ChunkedEventStore>,
        tokens: Arc<TokenManager>,
        dispatcher: Arc<dyn MessageDispatcher>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            live: DashMap::new(),
            persistence,
            events,
            tokens,
            dispatcher,
            config,
            in_flight: AtomicUsize::new(0),
        }
    }

    /// Startup restoration (spec §4.5/§4.13): reconstructs a transport for
    /// every persisted `is_active` session and absorbs it into the live map.
    /// Per-session failures are isolated, never aborting the batch.
    pub async fn restore(&self) -> Result<RestoreReport> {
        let outcome = self
            .persistence
            .restore_transports(|session| async move {
                self.live.insert(
                    session.session_id.clone(),
                    Arc::new(BroadcastTransport::new(session.session_id)),
                );
                Ok::<(), Error>(())
            })
            .await?;

        Ok(RestoreReport {
            restored_count: outcome.restored_count(),
            failed_count: outcome.failed_count,
            errors: outcome.errors,
        })
    }

    /// The request pipeline (spec §4.13 steps 1-6). `session_id_header` is
    /// the client-supplied session id, if any; `access_token` is the bearer
    /// token presented for authenticated routes.
    pub async fn handle_request(
        &self,
        session_id_header: Option<&str>,
        access_token: Option<&str>,
        message: Value,
    ) -> Result<DispatchOutcome> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        if let Some(token) = access_token {
            if self.tokens.validate_access_token(token).await?.is_none() {
                return Err(Error::authentication("invalid or expired access token"));
            }
        }

        let session_id = match session_id_header {
            Some(id) if self.live.contains_key(id) => id.to_string(),
            Some(id) => {
                self.bind_session(id.to_string()).await?;
                id.to_string()
            }
            None => {
                let id = Uuid::new_v4().to_string();
                self.bind_session(id.clone()).await?;
                id
            }
        };

        let response = self.dispatcher.dispatch(&session_id, message).await?;
        let event_id = self.events.store_event(&session_id, &response).await?;

        if let Some(transport) = self.live.get(&session_id) {
            transport.send(response.clone()).await?;
        }
        self.persistence.update_activity(&session_id).await?;

        Ok(DispatchOutcome {
            session_id,
            response,
            event_id,
        })
    }

    async fn bind_session(&self, session_id: String) -> Result<()> {
        let transport = Arc::new(BroadcastTransport::new(session_id.clone()));
        let record = TransportSession {
            session_id: session_id.clone(),
            user_id: None,
            config: TransportConfigSnapshot {
                hostname: self.config.hostname.clone(),
                port: self.config.port,
                allowed_hosts: self.config.allowed_hosts.clone(),
            },
            created_at: time::now(),
            last_activity: time::now(),
            is_active: true,
            metadata: serde_json::json!({}),
        };
        self.persistence.persist(&record).await?;
        self.live.insert(session_id, transport);
        Ok(())
    }

    /// Subscribes to server-pushed messages for an SSE reconnect. `None` if
    /// the session isn't live (never bound, or dropped by shutdown).
    pub fn subscribe(&self, session_id: &str) -> Option<broadcast::Receiver<Value>> {
        self.live.get(session_id).map(|transport| transport.subscribe())
    }

    /// Replays events for a `Last-Event-Id` reconnect (spec §6): an empty
    /// `last_event_id` replays every stream's events in global timestamp
    /// order, matching [`relaymcp_events::ChunkedEventStore::replay_events_after`].
    pub async fn replay(&self, last_event_id: &str) -> Result<Vec<ReplayedEvent>> {
        let mut events = Vec::new();
        let mut sink = |event_id: String, message: Value| events.push(ReplayedEvent { event_id, message });
        self.events.replay_events_after(last_event_id, &mut sink).await?;
        Ok(events)
    }

    pub fn live_session_count(&self) -> usize {
        self.live.len()
    }

    /// Graceful shutdown (spec §4.13 "on graceful shutdown"): marks every
    /// live session inactive, then waits up to `shutdown_grace` for in-flight
    /// `handle_request` calls to finish before dropping the live map. Event
    /// store and KV flushing is the caller's responsibility — this crate's
    /// KV contract has no explicit flush operation.
    pub async fn shutdown(&self) -> Result<ShutdownReport> {
        let session_ids: Vec<String> = self.live.iter().map(|entry| entry.key().clone()).collect();
        for session_id in &session_ids {
            self.persistence.mark_inactive(session_id).await?;
        }

        let deadline = tokio::time::Instant::now() + self.config.shutdown_grace;
        while self.in_flight.load(Ordering::SeqCst) > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        self.live.clear();
        Ok(ShutdownReport {
            sessions_marked_inactive: session_ids.len(),
        })
    }
}
