//! Per-request observability events.
//!
//! The router hands every handled message to an [`EventSink`]. Sinks must return
//! immediately and never fail the caller: [`ChannelSink`] only enqueues, and a
//! background task ([`drain_to_store`]) logs and persists events at its own pace.

use rusqlite::params;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::db::{self, Store};

#[derive(Debug, Clone, PartialEq)]
pub struct RequestEvent {
    pub method: String,
    pub tool: Option<String>,
    pub project_id: String,
    pub elapsed: Duration,
    pub ok: bool,
}

pub trait EventSink: Send + Sync {
    fn record(&self, event: RequestEvent);
}

/// Forwards events to a background consumer over an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<RequestEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RequestEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn record(&self, event: RequestEvent) {
        // A closed consumer only costs us the event.
        if self.tx.send(event).is_err() {
            tracing::trace!("telemetry consumer gone; event dropped");
        }
    }
}

/// Keeps events in memory. Handy for tests and for embedding the router.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<RequestEvent>>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<RequestEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: RequestEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

/// Consume events until every sender is dropped: log each one and append it to `request_log`.
pub async fn drain_to_store(mut rx: mpsc::UnboundedReceiver<RequestEvent>, store: Store) {
    while let Some(event) = rx.recv().await {
        log_event(&event);
        let store = store.clone();
        let persisted = tokio::task::spawn_blocking(move || persist(&store, &event)).await;
        match persisted {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to persist request event"),
            Err(e) => tracing::warn!(error = %e, "request event task failed"),
        }
    }
    tracing::debug!("telemetry drain stopped");
}

pub fn persist(store: &Store, event: &RequestEvent) -> rusqlite::Result<()> {
    let conn = store.conn();
    conn.execute(
        "INSERT INTO request_log (method, tool, project_id, elapsed_us, ok, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            event.method,
            event.tool,
            event.project_id,
            i64::try_from(event.elapsed.as_micros()).unwrap_or(i64::MAX),
            event.ok,
            db::now(),
        ],
    )?;
    Ok(())
}

/// Delete `request_log` rows older than `days`. Returns how many went.
pub fn prune_request_log(store: &Store, days: u32) -> rusqlite::Result<usize> {
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(i64::from(days)))
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
    store
        .conn()
        .execute("DELETE FROM request_log WHERE created_at < ?1", params![cutoff])
}

fn log_event(event: &RequestEvent) {
    tracing::info!(
        method = %event.method,
        tool = event.tool.as_deref().unwrap_or("-"),
        project_id = %event.project_id,
        elapsed_ms = event.elapsed.as_secs_f64() * 1000.0,
        ok = event.ok,
        "request handled"
    );
}
