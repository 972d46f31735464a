//! Session registry.
//!
//! A session is a bundle of backend client handles identified by an opaque
//! string. Sessions are created on first reference, connect every enabled
//! backend once, and are torn down by an explicit close or the age sweep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;

use crate::backend::{
    BackendKind, Connector, DocumentClient, KeyValueClient, RelationalClient, TimeSeriesClient,
};
use crate::config::AppConfig;
use crate::error::{McpError, Result};

/// Session id used when the transport does not supply one.
pub const DEFAULT_SESSION_ID: &str = "default";

/// One slot per backend kind. Empty when disabled, unconfigured, or the
/// connection failed. Never modified after the session is built.
#[derive(Default)]
pub struct ClientSlots {
    pub relational: Option<Arc<dyn RelationalClient>>,
    pub key_value: Option<Arc<dyn KeyValueClient>>,
    pub document: Option<Arc<dyn DocumentClient>>,
    pub time_series: Option<Arc<dyn TimeSeriesClient>>,
}

impl ClientSlots {
    /// Whether the slot for `kind` holds a handle.
    pub fn is_connected(&self, kind: BackendKind) -> bool {
        match kind {
            BackendKind::Relational => self.relational.is_some(),
            BackendKind::KeyValue => self.key_value.is_some(),
            BackendKind::Document => self.document.is_some(),
            BackendKind::TimeSeries => self.time_series.is_some(),
        }
    }

    /// Kinds with a live handle, in initialization order.
    pub fn connected(&self) -> Vec<BackendKind> {
        BackendKind::ALL
            .into_iter()
            .filter(|kind| self.is_connected(*kind))
            .collect()
    }
}

/// A ready session.
pub struct Session {
    id: String,
    created_at: DateTime<Utc>,
    clients: ClientSlots,
    cleaned_up: AtomicBool,
}

impl Session {
    /// Assemble a session from already-connected clients.
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, clients: ClientSlots) -> Self {
        Self {
            id: id.into(),
            created_at,
            clients,
            cleaned_up: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn clients(&self) -> &ClientSlots {
        &self.clients
    }

    /// Whether `cleanup` has already run.
    pub fn is_cleaned_up(&self) -> bool {
        self.cleaned_up.load(Ordering::Acquire)
    }

    /// Whether the session is older than `max_age` at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, max_age: Duration) -> bool {
        (now - self.created_at)
            .to_std()
            .map(|age| age > max_age)
            .unwrap_or(false)
    }

    pub fn relational(&self) -> Result<&Arc<dyn RelationalClient>> {
        self.clients
            .relational
            .as_ref()
            .ok_or_else(|| not_connected(BackendKind::Relational))
    }

    pub fn key_value(&self) -> Result<&Arc<dyn KeyValueClient>> {
        self.clients
            .key_value
            .as_ref()
            .ok_or_else(|| not_connected(BackendKind::KeyValue))
    }

    pub fn document(&self) -> Result<&Arc<dyn DocumentClient>> {
        self.clients
            .document
            .as_ref()
            .ok_or_else(|| not_connected(BackendKind::Document))
    }

    pub fn time_series(&self) -> Result<&Arc<dyn TimeSeriesClient>> {
        self.clients
            .time_series
            .as_ref()
            .ok_or_else(|| not_connected(BackendKind::TimeSeries))
    }

    /// Close every live handle.
    ///
    /// Each backend is closed independently; failures are logged and returned,
    /// never short-circuit. A second call does nothing.
    pub async fn cleanup(&self) -> Vec<McpError> {
        if self.cleaned_up.swap(true, Ordering::AcqRel) {
            return Vec::new();
        }

        let mut errors = Vec::new();
        let mut record = |kind: BackendKind, outcome: Result<()>| {
            if let Err(e) = outcome {
                tracing::warn!("Failed to close {} for session '{}': {}", kind, self.id, e);
                errors.push(e);
            }
        };

        if let Some(client) = &self.clients.relational {
            record(BackendKind::Relational, client.close().await);
        }
        if let Some(client) = &self.clients.key_value {
            record(BackendKind::KeyValue, client.close().await);
        }
        if let Some(client) = &self.clients.document {
            record(BackendKind::Document, client.close().await);
        }
        if let Some(client) = &self.clients.time_series {
            record(BackendKind::TimeSeries, client.close().await);
        }

        tracing::info!("Session '{}' cleaned up", self.id);
        errors
    }
}

fn not_connected(kind: BackendKind) -> McpError {
    McpError::NotConnected(kind.name().to_string())
}

/// Snapshot of one session for the inventory resource.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub age_secs: i64,
    pub connected: Vec<BackendKind>,
}

/// Owned map from session id to session.
///
/// Each entry holds a `OnceCell`, so concurrent callers asking for the same
/// unknown id share one initialization and at most one set of connections is
/// ever opened per id.
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<OnceCell<Arc<Session>>>>,
    config: Arc<AppConfig>,
    connector: Arc<dyn Connector>,
    max_sessions: Option<usize>,
}

impl SessionRegistry {
    pub fn new(config: Arc<AppConfig>, connector: Arc<dyn Connector>) -> Self {
        Self {
            sessions: DashMap::new(),
            config,
            connector,
            max_sessions: None,
        }
    }

    /// Refuse new ids once `max` sessions exist, counting ones still connecting.
    ///
    /// Callers racing on distinct new ids can overshoot by the number of racers.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = Some(max);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Return the session for `id`, connecting a new one on first use.
    ///
    /// Existing sessions are returned unchanged. Backend failures leave the
    /// matching slot empty. An empty id, or a new id past the session limit,
    /// is rejected.
    pub async fn get_or_create(&self, id: &str) -> Result<Arc<Session>> {
        if id.is_empty() {
            return Err(McpError::invalid_arg("session_id", "must not be empty"));
        }
        if let Some(max) = self.max_sessions {
            if !self.sessions.contains_key(id) && self.sessions.len() >= max {
                tracing::warn!("Refusing session '{}': limit of {} reached", id, max);
                return Err(McpError::SessionLimit(max));
            }
        }

        // Clone the cell out so no map guard is held across the connect awaits.
        let cell = {
            let entry = self.sessions.entry(id.to_string()).or_default();
            Arc::clone(entry.value())
        };

        let session = cell.get_or_init(|| self.open(id)).await;
        Ok(Arc::clone(session))
    }

    /// Look up a ready session without creating one.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(id)
            .and_then(|cell| cell.value().get().cloned())
    }

    /// Whether a ready session exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Number of ready sessions.
    pub fn len(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn open(&self, id: &str) -> Arc<Session> {
        tracing::info!("Initializing session '{}'", id);
        let config = &self.config;
        let mut clients = ClientSlots::default();

        // One backend at a time; a failure never stops the next one.
        for kind in BackendKind::ALL {
            if !config.is_enabled(kind) {
                tracing::info!("{} disabled by configuration", kind);
                continue;
            }
            if !config.is_configured(kind) {
                tracing::warn!("{} enabled but connection parameters are missing", kind);
                continue;
            }

            let outcome = match kind {
                BackendKind::Relational => self
                    .connector
                    .connect_relational(&config.postgres)
                    .await
                    .map(|c| clients.relational = Some(c)),
                BackendKind::KeyValue => self
                    .connector
                    .connect_key_value(&config.redis)
                    .await
                    .map(|c| clients.key_value = Some(c)),
                BackendKind::Document => self
                    .connector
                    .connect_document(&config.mongodb)
                    .await
                    .map(|c| clients.document = Some(c)),
                BackendKind::TimeSeries => self
                    .connector
                    .connect_time_series(&config.influxdb)
                    .await
                    .map(|c| clients.time_series = Some(c)),
            };

            match outcome {
                Ok(()) => tracing::info!("Session '{}' connected to {}", id, kind),
                Err(e) => tracing::warn!("Could not connect to {} for session '{}': {}", kind, id, e),
            }
        }

        Arc::new(Session::new(id, Utc::now(), clients))
    }

    /// Remove and clean up one session. Unknown ids are a no-op.
    ///
    /// A session still connecting is waited for and then closed, so its
    /// handles are never left open outside the registry.
    pub async fn close(&self, id: &str) -> bool {
        let Some(cell) = self.sessions.get(id).map(|entry| Arc::clone(entry.value())) else {
            return false;
        };
        let session = Arc::clone(cell.get_or_init(|| self.open(id)).await);

        // Only the entry we waited on; a concurrent close or a recreated id wins.
        let removed = self
            .sessions
            .remove_if(id, |_, current| Arc::ptr_eq(current, &cell))
            .is_some();
        if removed {
            session.cleanup().await;
        }
        removed
    }

    /// Clean up every session and empty the registry.
    pub async fn close_all(&self) {
        let ids: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.close(&id).await;
        }
    }

    /// Remove and clean up every session older than `max_age`.
    pub async fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_at(Utc::now(), max_age).await
    }

    /// [`sweep`](Self::sweep) against an explicit clock reading.
    pub async fn sweep_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .get()
                    .is_some_and(|s| s.is_expired(now, max_age))
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut swept = 0;
        for id in expired {
            // Re-check under the shard lock in case the id was recreated meanwhile.
            let removed = self.sessions.remove_if(&id, |_, cell| {
                cell.get().is_some_and(|s| s.is_expired(now, max_age))
            });
            if let Some((_, cell)) = removed {
                if let Some(session) = cell.get() {
                    let errors = session.cleanup().await;
                    if !errors.is_empty() {
                        tracing::warn!(
                            "Session '{}' swept with {} close error(s)",
                            id,
                            errors.len()
                        );
                    }
                    swept += 1;
                }
            }
        }

        if swept > 0 {
            tracing::info!("Swept {} expired session(s)", swept);
        }
        swept
    }

    /// Snapshot of all ready sessions, oldest first.
    pub fn list(&self) -> Vec<SessionSummary> {
        let now = Utc::now();
        let mut summaries: Vec<SessionSummary> = self
            .sessions
            .iter()
            .filter_map(|entry| entry.value().get().cloned())
            .map(|s| SessionSummary {
                id: s.id().to_string(),
                created_at: s.created_at(),
                age_secs: (now - s.created_at()).num_seconds(),
                connected: s.clients().connected(),
            })
            .collect();
        summaries.sort_by_key(|s| s.created_at);
        summaries
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the task is aborted.
    pub fn spawn_sweeper(self: Arc<Self>, interval: Duration, max_age: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                self.sweep(max_age).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    #[test]
    fn test_is_expired() {
        let created = Utc::now();
        let session = Session::new("s", created, ClientSlots::default());
        let max_age = Duration::from_secs(60);

        assert!(!session.is_expired(created, max_age));
        assert!(!session.is_expired(created + ChronoDuration::seconds(60), max_age));
        assert!(session.is_expired(created + ChronoDuration::seconds(61), max_age));
        // A clock reading before creation never counts as expired.
        assert!(!session.is_expired(created - ChronoDuration::seconds(600), max_age));
    }

    #[tokio::test]
    async fn test_cleanup_of_empty_session_is_idempotent() {
        let session = Session::new("s", Utc::now(), ClientSlots::default());
        assert!(session.cleanup().await.is_empty());
        assert!(session.is_cleaned_up());
        assert!(session.cleanup().await.is_empty());
    }

    #[test]
    fn test_empty_slots_report_not_connected() {
        let session = Session::new("s", Utc::now(), ClientSlots::default());
        assert!(session.clients().connected().is_empty());
        let err = session.relational().err().unwrap();
        assert_eq!(err.to_string(), "postgres is not connected");
    }
}
