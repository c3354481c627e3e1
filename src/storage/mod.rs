//! Session storage collaborators.
//!
//! The kernel never persists anything itself. It talks to a `SessionStore`:
//! - `InMemorySessionStore`: process-local, for tests and dry runs
//! - `SqliteSessionStore`: local database, videos written beside it
//! - `HttpSessionStore`: remote REST service (feature: storage-http)

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::{StorageBackend, StorageSettings};
use crate::scoring::{build_report, IntegrityReport};
use crate::{new_event_id, now_ms, ProctorEvent};

#[cfg(feature = "storage-http")]
pub mod http;
pub mod sqlite;

#[cfg(feature = "storage-http")]
pub use http::HttpSessionStore;
pub use sqlite::SqliteSessionStore;

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VideoRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetrics {
    pub avg_fps: f64,
    pub dropped_frames: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    pub candidate_name: String,
    pub started_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<i64>,
    #[serde(default)]
    pub events: Vec<ProctorEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_ref: Option<VideoRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SessionMetrics>,
}

impl Session {
    /// Report over the session's log; an open session ends at `now`.
    pub fn report(&self, now: i64) -> IntegrityReport {
        build_report(
            &self.id,
            &self.events,
            self.started_at,
            self.ended_at.unwrap_or(now),
        )
    }
}

/// Storage collaborator consumed by the session lifecycle.
pub trait SessionStore: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    fn create_session(&mut self, candidate_name: &str, candidate_id: Option<&str>)
        -> Result<String>;

    fn append_events(&mut self, session_id: &str, events: &[ProctorEvent]) -> Result<()>;

    fn end_session(&mut self, session_id: &str) -> Result<()>;

    /// Store a recording and return the URL it can be fetched from.
    fn upload_video(&mut self, session_id: &str, bytes: &[u8], filename: &str) -> Result<String>;

    fn get_session(&mut self, session_id: &str) -> Result<Session>;

    fn get_report(&mut self, session_id: &str) -> Result<IntegrityReport> {
        Ok(self.get_session(session_id)?.report(now_ms()))
    }

    /// Attach capture metrics. Backends without a metrics field ignore them.
    fn record_metrics(&mut self, _session_id: &str, _metrics: SessionMetrics) -> Result<()> {
        Ok(())
    }
}

/// Store shared between the session and its flush worker.
pub type SharedStore = Arc<Mutex<dyn SessionStore>>;

pub fn shared<S: SessionStore + 'static>(store: S) -> SharedStore {
    Arc::new(Mutex::new(store))
}

/// Run `f` against the shared store, mapping lock poisoning to an error.
pub fn with_store<T>(
    store: &SharedStore,
    f: impl FnOnce(&mut dyn SessionStore) -> Result<T>,
) -> Result<T> {
    let mut guard = store
        .lock()
        .map_err(|_| anyhow!("session store lock poisoned"))?;
    f(&mut *guard)
}

/// Open the configured backend.
pub fn open_store(settings: &StorageSettings) -> Result<SharedStore> {
    match settings.backend {
        StorageBackend::Memory => Ok(shared(InMemorySessionStore::new())),
        StorageBackend::Sqlite => Ok(shared(SqliteSessionStore::open(&settings.db_path)?)),
        #[cfg(feature = "storage-http")]
        StorageBackend::Http => {
            let url = settings
                .api_url
                .as_deref()
                .ok_or_else(|| anyhow!("storage.api_url is required for the http backend"))?;
            Ok(shared(HttpSessionStore::new(url, settings.api_token.clone())?))
        }
        #[cfg(not(feature = "storage-http"))]
        StorageBackend::Http => Err(anyhow!(
            "http storage requires the storage-http feature"
        )),
    }
}

#[derive(Clone, Debug, Default)]
pub struct InMemorySessionStore {
    sessions: HashMap<String, Session>,
    videos: HashMap<String, Vec<u8>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn session_mut(&mut self, session_id: &str) -> Result<&mut Session> {
        self.sessions
            .get_mut(session_id)
            .ok_or_else(|| anyhow!("session {} not found", session_id))
    }

    pub fn video(&self, session_id: &str) -> Option<&[u8]> {
        self.videos.get(session_id).map(|v| v.as_slice())
    }
}

impl SessionStore for InMemorySessionStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_session(
        &mut self,
        candidate_name: &str,
        candidate_id: Option<&str>,
    ) -> Result<String> {
        if candidate_name.trim().is_empty() {
            return Err(anyhow!("candidate name must not be empty"));
        }
        let id = new_event_id();
        self.sessions.insert(
            id.clone(),
            Session {
                id: id.clone(),
                candidate_id: candidate_id.map(str::to_string),
                candidate_name: candidate_name.to_string(),
                started_at: now_ms(),
                ended_at: None,
                events: Vec::new(),
                video_ref: None,
                metrics: None,
            },
        );
        Ok(id)
    }

    fn append_events(&mut self, session_id: &str, events: &[ProctorEvent]) -> Result<()> {
        self.session_mut(session_id)?
            .events
            .extend(events.iter().cloned());
        Ok(())
    }

    fn end_session(&mut self, session_id: &str) -> Result<()> {
        self.session_mut(session_id)?.ended_at = Some(now_ms());
        Ok(())
    }

    fn upload_video(&mut self, session_id: &str, bytes: &[u8], filename: &str) -> Result<String> {
        let url = format!("memory://{}/{}", session_id, filename);
        self.session_mut(session_id)?.video_ref = Some(VideoRef {
            url: Some(url.clone()),
            bytes: Some(bytes.len() as u64),
        });
        self.videos.insert(session_id.to_string(), bytes.to_vec());
        Ok(url)
    }

    fn get_session(&mut self, session_id: &str) -> Result<Session> {
        self.sessions
            .get(session_id)
            .cloned()
            .ok_or_else(|| anyhow!("session {} not found", session_id))
    }

    fn record_metrics(&mut self, session_id: &str, metrics: SessionMetrics) -> Result<()> {
        self.session_mut(session_id)?.metrics = Some(metrics);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventType;

    #[test]
    fn in_memory_lifecycle() {
        let mut store = InMemorySessionStore::new();
        let id = store.create_session("Ada", Some("cand-7")).unwrap();
        store
            .append_events(
                &id,
                &[
                    ProctorEvent::with_id("a", EventType::PhoneDetected, now_ms()),
                    ProctorEvent::with_id("b", EventType::NoFace, now_ms()),
                ],
            )
            .unwrap();
        let url = store.upload_video(&id, b"webm", "take.webm").unwrap();
        store.end_session(&id).unwrap();

        let session = store.get_session(&id).unwrap();
        assert_eq!(session.candidate_id.as_deref(), Some("cand-7"));
        assert_eq!(session.events.len(), 2);
        assert!(session.ended_at.is_some());
        assert_eq!(session.video_ref.unwrap().url.unwrap(), url);
        assert_eq!(store.video(&id), Some(&b"webm"[..]));

        let report = store.get_report(&id).unwrap();
        assert_eq!(report.integrity_score, 70);
        assert_eq!(report.timeline.len(), 4);
    }

    #[test]
    fn unknown_session_is_an_error() {
        let mut store = InMemorySessionStore::new();
        assert!(store.append_events("missing", &[]).is_err());
        assert!(store.get_report("missing").is_err());
        assert!(store.create_session("  ", None).is_err());
    }

    #[test]
    fn session_json_uses_mongo_style_id() {
        let session = Session {
            id: "s1".into(),
            candidate_id: None,
            candidate_name: "Ada".into(),
            started_at: 10,
            ended_at: None,
            events: vec![],
            video_ref: None,
            metrics: Some(SessionMetrics {
                avg_fps: 7.5,
                dropped_frames: 3,
            }),
        };
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["_id"], "s1");
        assert_eq!(json["candidateName"], "Ada");
        assert_eq!(json["metrics"]["droppedFrames"], 3);

        let open = session.report(110);
        assert_eq!(open.duration_ms, 100);
    }
}
