use anyhow::{anyhow, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};

use super::{Session, SessionMetrics, SessionStore, VideoRef};
use crate::{new_event_id, now_ms, ProctorEvent};

/// SQLite-backed session store. Uploaded videos are written to a `videos/`
/// directory next to the database file.
pub struct SqliteSessionStore {
    conn: Connection,
    video_dir: PathBuf,
}

impl SqliteSessionStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("failed to open session database {}", db_path))?;
        let video_dir = if db_path == ":memory:" {
            std::env::temp_dir().join("proctor-videos")
        } else {
            Path::new(db_path)
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_default()
                .join("videos")
        };
        let mut store = Self { conn, video_dir };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn with_video_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.video_dir = dir.into();
        self
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS sessions (
              id TEXT PRIMARY KEY,
              candidate_name TEXT NOT NULL,
              candidate_id TEXT,
              started_at INTEGER NOT NULL,
              ended_at INTEGER,
              video_url TEXT,
              video_bytes INTEGER,
              avg_fps REAL,
              dropped_frames INTEGER
            );

            CREATE TABLE IF NOT EXISTS session_events (
              seq INTEGER PRIMARY KEY AUTOINCREMENT,
              session_id TEXT NOT NULL REFERENCES sessions(id),
              event_id TEXT NOT NULL,
              ts INTEGER NOT NULL,
              payload_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_session_events ON session_events(session_id, ts);
            "#,
        )?;
        Ok(())
    }

    fn require_session(&self, session_id: &str) -> Result<()> {
        let exists: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM sessions WHERE id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .optional()?;
        match exists {
            Some(_) => Ok(()),
            None => Err(anyhow!("session {} not found", session_id)),
        }
    }

    /// Ids of all sessions, most recent first.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM sessions ORDER BY started_at DESC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

impl SessionStore for SqliteSessionStore {
    fn name(&self) -> &'static str {
        "sqlite"
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
        self.conn.execute(
            "INSERT INTO sessions(id, candidate_name, candidate_id, started_at) VALUES (?1, ?2, ?3, ?4)",
            params![id, candidate_name, candidate_id, now_ms()],
        )?;
        Ok(id)
    }

    fn append_events(&mut self, session_id: &str, events: &[ProctorEvent]) -> Result<()> {
        self.require_session(session_id)?;
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO session_events(session_id, event_id, ts, payload_json) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for ev in events {
                let payload = serde_json::to_string(ev)?;
                stmt.execute(params![session_id, ev.id(), ev.ts(), payload])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn end_session(&mut self, session_id: &str) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE sessions SET ended_at = ?1 WHERE id = ?2",
            params![now_ms(), session_id],
        )?;
        if updated == 0 {
            return Err(anyhow!("session {} not found", session_id));
        }
        Ok(())
    }

    fn upload_video(&mut self, session_id: &str, bytes: &[u8], filename: &str) -> Result<String> {
        self.require_session(session_id)?;
        let file_name = Path::new(filename)
            .file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.is_empty())
            .unwrap_or("recording.webm");
        std::fs::create_dir_all(&self.video_dir).with_context(|| {
            format!("failed to create video dir {}", self.video_dir.display())
        })?;
        let path = self.video_dir.join(format!("{}-{}", session_id, file_name));
        std::fs::write(&path, bytes)
            .with_context(|| format!("failed to write video {}", path.display()))?;
        let url = format!("file://{}", path.display());
        self.conn.execute(
            "UPDATE sessions SET video_url = ?1, video_bytes = ?2 WHERE id = ?3",
            params![url, bytes.len() as i64, session_id],
        )?;
        Ok(url)
    }

    fn get_session(&mut self, session_id: &str) -> Result<Session> {
        let mut session = self
            .conn
            .query_row(
                r#"
                SELECT id, candidate_name, candidate_id, started_at, ended_at,
                       video_url, video_bytes, avg_fps, dropped_frames
                FROM sessions WHERE id = ?1
                "#,
                params![session_id],
                |row| {
                    let video_url: Option<String> = row.get(5)?;
                    let video_bytes: Option<i64> = row.get(6)?;
                    let avg_fps: Option<f64> = row.get(7)?;
                    let dropped: Option<i64> = row.get(8)?;
                    Ok(Session {
                        id: row.get(0)?,
                        candidate_name: row.get(1)?,
                        candidate_id: row.get(2)?,
                        started_at: row.get(3)?,
                        ended_at: row.get(4)?,
                        events: Vec::new(),
                        video_ref: (video_url.is_some() || video_bytes.is_some()).then(|| {
                            VideoRef {
                                url: video_url,
                                bytes: video_bytes.map(|b| b.max(0) as u64),
                            }
                        }),
                        metrics: avg_fps.map(|avg_fps| SessionMetrics {
                            avg_fps,
                            dropped_frames: dropped.unwrap_or(0).max(0) as u64,
                        }),
                    })
                },
            )
            .optional()?
            .ok_or_else(|| anyhow!("session {} not found", session_id))?;

        let mut stmt = self.conn.prepare(
            "SELECT payload_json FROM session_events WHERE session_id = ?1 ORDER BY seq ASC",
        )?;
        let mut rows = stmt.query(params![session_id])?;
        while let Some(row) = rows.next()? {
            let payload: String = row.get(0)?;
            let ev: ProctorEvent = serde_json::from_str(&payload)
                .with_context(|| format!("corrupt event payload in session {}", session_id))?;
            session.events.push(ev);
        }
        Ok(session)
    }

    fn record_metrics(&mut self, session_id: &str, metrics: SessionMetrics) -> Result<()> {
        let updated = self.conn.execute(
            "UPDATE sessions SET avg_fps = ?1, dropped_frames = ?2 WHERE id = ?3",
            params![metrics.avg_fps, metrics.dropped_frames as i64, session_id],
        )?;
        if updated == 0 {
            return Err(anyhow!("session {} not found", session_id));
        }
        Ok(())
    }
}
