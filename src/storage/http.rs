#![cfg(feature = "storage-http")]

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use url::Url;

use super::{Session, SessionStore};
use crate::scoring::IntegrityReport;
use crate::{new_event_id, ProctorEvent};

/// REST session service client.
///
/// Paths: `POST /api/sessions`, `PATCH /api/sessions/:id/end`,
/// `POST /api/sessions/:id/events`, `GET /api/sessions/:id`,
/// `POST /api/uploads/video`, `GET /api/reports/:id`. Mutating calls carry
/// the bearer token when one is configured.
pub struct HttpSessionStore {
    base: Url,
    token: Option<String>,
    agent: ureq::Agent,
}

#[derive(Deserialize)]
struct CreatedSession {
    #[serde(rename = "_id", alias = "id")]
    id: String,
}

#[derive(Deserialize)]
struct UploadedVideo {
    url: String,
}

impl HttpSessionStore {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let base = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid api url {}", base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!("api url must be http(s), got {}", base.scheme()));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout(Duration::from_secs(30))
            .build();
        Ok(Self {
            base,
            token: token.filter(|t| !t.trim().is_empty()),
            agent,
        })
    }

    fn endpoint(&self, path: &str) -> Result<String> {
        Ok(self
            .base
            .join(path)
            .with_context(|| format!("invalid api path {}", path))?
            .to_string())
    }

    fn request(&self, method: &str, path: &str, authorized: bool) -> Result<ureq::Request> {
        let mut req = self.agent.request(method, &self.endpoint(path)?);
        if authorized {
            if let Some(token) = &self.token {
                req = req.set("Authorization", &format!("Bearer {}", token));
            }
        }
        Ok(req)
    }
}

/// `multipart/form-data` body with a `sessionId` field and one `file` part.
fn multipart_body(boundary: &str, session_id: &str, filename: &str, bytes: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(bytes.len() + 512);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"sessionId\"\r\n\r\n{sid}\r\n",
            b = boundary,
            sid = session_id
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{f}\"\r\nContent-Type: video/webm\r\n\r\n",
            b = boundary,
            f = filename.replace('"', "")
        )
        .as_bytes(),
    );
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

impl SessionStore for HttpSessionStore {
    fn name(&self) -> &'static str {
        "http"
    }

    fn create_session(
        &mut self,
        candidate_name: &str,
        candidate_id: Option<&str>,
    ) -> Result<String> {
        let mut payload = json!({ "candidateName": candidate_name });
        if let Some(candidate_id) = candidate_id {
            payload["candidateId"] = json!(candidate_id);
        }
        let created: CreatedSession = self
            .request("POST", "/api/sessions", true)?
            .send_json(payload)
            .context("failed to create session")?
            .into_json()
            .context("invalid create-session response")?;
        Ok(created.id)
    }

    fn append_events(&mut self, session_id: &str, events: &[ProctorEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.request("POST", &format!("/api/sessions/{}/events", session_id), true)?
            .send_json(json!({ "events": events }))
            .context("failed to append events")?;
        Ok(())
    }

    fn end_session(&mut self, session_id: &str) -> Result<()> {
        self.request("PATCH", &format!("/api/sessions/{}/end", session_id), true)?
            .call()
            .context("failed to end session")?;
        Ok(())
    }

    fn upload_video(&mut self, session_id: &str, bytes: &[u8], filename: &str) -> Result<String> {
        let boundary = format!("proctor-{}", new_event_id());
        let body = multipart_body(&boundary, session_id, filename, bytes);
        let uploaded: UploadedVideo = self
            .request("POST", "/api/uploads/video", true)?
            .set(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send_bytes(&body)
            .context("failed to upload video")?
            .into_json()
            .context("invalid upload response")?;
        Ok(uploaded.url)
    }

    fn get_session(&mut self, session_id: &str) -> Result<Session> {
        let session = self
            .request("GET", &format!("/api/sessions/{}", session_id), false)?
            .call()
            .context("failed to fetch session")?
            .into_json()
            .context("invalid session response")?;
        Ok(session)
    }

    fn get_report(&mut self, session_id: &str) -> Result<IntegrityReport> {
        let report = self
            .request("GET", &format!("/api/reports/{}", session_id), false)?
            .call()
            .context("failed to fetch report")?
            .into_json()
            .context("invalid report response")?;
        Ok(report)
    }
}
