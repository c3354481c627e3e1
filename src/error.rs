//! Host-facing error channel types.
//!
//! Internally the crate propagates `anyhow::Error`. Anything that must reach
//! the host (per-frame failures, initialization failures, delivery failures)
//! is converted into a `ProctorError` and sent over the session's error channel.

use serde::Serialize;
use std::fmt;

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Model or backend failed to load. The analyzer stays non-ready.
    Initialization,
    /// A single frame could not be captured or analyzed.
    Frame,
    /// A required runtime capability is missing. Scheduling stops.
    Capability,
    /// A batch could not be delivered to the session store.
    Delivery,
}

impl ErrorKind {
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::Initialization | ErrorKind::Capability)
    }
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct ProctorError {
    pub kind: ErrorKind,
    pub component: String,
    pub message: String,
}

impl ProctorError {
    pub fn new(kind: ErrorKind, component: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            component: component.into(),
            message: message.into(),
        }
    }

    /// Flatten an `anyhow` chain into a channel error.
    pub fn from_anyhow(kind: ErrorKind, component: impl Into<String>, err: &anyhow::Error) -> Self {
        Self::new(kind, component, format!("{:#}", err))
    }
}

impl fmt::Display for ProctorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} error in {}: {}", self.kind, self.component, self.message)
    }
}

impl std::error::Error for ProctorError {}
