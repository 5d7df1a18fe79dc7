//! Per-request transaction context.
//!
//! A [`RequestContext`] maps database names to the sessions acquired for one
//! inbound request. It is built by the coordinator's pre-stage, handed to
//! the business logic by exclusive reference, and torn down by the
//! post-stage. It never outlives the request and is never shared.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::{TxError, TxResult};
use crate::session::Session;

/// Declared access to one database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessKind {
    /// No transaction; statements run in autocommit.
    Read,
    /// Statements run inside an explicit transaction, committed or rolled
    /// back at request end.
    Write,
}

/// One database an action declares it touches, and how.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DatabaseDescriptor {
    pub name: String,
    pub access: AccessKind,
}

impl DatabaseDescriptor {
    pub fn read(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access: AccessKind::Read,
        }
    }

    pub fn write(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            access: AccessKind::Write,
        }
    }
}

/// Sessions and error state owned by one in-flight request.
pub struct RequestContext {
    id: Uuid,
    sessions: HashMap<String, Session>,
    error: Option<String>,
    finalized: bool,
}

impl RequestContext {
    pub(crate) fn new(sessions: HashMap<String, Session>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sessions,
            error: None,
            finalized: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Databases with a session attached.
    pub fn databases(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    /// Borrow the session for a database to run statements against it.
    pub fn session_mut(&mut self, database: &str) -> TxResult<&mut Session> {
        self.sessions
            .get_mut(database)
            .ok_or_else(|| TxError::unknown_database(database))
    }

    /// Record a business error. First write wins; once set the error is
    /// never cleared, and finalization will roll back instead of commit.
    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Whether the post-stage has already run for this context.
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub(crate) fn mark_finalized(&mut self) {
        self.finalized = true;
    }

    pub(crate) fn take_sessions(&mut self) -> Vec<(String, Session)> {
        self.sessions.drain().collect()
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("databases", &self.sessions.keys().collect::<Vec<_>>())
            .field("error", &self.error)
            .field("finalized", &self.finalized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_error_first_write_wins() {
        let mut ctx = RequestContext::new(HashMap::new());
        assert!(ctx.error().is_none());
        ctx.record_error("first");
        ctx.record_error("second");
        assert_eq!(ctx.error(), Some("first"));
    }

    #[test]
    fn test_session_mut_unknown_database() {
        let mut ctx = RequestContext::new(HashMap::new());
        let err = ctx.session_mut("nope").unwrap_err();
        assert!(matches!(err, TxError::UnknownDatabase { .. }));
    }

    #[test]
    fn test_descriptor_constructors() {
        let d = DatabaseDescriptor::write("tcs_catalog");
        assert_eq!(d.access, AccessKind::Write);
        assert_eq!(d.name, "tcs_catalog");
        assert_eq!(DatabaseDescriptor::read("x").access, AccessKind::Read);
    }

    #[test]
    fn test_contexts_get_distinct_ids() {
        let a = RequestContext::new(HashMap::new());
        let b = RequestContext::new(HashMap::new());
        assert_ne!(a.id(), b.id());
    }
}
