//! SessionRunner – loads a session, applies exactly **one** operation to its
//! [`SessionContext`](crate::SessionContext), and persists the result.
//!
//! ## When should you use `SessionRunner`?
//! * **Web services**: one upload or one chat turn per HTTP request, with the
//!   session saved for the next roundtrip.
//! * **Scripts and tests** that want the full load → step → save cycle.
//!
//! ## When should you use `SessionContext` directly?
//! * Unit tests of classification or chat logic, where storage is noise.
//! * Custom persistence (e.g. batching several steps before one save).
//!
//! Steps on the same session id are serialized by a per-session lock, so two
//! concurrent requests can never overwrite each other's turns. Different
//! sessions run fully in parallel and share only the classifier and the
//! response service.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    classifier::LoadedClassifier,
    conversation::Message,
    error::{FlowError, Result},
    response::ResponseService,
    storage::{Session, SessionStorage},
    upload::UploadOutcome,
};

/// High-level helper that orchestrates the _load → step → save_ pattern.
#[derive(Clone)]
pub struct SessionRunner {
    classifier: LoadedClassifier,
    responder: Arc<dyn ResponseService>,
    storage: Arc<dyn SessionStorage>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl SessionRunner {
    pub fn new(
        classifier: LoadedClassifier,
        responder: Arc<dyn ResponseService>,
        storage: Arc<dyn SessionStorage>,
    ) -> Self {
        Self {
            classifier,
            responder,
            storage,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn classifier(&self) -> &LoadedClassifier {
        &self.classifier
    }

    /// Create and persist a new session opened with the greeting.
    pub async fn start_session(&self) -> Result<Session> {
        let session = Session::new_random();
        self.storage.save(session.clone()).await?;
        info!(session_id = %session.id, "Session created");
        Ok(session)
    }

    pub async fn session(&self, session_id: &str) -> Result<Session> {
        self.storage
            .get(session_id)
            .await?
            .ok_or_else(|| FlowError::SessionNotFound(session_id.to_string()))
    }

    pub async fn end_session(&self, session_id: &str) -> Result<()> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        self.load_locked(session_id).await?;
        self.storage.delete(session_id).await?;
        self.locks.remove(session_id);
        info!(session_id = %session_id, "Session deleted");
        Ok(())
    }

    /// Hand uploaded image bytes to the session.
    pub async fn upload(&self, session_id: &str, bytes: Vec<u8>) -> Result<UploadOutcome> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load_locked(session_id).await?;
        let outcome = session.context.analyze_upload(&self.classifier, bytes).await;

        // Unchanged contexts need no write.
        if matches!(outcome, UploadOutcome::Analyzed { .. }) {
            self.storage.save(session).await?;
        }
        Ok(outcome)
    }

    /// Run one chat turn and return the assistant's reply.
    pub async fn chat(&self, session_id: &str, user_text: &str) -> Result<Message> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load_locked(session_id).await?;
        let reply = session
            .context
            .respond(self.responder.as_ref(), user_text)
            .await;
        self.storage.save(session).await?;
        Ok(reply)
    }

    /// Generate a structured report for the current analysis, if any.
    pub async fn report(&self, session_id: &str) -> Result<Option<Message>> {
        let lock = self.lock_for(session_id);
        let _guard = lock.lock().await;

        let mut session = self.load_locked(session_id).await?;
        let report = session.context.report(self.responder.as_ref()).await;
        if report.is_some() {
            self.storage.save(session).await?;
        }
        Ok(report)
    }

    /// Load a session while holding its lock; unknown ids drop their lock entry.
    async fn load_locked(&self, session_id: &str) -> Result<Session> {
        let result = self.session(session_id).await;
        if let Err(FlowError::SessionNotFound(_)) = &result {
            self.locks.remove(session_id);
        }
        result
    }

    fn lock_for(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }
}
