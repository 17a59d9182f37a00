use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    classifier::{ClassificationResult, LoadedClassifier},
    conversation::{ConversationStore, Message},
    error::InferenceError,
    prompt::{GREETING, SYSTEM_INSTRUCTION, build_prompt, diagnosis_message, report_prompt},
    response::ResponseService,
    upload::{AnalysisState, Fingerprint, UploadOutcome, UploadTracker},
};

/// Everything a single chat session knows.
///
/// Each operation takes the context explicitly; nothing here is shared
/// between sessions except the classifier and response service that are
/// passed in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionContext {
    conversation: ConversationStore,
    analysis: Option<ClassificationResult>,
    uploads: UploadTracker,
}

impl SessionContext {
    /// A fresh context whose conversation opens with the greeting.
    pub fn new() -> Self {
        let mut conversation = ConversationStore::new();
        conversation.append(Message::assistant(GREETING));
        Self {
            conversation,
            analysis: None,
            uploads: UploadTracker::default(),
        }
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.conversation
    }

    /// Classification of the most recently analyzed upload.
    pub fn analysis(&self) -> Option<&ClassificationResult> {
        self.analysis.as_ref()
    }

    pub fn analysis_state(&self) -> AnalysisState {
        self.uploads.state()
    }

    pub fn last_fingerprint(&self) -> Option<&Fingerprint> {
        self.uploads.fingerprint()
    }

    /// Classify an upload unless these exact bytes were already analyzed.
    ///
    /// On success the new result supersedes the previous one and a single
    /// diagnosis message is appended. Any failure leaves the context as it
    /// was.
    pub async fn analyze_upload(
        &mut self,
        classifier: &LoadedClassifier,
        bytes: Vec<u8>,
    ) -> UploadOutcome {
        let fingerprint = Fingerprint::of(&bytes);
        let Some(pending) = self.uploads.begin(fingerprint) else {
            info!("Upload matches the analyzed image, skipping classification");
            return UploadOutcome::AlreadyAnalyzed;
        };

        let classifier = match classifier {
            Ok(classifier) => Arc::clone(classifier),
            Err(e) => {
                warn!(error = %e, "Classifier unavailable, upload not analyzed");
                self.uploads.abort(pending);
                return UploadOutcome::ModelUnavailable(e.clone());
            }
        };

        info!(fingerprint = %pending.fingerprint(), bytes = bytes.len(), "Analyzing new upload");

        let prediction = tokio::task::spawn_blocking(move || classifier.predict_bytes(&bytes))
            .await
            .unwrap_or_else(|e| Err(InferenceError::Interrupted(e.to_string())));

        match prediction {
            Ok(result) => {
                self.uploads.complete(pending);
                let message = Message::assistant(diagnosis_message(&result));
                self.conversation.append(message.clone());
                self.analysis = Some(result.clone());
                info!(label = %result.label, confidence = result.confidence, "Analysis complete");
                UploadOutcome::Analyzed { result, message }
            }
            Err(e) => {
                warn!(error = %e, "Analysis failed");
                self.uploads.abort(pending);
                UploadOutcome::Failed(e)
            }
        }
    }

    /// Record the user's turn, ask the response service and record its
    /// reply. Service failures become an apology in the assistant's turn.
    pub async fn respond(&mut self, responder: &dyn ResponseService, user_text: &str) -> Message {
        self.conversation.append(Message::user(user_text));

        let prompt = build_prompt(user_text, self.analysis.as_ref());
        let reply = match responder.complete(SYSTEM_INSTRUCTION, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Response service failed");
                e.user_message()
            }
        };

        let message = Message::assistant(reply);
        self.conversation.append(message.clone());
        message
    }

    /// Ask for a structured report on the current analysis. Returns `None`
    /// without touching the conversation when nothing has been analyzed.
    pub async fn report(&mut self, responder: &dyn ResponseService) -> Option<Message> {
        let prompt = report_prompt(self.analysis.as_ref()?);

        let reply = match responder.complete(SYSTEM_INSTRUCTION, &prompt).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Report generation failed");
                e.user_message()
            }
        };

        let message = Message::assistant(reply);
        self.conversation.append(message.clone());
        Some(message)
    }
}

impl Default for SessionContext {
    fn default() -> Self {
        Self::new()
    }
}
