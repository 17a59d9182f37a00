use derm_flow::{AnalysisState, ClassificationResult, Message, Session, UploadOutcome};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatRequest {
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub analysis_state: AnalysisState,
    pub analysis: Option<ClassificationResult>,
    pub message_count: usize,
    pub messages: Vec<Message>,
}

impl From<&Session> for SessionResponse {
    fn from(session: &Session) -> Self {
        let conversation = session.context.conversation();
        Self {
            session_id: session.id.clone(),
            created_at: session.created_at,
            analysis_state: session.context.analysis_state(),
            analysis: session.context.analysis().cloned(),
            message_count: conversation.len(),
            messages: conversation.all().to_vec(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub outcome: String,
    pub notice: String,
    pub analysis: Option<ClassificationResult>,
    pub message: Option<Message>,
    pub error: Option<String>,
    pub message_count: usize,
}

impl UploadResponse {
    /// `session` is the stored session after the upload was handled.
    pub fn new(session: &Session, outcome: &UploadOutcome) -> Self {
        let current = session.context.analysis().cloned();
        let (analysis, message, error) = match outcome {
            UploadOutcome::Analyzed { result, message } => {
                (Some(result.clone()), Some(message.clone()), None)
            }
            UploadOutcome::AlreadyAnalyzed => (current, None, None),
            UploadOutcome::ModelUnavailable(e) => (current, None, Some(e.to_string())),
            UploadOutcome::Failed(e) => (current, None, Some(e.to_string())),
        };
        Self {
            session_id: session.id.clone(),
            outcome: outcome.kind().to_string(),
            notice: outcome.notice(),
            analysis,
            message,
            error,
            message_count: session.context.conversation().len(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReplyResponse {
    pub session_id: String,
    pub reply: Message,
}
