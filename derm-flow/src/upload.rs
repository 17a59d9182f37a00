//! Upload identity and the analysis state machine.
//!
//! ```text
//!  NoImage ──new fingerprint──▶ Analyzing ──success──▶ Analyzed
//!     ▲                            │                    │  ▲
//!     └──────────failure───────────┘                    │  │ same fingerprint
//!                                                       │  └─ (no-op)
//!  Analyzed ◀──failure── Analyzing ◀──new fingerprint───┘
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::classifier::ClassificationResult;
use crate::conversation::Message;
use crate::error::{InferenceError, ModelLoadError};

/// Lowercase hex SHA-256 of the uploaded bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(bytes: &[u8]) -> Self {
        let mut h = Sha256::new();
        h.update(bytes);
        Self(format!("{:x}", h.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisState {
    #[default]
    NoImage,
    Analyzing,
    Analyzed,
}

/// Tracks which upload was analyzed last.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UploadTracker {
    state: AnalysisState,
    fingerprint: Option<Fingerprint>,
}

/// An analysis that has started but not finished. Consumed by
/// [`UploadTracker::complete`] or [`UploadTracker::abort`].
#[derive(Debug)]
#[must_use]
pub struct PendingAnalysis {
    fingerprint: Fingerprint,
    previous: AnalysisState,
}

impl PendingAnalysis {
    pub fn fingerprint(&self) -> &Fingerprint {
        &self.fingerprint
    }
}

impl UploadTracker {
    pub fn state(&self) -> AnalysisState {
        self.state
    }

    /// Fingerprint of the last successfully analyzed upload.
    pub fn fingerprint(&self) -> Option<&Fingerprint> {
        self.fingerprint.as_ref()
    }

    /// Start analyzing `fingerprint`, or return `None` if it is the upload
    /// that was already analyzed.
    pub fn begin(&mut self, fingerprint: Fingerprint) -> Option<PendingAnalysis> {
        if self.state == AnalysisState::Analyzed && self.fingerprint.as_ref() == Some(&fingerprint)
        {
            return None;
        }

        let previous = match self.state {
            AnalysisState::Analyzing => {
                if self.fingerprint.is_some() {
                    AnalysisState::Analyzed
                } else {
                    AnalysisState::NoImage
                }
            }
            state => state,
        };
        self.state = AnalysisState::Analyzing;

        Some(PendingAnalysis {
            fingerprint,
            previous,
        })
    }

    pub fn complete(&mut self, pending: PendingAnalysis) {
        self.fingerprint = Some(pending.fingerprint);
        self.state = AnalysisState::Analyzed;
    }

    /// Roll back to the state before [`UploadTracker::begin`]; the stored
    /// fingerprint is untouched so the same bytes can be retried.
    pub fn abort(&mut self, pending: PendingAnalysis) {
        self.state = pending.previous;
    }
}

/// Result of handing an upload to a session.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadOutcome {
    /// New image classified; `message` was appended to the conversation.
    Analyzed {
        result: ClassificationResult,
        message: Message,
    },
    /// Same bytes as the last analyzed upload; nothing changed.
    AlreadyAnalyzed,
    /// The classifier could not be loaded at startup.
    ModelUnavailable(ModelLoadError),
    /// Decoding or inference failed; state is unchanged.
    Failed(InferenceError),
}

impl UploadOutcome {
    pub fn kind(&self) -> &'static str {
        match self {
            UploadOutcome::Analyzed { .. } => "analyzed",
            UploadOutcome::AlreadyAnalyzed => "already_analyzed",
            UploadOutcome::ModelUnavailable(_) => "model_unavailable",
            UploadOutcome::Failed(_) => "failed",
        }
    }

    /// User-facing status line.
    pub fn notice(&self) -> String {
        match self {
            UploadOutcome::Analyzed { .. } => "✅ Analiz tamamlandı!".to_string(),
            UploadOutcome::AlreadyAnalyzed => "Bu görüntü zaten analiz edildi. Sonuçları sohbet alanında görebilirsiniz.".to_string(),
            UploadOutcome::ModelUnavailable(e) => format!("❌ Model yüklenemedi: {}", e),
            UploadOutcome::Failed(e) => format!("❌ Analiz sırasında hata oluştu: {}", e),
        }
    }
}
