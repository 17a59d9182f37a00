//! Skin-lesion classification and classification-aware chat sessions.
//!
//! The crate is organized leaf-first:
//! - [`classifier`]: ResNet-50 (ONNX) wrapper with fixed preprocessing;
//! - [`prompt`]: pure prompt templates that inject the classification;
//! - [`response`]: the text-generation service trait and its HTTP client;
//! - [`conversation`]: the append-only chat log;
//! - [`upload`]: upload fingerprints and the analysis state machine;
//! - [`context`]: per-session state and the operations on it;
//! - [`storage`] and [`runner`]: session persistence and the load → step →
//!   save helper used by the HTTP service.

pub mod classifier;
pub mod context;
pub mod conversation;
pub mod error;
pub mod labels;
pub mod prompt;
pub mod response;
pub mod runner;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use classifier::{
    ClassificationResult, ClassifierBackend, ImageClassifier, LoadedClassifier, OnnxBackend,
};
pub use context::SessionContext;
pub use conversation::{ConversationStore, Message, Role};
pub use error::{FlowError, InferenceError, ModelLoadError, ResponseError, Result};
pub use labels::{DERMNET_CLASSES, NUM_CLASSES};
pub use response::{ChatCompletionsClient, CompletionSettings, ResponseService};
pub use runner::SessionRunner;
pub use storage::{InMemorySessionStorage, Session, SessionStorage};
pub use upload::{AnalysisState, Fingerprint, UploadOutcome};
