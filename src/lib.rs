//! `FinGuide` - retrieval-augmented financial advice over text and voice
//!
//! This library provides:
//! - A vector memory of past exchanges used to condition new replies
//! - Text and spoken advisory turns against a chat-completions model
//! - A streaming voice loop with decoupled capture and processing
//! - An HTTP API and chat session log
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                    Interfaces                       │
//! │      HTTP API   │   SSE voice stream   │   CLI      │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                    Advisor                          │
//! │  Retrieval  │  Prompt  │  Responder  │  Recording   │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │       Vector memory   │   STT / TTS backends        │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod memory;
pub mod prompt;
pub mod sessions;
pub mod voice;

pub use agent::{Advisor, ChatCompletionsResponder, Responder, TextAnswer};
pub use config::Config;
pub use daemon::Daemon;
pub use error::{Error, ErrorClass, Result};
pub use memory::{
    Embedder, InMemoryVectorStore, MemoryRecord, MemoryRecorder, MemorySource,
    RetrievalAugmenter, SqliteVectorStore, VectorStore,
};
pub use sessions::{ChatMessage, ChatSession, ChatStore};
