//! Reply generation: the completion-backed responder and the turn orchestrator

mod advisor;
mod responder;

pub use advisor::{Advisor, TextAnswer};
pub use responder::{ChatCompletionsResponder, Responder};
