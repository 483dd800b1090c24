pub mod batch;
pub mod llm;
pub mod media;
pub mod prompt;
pub mod retry;
pub mod script;
pub mod setup;
pub mod workflow;
