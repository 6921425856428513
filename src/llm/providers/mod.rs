//! LLM Providers Module
//!
//! Backends for [`ChatCompletionClient`](crate::llm::ChatCompletionClient),
//! one subdirectory per provider:
//! - client.rs: Provider-specific client implementation
//! - config.rs: Provider-specific configuration
//! - types.rs: Provider-specific request/response types
//! - mod.rs: Module exports

pub mod openai;

pub use openai::OpenAIClient;
