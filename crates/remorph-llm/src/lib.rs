//! Multi-provider LLM client for the Remorph refactoring engine.
//!
//! Provides the `ProviderClient` trait, the boxed `DynProvider` wrapper, and
//! clients for Ollama, OpenAI, and Anthropic. Providers are selected with a
//! `remorph_types::ProviderConfig` via `DynProvider::from_config` /
//! `DynProvider::connect`.

mod anthropic;
mod client;
mod ollama;
mod openai;

pub use anthropic::AnthropicClient;
pub use client::*;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;
