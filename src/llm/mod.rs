//! Chat-completions backend.
//!
//! `CompletionBackend` is the seam the planner, generator, and heal loop
//! talk through. Real implementation: `CompletionClient` (OpenAI-compatible
//! Chat Completions over HTTP). Tests substitute scripted mocks.

mod client;

pub use client::{ChatMessage, CompletionBackend, CompletionClient, Role};
