//! Content generator — one completion per manifest file.
//!
//! With history enabled, each generated file is appended to the running
//! conversation so later files can reference earlier ones (route names,
//! template ids, stylesheet classes). Regeneration always runs on a fresh
//! conversation: the error text and current content are the whole context.

use crate::errors::LlmError;
use crate::llm::{ChatMessage, CompletionBackend};
use crate::planner::FileSpec;
use crate::prompts;

pub struct FileGenerator<'a> {
    backend: &'a dyn CompletionBackend,
    description: String,
    history: Option<Vec<ChatMessage>>,
}

impl<'a> FileGenerator<'a> {
    pub fn new(backend: &'a dyn CompletionBackend, description: impl Into<String>) -> Self {
        Self {
            backend,
            description: description.into(),
            history: None,
        }
    }

    /// Carry the full conversation across files for cross-file consistency.
    pub fn with_history(mut self) -> Self {
        self.history = Some(Vec::new());
        self
    }

    /// Generate the content of one manifest file.
    pub async fn generate(&mut self, spec: &FileSpec) -> Result<String, LlmError> {
        let prompt = prompts::file_content_prompt(spec, &self.description);

        let mut messages = vec![ChatMessage::system(prompts::CODE_ONLY_SYSTEM_PROMPT)];
        if let Some(history) = &self.history {
            messages.extend(history.iter().cloned());
        }
        messages.push(ChatMessage::user(prompt.clone()));

        let content = self.backend.complete(&messages).await?;
        tracing::debug!(file = %spec.path, bytes = content.len(), "generated file content");

        if let Some(history) = &mut self.history {
            history.push(ChatMessage::user(prompt));
            history.push(ChatMessage::assistant(content.clone()));
        }

        Ok(content)
    }

    /// Regenerate a file that caused an error, feeding the error text back.
    pub async fn regenerate_with_error(
        &self,
        file_name: &str,
        error: &str,
        current_content: &str,
    ) -> Result<String, LlmError> {
        let messages = vec![
            ChatMessage::system(prompts::CODE_ONLY_SYSTEM_PROMPT),
            ChatMessage::user(prompts::regeneration_prompt(file_name, error, current_content)),
        ];
        let content = self.backend.complete(&messages).await?;
        tracing::info!(file = %file_name, "regenerated file with error context");
        Ok(content)
    }
}
