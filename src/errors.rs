//! Typed error hierarchy for the sitesmith pipeline.
//!
//! Three top-level enums cover the three subsystems:
//! - `LlmError` — completion API failures
//! - `SandboxError` — remote sandbox transport and command failures
//! - `LaunchError` — launch-and-heal loop failures

use thiserror::Error;

/// Errors from the chat-completions backend.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Completion request failed: {reason}")]
    RequestFailed { reason: String },

    #[error("Completion API rejected the credentials")]
    AuthFailed,

    #[error("Completion API rate limited the request")]
    RateLimited,

    #[error("Unexpected completion response: {reason}")]
    InvalidResponse { reason: String },
}

/// Errors from the remote sandbox API.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox request failed: {reason}")]
    Transport { reason: String },

    #[error("Sandbox API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Command `{command}` exited with code {exit_code}: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Unexpected sandbox response: {reason}")]
    InvalidResponse { reason: String },
}

impl SandboxError {
    /// True for failures the heal loop can act on by regenerating a file.
    /// Transport and API errors are environmental, not code problems.
    pub fn is_healable(&self) -> bool {
        matches!(self, SandboxError::CommandFailed { .. })
    }
}

/// Errors from the launch-and-heal loop.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("Step `{step}` still failing after {attempts} regenerations of {file}: {last_error}")]
    RetriesExhausted {
        step: String,
        file: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Server process matching `{marker}` not found in process list")]
    ServerNotRunning { marker: String },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn llm_error_request_failed_carries_reason() {
        let err = LlmError::RequestFailed {
            reason: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn llm_error_auth_failed_is_matchable() {
        let err = LlmError::AuthFailed;
        assert!(matches!(err, LlmError::AuthFailed));
    }

    #[test]
    fn sandbox_command_failed_is_healable() {
        let err = SandboxError::CommandFailed {
            command: "pip install -r requirements.txt".to_string(),
            exit_code: 1,
            stderr: "No matching distribution found".to_string(),
        };
        assert!(err.is_healable());
        assert!(err.to_string().contains("No matching distribution"));
    }

    #[test]
    fn sandbox_transport_error_is_not_healable() {
        let err = SandboxError::Transport {
            reason: "dns failure".to_string(),
        };
        assert!(!err.is_healable());
    }

    #[test]
    fn sandbox_api_error_is_not_healable() {
        let err = SandboxError::Api {
            status: 503,
            body: "maintenance".to_string(),
        };
        assert!(!err.is_healable());
        assert!(err.to_string().contains("503"));
    }

    #[test]
    fn launch_retries_exhausted_carries_file_and_attempts() {
        let err = LaunchError::RetriesExhausted {
            step: "install".to_string(),
            file: "requirements.txt".to_string(),
            attempts: 3,
            last_error: "boom".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("requirements.txt"));
        assert!(msg.contains('3'));
    }

    #[test]
    fn launch_error_converts_from_sandbox_error() {
        let inner = SandboxError::Transport {
            reason: "timeout".to_string(),
        };
        let err: LaunchError = inner.into();
        assert!(matches!(err, LaunchError::Sandbox(_)));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&LlmError::RateLimited);
        assert_std_error(&SandboxError::Transport {
            reason: "x".into(),
        });
        assert_std_error(&LaunchError::ServerNotRunning {
            marker: "app:app".into(),
        });
    }
}
