use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{DirEntry, ExecOutput, Sandbox};
use crate::config::SandboxSettings;
use crate::errors::SandboxError;
use crate::util::truncate_for_log;

#[derive(Debug, Serialize)]
struct CreateRequest {
    timeout_secs: u64,
}

#[derive(Debug, Deserialize)]
struct CreateResponse {
    sandbox_id: String,
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    command: &'a str,
    background: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ExecResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    exit_code: i32,
    #[serde(default)]
    pid: Option<u32>,
}

/// Map a foreground exec response to an outcome. Non-zero exits are the
/// signal the heal loop keys off, so they get the typed variant.
fn exec_outcome(command: &str, resp: ExecResponse) -> Result<ExecOutput, SandboxError> {
    if resp.exit_code != 0 {
        return Err(SandboxError::CommandFailed {
            command: command.to_string(),
            exit_code: resp.exit_code,
            stderr: if resp.stderr.is_empty() {
                resp.stdout
            } else {
                resp.stderr
            },
        });
    }
    Ok(ExecOutput {
        stdout: resp.stdout,
        stderr: resp.stderr,
    })
}

/// HTTP client for one remote sandbox instance.
pub struct SandboxClient {
    client: Client,
    base_url: String,
    api_key: String,
    sandbox_id: String,
    proxy_domain: String,
}

impl SandboxClient {
    /// Create a fresh sandbox and return a client bound to it.
    pub async fn create(settings: &SandboxSettings, api_key: String) -> Result<Self, SandboxError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(180))
            .build()
            .map_err(|e| SandboxError::Transport {
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        let base_url = settings.base_url.trim_end_matches('/').to_string();
        let resp: CreateResponse = send_json(
            client
                .post(format!("{}/sandboxes", base_url))
                .bearer_auth(&api_key)
                .json(&CreateRequest {
                    timeout_secs: settings.timeout_secs,
                }),
        )
        .await?;

        tracing::info!(sandbox_id = %resp.sandbox_id, "created sandbox");

        Ok(Self {
            client,
            base_url,
            api_key,
            sandbox_id: resp.sandbox_id,
            proxy_domain: settings.proxy_domain.clone(),
        })
    }

    /// Tear the sandbox down. Best effort; a failed close only logs.
    pub async fn close(&self) {
        let result = self
            .client
            .delete(self.url(""))
            .bearer_auth(&self.api_key)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(sandbox_id = %self.sandbox_id, "closed sandbox");
            }
            Ok(resp) => {
                tracing::warn!(sandbox_id = %self.sandbox_id, status = %resp.status(), "sandbox close rejected");
            }
            Err(e) => {
                tracing::warn!(sandbox_id = %self.sandbox_id, error = %e, "sandbox close failed");
            }
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("{}/sandboxes/{}{}", self.base_url, self.sandbox_id, suffix)
    }

    async fn run(&self, command: &str, background: bool) -> Result<ExecResponse, SandboxError> {
        send_json(
            self.client
                .post(self.url("/exec"))
                .bearer_auth(&self.api_key)
                .json(&ExecRequest {
                    command,
                    background,
                }),
        )
        .await
    }
}

/// Send a request and decode a JSON body, mapping failures onto
/// `SandboxError` variants.
async fn send_json<T: for<'de> Deserialize<'de>>(
    request: reqwest::RequestBuilder,
) -> Result<T, SandboxError> {
    let response = request.send().await.map_err(|e| SandboxError::Transport {
        reason: e.to_string(),
    })?;

    let status = response.status();
    let text = response.text().await.map_err(|e| SandboxError::Transport {
        reason: format!("Failed to read response body: {}", e),
    })?;

    if !status.is_success() {
        return Err(SandboxError::Api {
            status: status.as_u16(),
            body: truncate_for_log(&text, 512),
        });
    }

    serde_json::from_str(&text).map_err(|e| SandboxError::InvalidResponse {
        reason: format!("JSON parse error: {}. Raw: {}", e, truncate_for_log(&text, 512)),
    })
}

#[async_trait]
impl Sandbox for SandboxClient {
    fn id(&self) -> &str {
        &self.sandbox_id
    }

    async fn exec(&self, command: &str) -> Result<ExecOutput, SandboxError> {
        tracing::debug!(sandbox_id = %self.sandbox_id, command, "exec");
        let resp = self.run(command, false).await?;
        exec_outcome(command, resp)
    }

    async fn exec_background(&self, command: &str) -> Result<u32, SandboxError> {
        tracing::debug!(sandbox_id = %self.sandbox_id, command, "exec background");
        let resp = self.run(command, true).await?;
        resp.pid.ok_or_else(|| SandboxError::InvalidResponse {
            reason: "background exec returned no pid".to_string(),
        })
    }

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
        let response = self
            .client
            .put(self.url("/files"))
            .bearer_auth(&self.api_key)
            .query(&[("path", path)])
            .body(content.to_string())
            .send()
            .await
            .map_err(|e| SandboxError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::Api {
                status: status.as_u16(),
                body: truncate_for_log(&body, 512),
            });
        }
        Ok(())
    }

    async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
        let response = self
            .client
            .get(self.url("/files"))
            .bearer_auth(&self.api_key)
            .query(&[("path", path)])
            .send()
            .await
            .map_err(|e| SandboxError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| SandboxError::Transport {
            reason: format!("Failed to read response body: {}", e),
        })?;

        if !status.is_success() {
            return Err(SandboxError::Api {
                status: status.as_u16(),
                body: truncate_for_log(&text, 512),
            });
        }
        Ok(text)
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, SandboxError> {
        send_json(
            self.client
                .get(self.url("/entries"))
                .bearer_auth(&self.api_key)
                .query(&[("path", path)]),
        )
        .await
    }

    async fn kill_process(&self, pid: u32) -> Result<(), SandboxError> {
        let response = self
            .client
            .delete(self.url(&format!("/processes/{}", pid)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| SandboxError::Transport {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SandboxError::Api {
                status: status.as_u16(),
                body: truncate_for_log(&body, 512),
            });
        }
        Ok(())
    }

    fn host_url(&self, port: u16) -> String {
        format!("https://{}-{}.{}", port, self.sandbox_id, self.proxy_domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::EntryKind;

    #[test]
    fn test_exec_outcome_success() {
        let resp = ExecResponse {
            stdout: "ok".to_string(),
            stderr: String::new(),
            exit_code: 0,
            pid: None,
        };
        let out = exec_outcome("echo ok", resp).unwrap();
        assert_eq!(out.stdout, "ok");
    }

    #[test]
    fn test_exec_outcome_nonzero_exit_is_command_failed() {
        let resp = ExecResponse {
            stdout: String::new(),
            stderr: "pip: not found".to_string(),
            exit_code: 127,
            pid: None,
        };
        let err = exec_outcome("pip install -r requirements.txt", resp).unwrap_err();
        match err {
            SandboxError::CommandFailed {
                command,
                exit_code,
                stderr,
            } => {
                assert_eq!(command, "pip install -r requirements.txt");
                assert_eq!(exit_code, 127);
                assert_eq!(stderr, "pip: not found");
            }
            other => panic!("Expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_exec_outcome_falls_back_to_stdout_for_error_text() {
        // Some commands report the failure on stdout only
        let resp = ExecResponse {
            stdout: "Traceback (most recent call last): ...".to_string(),
            stderr: String::new(),
            exit_code: 1,
            pid: None,
        };
        let err = exec_outcome("python app.py", resp).unwrap_err();
        assert!(err.to_string().contains("Traceback"));
    }

    #[test]
    fn test_exec_response_deserialize_foreground() {
        let json = r#"{"stdout": "hi", "stderr": "", "exit_code": 0}"#;
        let resp: ExecResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.stdout, "hi");
        assert!(resp.pid.is_none());
    }

    #[test]
    fn test_exec_response_deserialize_background() {
        let json = r#"{"pid": 4242}"#;
        let resp: ExecResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.pid, Some(4242));
        assert_eq!(resp.exit_code, 0);
    }

    #[test]
    fn test_dir_entry_deserialize() {
        let json = r#"[
            {"name": "app.py", "path": "/home/user/app.py", "kind": "file"},
            {"name": "templates", "path": "/home/user/templates", "kind": "dir"}
        ]"#;
        let entries: Vec<DirEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, EntryKind::File);
        assert_eq!(entries[1].kind, EntryKind::Dir);
    }

    #[test]
    fn test_create_response_deserialize() {
        let json = r#"{"sandbox_id": "sbx-12ab34cd"}"#;
        let resp: CreateResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.sandbox_id, "sbx-12ab34cd");
    }

    fn offline_client() -> SandboxClient {
        SandboxClient {
            client: Client::new(),
            base_url: "https://api.sandbox.dev".to_string(),
            api_key: "key".to_string(),
            sandbox_id: "sbx-12ab34cd".to_string(),
            proxy_domain: "sandbox.dev".to_string(),
        }
    }

    #[test]
    fn test_host_url_format() {
        let client = offline_client();
        assert_eq!(
            client.host_url(5000),
            "https://5000-sbx-12ab34cd.sandbox.dev"
        );
    }

    #[test]
    fn test_url_builder() {
        let client = offline_client();
        assert_eq!(
            client.url("/exec"),
            "https://api.sandbox.dev/sandboxes/sbx-12ab34cd/exec"
        );
        assert_eq!(
            client.url(""),
            "https://api.sandbox.dev/sandboxes/sbx-12ab34cd"
        );
    }
}
