//! Launch-and-heal loop.
//!
//! Installs the generated app's dependencies and starts its server inside
//! the sandbox. Any healable failure (a command that exited non-zero, or a
//! liveness probe that came back empty) feeds the error text to the model
//! to regenerate the implicated file, then retries, up to
//! `MAX_HEAL_ATTEMPTS` per step. The install step heals `requirements.txt`;
//! the start step heals `app.py`.
//!
//! Transport errors, sandbox API errors, and failures of the regeneration
//! call itself are not healable: retrying with an unchanged file cannot
//! succeed, so the loop aborts with the underlying error.

use crate::errors::LaunchError;
use crate::generator::FileGenerator;
use crate::sandbox::Sandbox;

/// Attempts per step before giving up.
pub const MAX_HEAL_ATTEMPTS: u32 = 3;

/// Directory the site is generated into.
pub const APP_ROOT: &str = "/home/user";

/// Port the generated Flask app binds.
pub const SERVER_PORT: u16 = 5000;

/// How the server process is started. The two modes are mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Production-style: gunicorn bound to all interfaces.
    Public,
    /// Flask development server with debug enabled.
    Dev,
}

impl LaunchMode {
    pub fn from_public_flag(public_access: bool) -> Self {
        if public_access {
            LaunchMode::Public
        } else {
            LaunchMode::Dev
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchMode::Public => "public",
            LaunchMode::Dev => "dev",
        }
    }

    fn start_command(&self) -> String {
        match self {
            LaunchMode::Public => format!(
                "cd {} && gunicorn --bind 0.0.0.0:{} --log-level debug app:app",
                APP_ROOT, SERVER_PORT
            ),
            LaunchMode::Dev => format!(
                "cd {} && FLASK_ENV=development python -c 'from app import app; \
                 app.run(host=\"0.0.0.0\", port={}, debug=True)'",
                APP_ROOT, SERVER_PORT
            ),
        }
    }

    fn probe_command(&self) -> &'static str {
        match self {
            LaunchMode::Public => "ps aux | grep gunicorn",
            LaunchMode::Dev => "ps aux | grep 'python -c'",
        }
    }

    /// Substring that must appear in the process list for the server to
    /// count as alive.
    fn probe_marker(&self) -> &'static str {
        match self {
            LaunchMode::Public => "app:app",
            LaunchMode::Dev => "app.run",
        }
    }
}

/// A server that passed its liveness probe.
#[derive(Debug)]
pub struct RunningServer {
    pub url: String,
    pub pid: Option<u32>,
    pub mode: LaunchMode,
}

impl RunningServer {
    /// Kill the server process. Best effort; the sandbox is ephemeral.
    pub async fn stop(&self, sandbox: &dyn Sandbox) {
        if let Some(pid) = self.pid {
            match sandbox.kill_process(pid).await {
                Ok(()) => tracing::info!(pid, "stopped site server"),
                Err(e) => tracing::warn!(pid, error = %e, "failed to stop site server"),
            }
        }
    }
}

pub struct Launcher<'a> {
    sandbox: &'a dyn Sandbox,
    generator: &'a FileGenerator<'a>,
}

impl<'a> Launcher<'a> {
    pub fn new(sandbox: &'a dyn Sandbox, generator: &'a FileGenerator<'a>) -> Self {
        Self { sandbox, generator }
    }

    /// Install dependencies, start the server, and return its public URL.
    pub async fn launch(&self, mode: LaunchMode) -> Result<RunningServer, LaunchError> {
        self.heal("install", "requirements.txt", || self.try_install())
            .await?;

        let pid = self
            .heal("start", "app.py", || self.try_start(mode))
            .await?;

        let url = self.sandbox.host_url(SERVER_PORT);
        tracing::info!(mode = mode.as_str(), %url, "site server running");
        Ok(RunningServer {
            url,
            pid: Some(pid),
            mode,
        })
    }

    async fn try_install(&self) -> Result<(), LaunchError> {
        self.sandbox
            .exec(&format!("cd {} && pip install -r requirements.txt", APP_ROOT))
            .await?;
        Ok(())
    }

    async fn try_start(&self, mode: LaunchMode) -> Result<u32, LaunchError> {
        if mode == LaunchMode::Public {
            self.sandbox.exec("pip install gunicorn").await?;
        }

        let pid = self.sandbox.exec_background(&mode.start_command()).await?;

        // Give the server a moment, then check it is actually alive.
        self.sandbox.exec("sleep 2").await?;
        let probe = self.sandbox.exec(mode.probe_command()).await?;
        if !probe.stdout.contains(mode.probe_marker()) {
            return Err(LaunchError::ServerNotRunning {
                marker: mode.probe_marker().to_string(),
            });
        }

        Ok(pid)
    }

    /// Run `attempt` up to `MAX_HEAL_ATTEMPTS` times, regenerating `file`
    /// with the error text between attempts.
    async fn heal<T, F, Fut>(
        &self,
        step: &str,
        file: &str,
        mut attempt: F,
    ) -> Result<T, LaunchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LaunchError>>,
    {
        let mut last_error = String::new();

        for round in 1..=MAX_HEAL_ATTEMPTS {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) if is_healable(&e) => {
                    last_error = e.to_string();
                    tracing::warn!(
                        step,
                        file,
                        attempt = round,
                        error = %last_error,
                        "step failed, regenerating"
                    );
                    if round < MAX_HEAL_ATTEMPTS {
                        self.regenerate(file, &last_error).await?;
                    }
                }
                Err(e) => return Err(e),
            }
        }

        Err(LaunchError::RetriesExhausted {
            step: step.to_string(),
            file: file.to_string(),
            attempts: MAX_HEAL_ATTEMPTS,
            last_error,
        })
    }

    async fn regenerate(&self, file: &str, error: &str) -> Result<(), LaunchError> {
        let path = format!("{}/{}", APP_ROOT, file);
        // Current content is context, not a requirement; the file may be
        // missing or unreadable.
        let current = self.sandbox.read_file(&path).await.unwrap_or_default();

        let fixed = self
            .generator
            .regenerate_with_error(file, error, &current)
            .await?;
        self.sandbox.write_file(&path, &fixed).await?;
        Ok(())
    }

    /// Best-effort diagnostics: app log plus the process list.
    pub async fn collect_logs(&self) -> Option<String> {
        let log = self
            .sandbox
            .exec(&format!(
                "cd {} && cat app.log 2>/dev/null || echo 'No logs found'",
                APP_ROOT
            ))
            .await
            .ok()?;
        let processes = self
            .sandbox
            .exec("ps aux")
            .await
            .map(|out| out.stdout)
            .unwrap_or_default();
        Some(format!(
            "server logs:\n{}\nprocesses:\n{}",
            log.stdout, processes
        ))
    }
}

fn is_healable(error: &LaunchError) -> bool {
    match error {
        LaunchError::Sandbox(e) => e.is_healable(),
        LaunchError::ServerNotRunning { .. } => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{LlmError, SandboxError};
    use crate::llm::{ChatMessage, CompletionBackend};
    use crate::sandbox::{DirEntry, ExecOutput};
    use async_trait::async_trait;
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    fn ok_output(stdout: &str) -> Result<ExecOutput, SandboxError> {
        Ok(ExecOutput {
            stdout: stdout.to_string(),
            stderr: String::new(),
        })
    }

    fn command_failed(stderr: &str) -> Result<ExecOutput, SandboxError> {
        Err(SandboxError::CommandFailed {
            command: "cmd".to_string(),
            exit_code: 1,
            stderr: stderr.to_string(),
        })
    }

    /// Sandbox whose exec results replay a fixed script.
    struct ScriptedSandbox {
        exec_results: Mutex<VecDeque<Result<ExecOutput, SandboxError>>>,
        bg_results: Mutex<VecDeque<Result<u32, SandboxError>>>,
        files: Mutex<HashMap<String, String>>,
        exec_log: Mutex<Vec<String>>,
    }

    impl ScriptedSandbox {
        fn new(
            exec_results: Vec<Result<ExecOutput, SandboxError>>,
            bg_results: Vec<Result<u32, SandboxError>>,
        ) -> Self {
            Self {
                exec_results: Mutex::new(exec_results.into()),
                bg_results: Mutex::new(bg_results.into()),
                files: Mutex::new(HashMap::new()),
                exec_log: Mutex::new(Vec::new()),
            }
        }

        fn executed(&self) -> Vec<String> {
            self.exec_log.lock().unwrap().clone()
        }

        fn file(&self, path: &str) -> Option<String> {
            self.files.lock().unwrap().get(path).cloned()
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        fn id(&self) -> &str {
            "scripted"
        }

        async fn exec(&self, command: &str) -> Result<ExecOutput, SandboxError> {
            self.exec_log.lock().unwrap().push(command.to_string());
            self.exec_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| ok_output(""))
        }

        async fn exec_background(&self, command: &str) -> Result<u32, SandboxError> {
            self.exec_log
                .lock()
                .unwrap()
                .push(format!("[bg] {}", command));
            self.bg_results.lock().unwrap().pop_front().unwrap_or(Ok(1))
        }

        async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError> {
            self.files
                .lock()
                .unwrap()
                .insert(path.to_string(), content.to_string());
            Ok(())
        }

        async fn read_file(&self, path: &str) -> Result<String, SandboxError> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| SandboxError::Api {
                    status: 404,
                    body: "not found".to_string(),
                })
        }

        async fn list_dir(&self, _path: &str) -> Result<Vec<DirEntry>, SandboxError> {
            Ok(Vec::new())
        }

        async fn kill_process(&self, _pid: u32) -> Result<(), SandboxError> {
            Ok(())
        }

        fn host_url(&self, port: u16) -> String {
            format!("https://{}-scripted.sandbox.dev", port)
        }
    }

    /// Completion backend that always returns the same repaired content.
    struct FixedBackend {
        response: Result<String, ()>,
        calls: Mutex<u32>,
    }

    impl FixedBackend {
        fn fixing(content: &str) -> Self {
            Self {
                response: Ok(content.to_string()),
                calls: Mutex::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: Err(()),
                calls: Mutex::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl CompletionBackend for FixedBackend {
        async fn complete(&self, _messages: &[ChatMessage]) -> Result<String, LlmError> {
            *self.calls.lock().unwrap() += 1;
            match &self.response {
                Ok(content) => Ok(content.clone()),
                Err(()) => Err(LlmError::RateLimited),
            }
        }
    }

    #[tokio::test]
    async fn test_launch_dev_happy_path() {
        // install ok; [bg] start; sleep ok; probe shows the dev marker
        let sandbox = ScriptedSandbox::new(
            vec![ok_output(""), ok_output(""), ok_output("user 42 python -c app.run(...)")],
            vec![Ok(42)],
        );
        let backend = FixedBackend::fixing("unused");
        let generator = FileGenerator::new(&backend, "a blog");
        let launcher = Launcher::new(&sandbox, &generator);

        let server = launcher.launch(LaunchMode::Dev).await.unwrap();
        assert_eq!(server.pid, Some(42));
        assert_eq!(server.mode, LaunchMode::Dev);
        assert_eq!(server.url, "https://5000-scripted.sandbox.dev");
        assert_eq!(backend.call_count(), 0);

        let log = sandbox.executed();
        assert!(log[0].contains("pip install -r requirements.txt"));
        assert!(log[1].starts_with("[bg] "));
        assert!(log[1].contains("app.run"));
        assert_eq!(log[2], "sleep 2");
        assert!(log[3].contains("ps aux"));
    }

    #[tokio::test]
    async fn test_launch_public_installs_gunicorn_and_probes_marker() {
        let sandbox = ScriptedSandbox::new(
            vec![
                ok_output(""), // pip install -r requirements.txt
                ok_output(""), // pip install gunicorn
                ok_output(""), // sleep 2
                ok_output("user 7 gunicorn ... app:app"),
            ],
            vec![Ok(7)],
        );
        let backend = FixedBackend::fixing("unused");
        let generator = FileGenerator::new(&backend, "a blog");
        let launcher = Launcher::new(&sandbox, &generator);

        let server = launcher.launch(LaunchMode::Public).await.unwrap();
        assert_eq!(server.mode, LaunchMode::Public);

        let log = sandbox.executed();
        assert!(log.iter().any(|c| c == "pip install gunicorn"));
        assert!(log.iter().any(|c| c.contains("gunicorn --bind 0.0.0.0:5000")));
    }

    #[tokio::test]
    async fn test_install_heals_requirements_and_recovers() {
        let sandbox = ScriptedSandbox::new(
            vec![
                command_failed("No matching distribution found for flask==99"),
                ok_output(""), // second install succeeds
                ok_output(""), // sleep
                ok_output("python -c app.run"),
            ],
            vec![Ok(1)],
        );
        let backend = FixedBackend::fixing("flask\n");
        let generator = FileGenerator::new(&backend, "a blog");
        let launcher = Launcher::new(&sandbox, &generator);

        let server = launcher.launch(LaunchMode::Dev).await.unwrap();
        assert!(server.pid.is_some());
        assert_eq!(backend.call_count(), 1);
        assert_eq!(
            sandbox.file("/home/user/requirements.txt").as_deref(),
            Some("flask\n")
        );
    }

    #[tokio::test]
    async fn test_install_exhausts_retry_budget() {
        let sandbox = ScriptedSandbox::new(
            vec![
                command_failed("err 1"),
                command_failed("err 2"),
                command_failed("err 3"),
            ],
            vec![],
        );
        let backend = FixedBackend::fixing("flask\n");
        let generator = FileGenerator::new(&backend, "a blog");
        let launcher = Launcher::new(&sandbox, &generator);

        let err = launcher.launch(LaunchMode::Dev).await.unwrap_err();
        match err {
            LaunchError::RetriesExhausted {
                step,
                file,
                attempts,
                last_error,
            } => {
                assert_eq!(step, "install");
                assert_eq!(file, "requirements.txt");
                assert_eq!(attempts, MAX_HEAL_ATTEMPTS);
                assert!(last_error.contains("err 3"));
            }
            other => panic!("Expected RetriesExhausted, got {:?}", other),
        }

        // Three attempts, two regenerations between them
        assert_eq!(backend.call_count(), 2);
        let installs = sandbox
            .executed()
            .iter()
            .filter(|c| c.contains("pip install -r"))
            .count();
        assert_eq!(installs, 3);
    }

    #[tokio::test]
    async fn test_probe_failure_heals_app_py() {
        let sandbox = ScriptedSandbox::new(
            vec![
                ok_output(""),                    // install
                ok_output(""),                    // sleep (attempt 1)
                ok_output("grep python -c"),      // probe: no app.run marker
                ok_output(""),                    // sleep (attempt 2)
                ok_output("python -c app.run(")   // probe: alive
            ],
            vec![Ok(10), Ok(11)],
        );
        let backend = FixedBackend::fixing("from flask import Flask\n");
        let generator = FileGenerator::new(&backend, "a blog");
        let launcher = Launcher::new(&sandbox, &generator);

        let server = launcher.launch(LaunchMode::Dev).await.unwrap();
        assert_eq!(server.pid, Some(11));
        assert_eq!(backend.call_count(), 1);
        assert_eq!(
            sandbox.file("/home/user/app.py").as_deref(),
            Some("from flask import Flask\n")
        );
    }

    #[tokio::test]
    async fn test_transport_error_aborts_without_healing() {
        let sandbox = ScriptedSandbox::new(
            vec![Err(SandboxError::Transport {
                reason: "connection reset".to_string(),
            })],
            vec![],
        );
        let backend = FixedBackend::fixing("unused");
        let generator = FileGenerator::new(&backend, "a blog");
        let launcher = Launcher::new(&sandbox, &generator);

        let err = launcher.launch(LaunchMode::Dev).await.unwrap_err();
        assert!(matches!(err, LaunchError::Sandbox(SandboxError::Transport { .. })));
        assert_eq!(backend.call_count(), 0);
    }

    #[tokio::test]
    async fn test_regeneration_failure_aborts_loop() {
        let sandbox = ScriptedSandbox::new(
            vec![command_failed("bad requirements")],
            vec![],
        );
        let backend = FixedBackend::failing();
        let generator = FileGenerator::new(&backend, "a blog");
        let launcher = Launcher::new(&sandbox, &generator);

        let err = launcher.launch(LaunchMode::Dev).await.unwrap_err();
        assert!(matches!(err, LaunchError::Llm(LlmError::RateLimited)));
    }

    #[tokio::test]
    async fn test_stop_kills_known_pid() {
        let sandbox = ScriptedSandbox::new(vec![], vec![]);
        let server = RunningServer {
            url: "https://x".to_string(),
            pid: Some(9),
            mode: LaunchMode::Dev,
        };
        // Succeeds silently; ScriptedSandbox kill always Ok
        server.stop(&sandbox).await;
    }

    #[test]
    fn test_mode_from_public_flag() {
        assert_eq!(LaunchMode::from_public_flag(true), LaunchMode::Public);
        assert_eq!(LaunchMode::from_public_flag(false), LaunchMode::Dev);
    }

    #[test]
    fn test_mode_commands_are_mutually_exclusive() {
        let public = LaunchMode::Public.start_command();
        let dev = LaunchMode::Dev.start_command();
        assert!(public.contains("gunicorn"));
        assert!(!public.contains("python -c"));
        assert!(dev.contains("python -c"));
        assert!(!dev.contains("gunicorn"));
    }

    #[tokio::test]
    async fn test_collect_logs_combines_log_and_processes() {
        let sandbox = ScriptedSandbox::new(
            vec![ok_output("No logs found"), ok_output("PID CMD\n1 init")],
            vec![],
        );
        let backend = FixedBackend::fixing("unused");
        let generator = FileGenerator::new(&backend, "a blog");
        let launcher = Launcher::new(&sandbox, &generator);

        let report = launcher.collect_logs().await.unwrap();
        assert!(report.contains("No logs found"));
        assert!(report.contains("1 init"));
    }
}
