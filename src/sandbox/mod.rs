//! Remote ephemeral sandbox.
//!
//! The sandbox is a throwaway filesystem plus process runner reachable over
//! a command/file HTTP API. Generated sites are written here, launched here,
//! and snapshotted back out before the sandbox is discarded.
//!
//! `Sandbox` is the trait seam the deployer and launch loop use.
//! Real implementation: `SandboxClient`. Test doubles script command
//! results to drive the heal loop deterministically.

mod client;
pub mod snapshot;

pub use client::SandboxClient;

use async_trait::async_trait;
use serde::Deserialize;

use crate::errors::SandboxError;

/// Output of a foreground command that exited zero.
#[derive(Debug, Clone, Default)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Kind of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Dir,
}

/// One entry of a sandbox directory listing.
#[derive(Debug, Clone, Deserialize)]
pub struct DirEntry {
    pub name: String,
    pub path: String,
    pub kind: EntryKind,
}

/// Abstraction over the remote execution environment.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Sandbox identifier, for logging and URL construction.
    fn id(&self) -> &str;

    /// Run a foreground command. Non-zero exit becomes
    /// `SandboxError::CommandFailed`.
    async fn exec(&self, command: &str) -> Result<ExecOutput, SandboxError>;

    /// Start a background process and return its pid.
    async fn exec_background(&self, command: &str) -> Result<u32, SandboxError>;

    async fn write_file(&self, path: &str, content: &str) -> Result<(), SandboxError>;

    async fn read_file(&self, path: &str) -> Result<String, SandboxError>;

    async fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>, SandboxError>;

    async fn kill_process(&self, pid: u32) -> Result<(), SandboxError>;

    /// Public URL for a port exposed by the sandbox.
    fn host_url(&self, port: u16) -> String;
}
