//! End-to-end build pipeline.
//!
//! One run: parse the repo URL, open a tracking issue, generate the site
//! into a fresh sandbox, launch it through the heal loop, then clone the
//! repo, copy the sandbox snapshot in, and publish a pull request.
//!
//! The run is deliberately synchronous: each step feeds the next, and the
//! caller (API handler or CLI) wants the URLs when it returns. On failure
//! after the server started, the server is stopped and the sandbox closed;
//! on success the sandbox is left to expire through its own timeout so the
//! hosted URL stays reachable.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::Config;
use crate::generator::FileGenerator;
use crate::github::{self, GitHubClient, IssueInfo, PullRequestInfo, RepoInfo};
use crate::launch::{APP_ROOT, LaunchMode, Launcher};
use crate::llm::{CompletionBackend, CompletionClient};
use crate::planner::{self, FileSpec};
use crate::sandbox::{Sandbox, SandboxClient, snapshot};

const ISSUE_TITLE: &str = "Build MVP Website";

/// Input to one pipeline run.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub repo_url: String,
    pub description: String,
    pub public_access: bool,
}

/// Result of a successful pipeline run.
#[derive(Debug, Serialize)]
pub struct BuildOutcome {
    pub run_id: Uuid,
    pub issue_url: String,
    pub pr_url: String,
    pub website_url: String,
    pub branch: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: u64,
}

/// Branch naming: one branch per tracking issue.
pub fn branch_name(issue_number: i64) -> String {
    format!("feature/mvp-website-{}", issue_number)
}

pub fn issue_body(description: &str) -> String {
    format!(
        "# Build MVP Website\n\n\
         ## Description\n\
         {}\n\n\
         ## Requirements\n\
         - Create a simple Flask app\n\
         - Implement the website according to the description\n",
        description
    )
}

pub fn pr_title(issue_number: i64) -> String {
    format!("Fixes #{}: {}", issue_number, ISSUE_TITLE)
}

pub fn pr_body(issue_number: i64, description: &str, website_url: &str) -> String {
    format!(
        "# MVP Website Implementation\n\n\
         This pull request addresses issue #{}.\n\n\
         ## Changes Made\n\
         - Created basic Flask application structure\n\
         - Implemented website according to the description\n\n\
         ## Description\n\
         {}\n\n\
         ## Hosted Website\n\
         The website is hosted at: {}\n",
        issue_number, description, website_url
    )
}

/// Run the whole pipeline and return the published URLs.
pub async fn run_build(config: &Config, request: &BuildRequest) -> Result<BuildOutcome> {
    let run_id = Uuid::new_v4();
    let started_at = Utc::now();
    tracing::info!(%run_id, repo = %request.repo_url, "starting build");

    let owner_repo = github::parse_repo_url(&request.repo_url)?;
    let token = config.github_token()?.to_string();
    let gh = GitHubClient::new(token.clone());

    let repo_info = gh
        .get_repository(&owner_repo)
        .await
        .with_context(|| format!("Failed to look up repository {}", owner_repo))?;

    let issue = gh
        .create_issue(&owner_repo, ISSUE_TITLE, &issue_body(&request.description))
        .await
        .context("Failed to create tracking issue")?;
    tracing::info!(issue = issue.number, url = %issue.html_url, "created tracking issue");

    let branch = branch_name(issue.number);

    let backend = CompletionClient::new(&config.model, config.model_api_key()?.to_string())?;
    let sandbox =
        SandboxClient::create(&config.sandbox, config.sandbox_api_key()?.to_string()).await?;

    match build_in_sandbox(
        request, &gh, &backend, &sandbox, &owner_repo, &repo_info, &issue, &branch, &token,
    )
    .await
    {
        Ok((pr, website_url)) => {
            let elapsed_secs = (Utc::now() - started_at).num_seconds().max(0) as u64;
            tracing::info!(%run_id, pr = %pr.html_url, elapsed_secs, "build complete");
            Ok(BuildOutcome {
                run_id,
                issue_url: issue.html_url,
                pr_url: pr.html_url,
                website_url,
                branch,
                started_at,
                elapsed_secs,
            })
        }
        Err(e) => {
            tracing::error!(%run_id, error = %format!("{:#}", e), "build failed");
            sandbox.close().await;
            Err(e)
        }
    }
}

/// Everything that happens inside the sandbox's lifetime. Separated so the
/// caller can close the sandbox on any error without repeating cleanup at
/// each failure site.
#[allow(clippy::too_many_arguments)]
async fn build_in_sandbox(
    request: &BuildRequest,
    gh: &GitHubClient,
    backend: &dyn CompletionBackend,
    sandbox: &SandboxClient,
    owner_repo: &str,
    repo_info: &RepoInfo,
    issue: &IssueInfo,
    branch: &str,
    token: &str,
) -> Result<(PullRequestInfo, String)> {
    let specs = planner::plan_structure(backend, &request.description).await?;
    let mut generator = FileGenerator::new(backend, request.description.clone()).with_history();
    deploy_files(sandbox, &mut generator, &specs).await?;

    let launcher = Launcher::new(sandbox, &generator);
    let mode = LaunchMode::from_public_flag(request.public_access);
    let server = launcher.launch(mode).await.context("Failed to launch the generated site")?;

    if let Some(report) = launcher.collect_logs().await {
        tracing::debug!(%report, "sandbox diagnostics after launch");
    }

    match publish(gh, sandbox, owner_repo, repo_info, issue, branch, token, request).await {
        Ok(pr) => Ok((pr, server.url)),
        Err(e) => {
            server.stop(sandbox).await;
            Err(e)
        }
    }
}

/// Generate every manifest file and write it under `APP_ROOT`.
/// A file whose generation fails is skipped with a warning; the launch
/// heal loop can still regenerate what actually matters.
pub async fn deploy_files(
    sandbox: &dyn Sandbox,
    generator: &mut FileGenerator<'_>,
    specs: &[FileSpec],
) -> Result<()> {
    for spec in specs {
        let content = match generator.generate(spec).await {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!(file = %spec.path, error = %e, "skipping file whose generation failed");
                continue;
            }
        };

        if let Some(parent) = Path::new(&spec.path).parent().filter(|p| !p.as_os_str().is_empty()) {
            sandbox
                .exec(&format!("mkdir -p {}/{}", APP_ROOT, parent.display()))
                .await
                .with_context(|| format!("Failed to create directory for {}", spec.path))?;
        }

        sandbox
            .write_file(&format!("{}/{}", APP_ROOT, spec.path), &content)
            .await
            .with_context(|| format!("Failed to write {} to sandbox", spec.path))?;
        tracing::info!(file = %spec.path, "wrote file to sandbox");
    }
    Ok(())
}

/// Clone, branch, copy the snapshot in, commit, push, open the PR.
#[allow(clippy::too_many_arguments)]
async fn publish(
    gh: &GitHubClient,
    sandbox: &SandboxClient,
    owner_repo: &str,
    repo_info: &RepoInfo,
    issue: &IssueInfo,
    branch: &str,
    token: &str,
    request: &BuildRequest,
) -> Result<PullRequestInfo> {
    let workdir = tempfile::tempdir().context("Failed to create working directory")?;

    let repo = github::clone_repository(&repo_info.clone_url, token, workdir.path())?;
    github::create_branch(&repo, branch)?;

    snapshot::download_tree(sandbox, APP_ROOT, workdir.path())
        .await
        .context("Failed to download the sandbox snapshot")?;

    github::commit_all(&repo, &format!("Create MVP website for #{}", issue.number))?;
    github::push_branch(&repo, branch, token)?;

    let website_url = sandbox.host_url(crate::launch::SERVER_PORT);
    gh.create_pull_request(
        owner_repo,
        branch,
        &repo_info.default_branch,
        &pr_title(issue.number),
        &pr_body(issue.number, &request.description, &website_url),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_name_embeds_issue_number() {
        assert_eq!(branch_name(42), "feature/mvp-website-42");
    }

    #[test]
    fn test_issue_body_embeds_description() {
        let body = issue_body("A site to find rental listings");
        assert!(body.contains("A site to find rental listings"));
        assert!(body.contains("simple Flask app"));
    }

    #[test]
    fn test_pr_title_references_issue() {
        assert_eq!(pr_title(7), "Fixes #7: Build MVP Website");
    }

    #[test]
    fn test_pr_body_embeds_issue_description_and_url() {
        let body = pr_body(7, "A recipe site", "https://5000-sbx.sandbox.dev");
        assert!(body.contains("issue #7"));
        assert!(body.contains("A recipe site"));
        assert!(body.contains("https://5000-sbx.sandbox.dev"));
    }

    #[test]
    fn test_build_outcome_serializes_urls() {
        let outcome = BuildOutcome {
            run_id: Uuid::nil(),
            issue_url: "https://github.com/o/r/issues/1".to_string(),
            pr_url: "https://github.com/o/r/pull/2".to_string(),
            website_url: "https://5000-sbx.sandbox.dev".to_string(),
            branch: "feature/mvp-website-1".to_string(),
            started_at: Utc::now(),
            elapsed_secs: 90,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["pr_url"], "https://github.com/o/r/pull/2");
        assert_eq!(json["elapsed_secs"], 90);
        assert_eq!(json["branch"], "feature/mvp-website-1");
    }
}
