//! GitHub publishing: REST calls for issues and pull requests, git2 for
//! repository operations. Authentication is a personal access token; git
//! transport auth goes through the `x-access-token` userpass convention.

use std::path::Path;

use anyhow::{Context, Result};
use git2::{Cred, PushOptions, RemoteCallbacks, Repository, Signature};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

const GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "sitesmith";

static REPO_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https?://github\.com/([^/]+)/([^/\s]+?)(?:\.git)?/?$").expect("valid regex")
});

/// Extract the `owner/repo` slug from a GitHub HTTPS URL.
pub fn parse_repo_url(url: &str) -> Result<String> {
    let captures = REPO_URL_RE
        .captures(url.trim())
        .with_context(|| format!("Invalid GitHub repository URL: {}", url))?;
    Ok(format!("{}/{}", &captures[1], &captures[2]))
}

/// A GitHub repository (subset of fields we care about).
#[derive(Debug, Serialize, Deserialize)]
pub struct RepoInfo {
    pub full_name: String,
    pub html_url: String,
    pub clone_url: String,
    pub default_branch: String,
}

/// A created issue.
#[derive(Debug, Serialize, Deserialize)]
pub struct IssueInfo {
    pub number: i64,
    pub html_url: String,
}

/// A created pull request.
#[derive(Debug, Serialize, Deserialize)]
pub struct PullRequestInfo {
    pub number: i64,
    pub html_url: String,
}

#[derive(Debug, Serialize)]
struct CreateIssueBody<'a> {
    title: &'a str,
    body: &'a str,
}

#[derive(Debug, Serialize)]
struct CreatePullBody<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

/// Thin REST client for the repository endpoints the pipeline needs.
pub struct GitHubClient {
    client: reqwest::Client,
    token: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            token: token.into(),
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    pub async fn get_repository(&self, owner_repo: &str) -> Result<RepoInfo> {
        self.request(
            reqwest::Method::GET,
            format!("{}/repos/{}", GITHUB_API_URL, owner_repo),
        )
        .send()
        .await
        .context("Failed to send repository request to GitHub")?
        .error_for_status()
        .context("GitHub repository API returned error status")?
        .json()
        .await
        .context("Failed to parse repository response from GitHub")
    }

    pub async fn create_issue(
        &self,
        owner_repo: &str,
        title: &str,
        body: &str,
    ) -> Result<IssueInfo> {
        self.request(
            reqwest::Method::POST,
            format!("{}/repos/{}/issues", GITHUB_API_URL, owner_repo),
        )
        .json(&CreateIssueBody { title, body })
        .send()
        .await
        .context("Failed to send issue request to GitHub")?
        .error_for_status()
        .context("GitHub issue API returned error status")?
        .json()
        .await
        .context("Failed to parse issue response from GitHub")
    }

    pub async fn create_pull_request(
        &self,
        owner_repo: &str,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<PullRequestInfo> {
        self.request(
            reqwest::Method::POST,
            format!("{}/repos/{}/pulls", GITHUB_API_URL, owner_repo),
        )
        .json(&CreatePullBody {
            title,
            body,
            head,
            base,
        })
        .send()
        .await
        .context("Failed to send pull request to GitHub")?
        .error_for_status()
        .context("GitHub pull request API returned error status")?
        .json()
        .await
        .context("Failed to parse pull request response from GitHub")
    }
}

// ── Local git operations ──────────────────────────────────────────────

fn remote_callbacks(token: &str) -> RemoteCallbacks<'_> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |_url, _username, _allowed| {
        Cred::userpass_plaintext("x-access-token", token)
    });
    callbacks
}

/// Clone the repository into `dest` using token auth.
pub fn clone_repository(clone_url: &str, token: &str, dest: &Path) -> Result<Repository> {
    let mut fetch_options = git2::FetchOptions::new();
    fetch_options.remote_callbacks(remote_callbacks(token));

    git2::build::RepoBuilder::new()
        .fetch_options(fetch_options)
        .clone(clone_url, dest)
        .with_context(|| format!("Failed to clone {}", clone_url))
}

/// Create a branch at HEAD and check it out.
pub fn create_branch(repo: &Repository, name: &str) -> Result<()> {
    let head = repo
        .head()
        .context("Repository has no HEAD")?
        .peel_to_commit()
        .context("HEAD does not point at a commit")?;
    repo.branch(name, &head, false)
        .with_context(|| format!("Failed to create branch {}", name))?;
    repo.set_head(&format!("refs/heads/{}", name))
        .context("Failed to switch HEAD to the new branch")?;
    repo.checkout_head(None)
        .context("Failed to check out the new branch")?;
    Ok(())
}

/// Stage everything and commit. Handles the unborn-branch case so it also
/// works on a repository with no commits yet.
pub fn commit_all(repo: &Repository, message: &str) -> Result<String> {
    let mut index = repo.index().context("Failed to open the index")?;
    index
        .add_all(["*"].iter(), git2::IndexAddOption::DEFAULT, None)
        .context("Failed to stage changes")?;
    index.write().context("Failed to write the index")?;

    let tree_id = index.write_tree().context("Failed to write the tree")?;
    let tree = repo.find_tree(tree_id)?;
    let sig = Signature::now("sitesmith", "bot@sitesmith.dev")?;

    let parent = repo.head().ok().and_then(|head| head.peel_to_commit().ok());
    let commit_id = match parent {
        Some(parent) => repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[&parent])?,
        None => repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &[])?,
    };

    Ok(commit_id.to_string())
}

/// Push a branch to origin with token auth.
pub fn push_branch(repo: &Repository, branch: &str, token: &str) -> Result<()> {
    let mut remote = repo
        .find_remote("origin")
        .context("Repository has no origin remote")?;
    let mut options = PushOptions::new();
    options.remote_callbacks(remote_callbacks(token));
    let refspec = format!("refs/heads/{}:refs/heads/{}", branch, branch);
    remote
        .push(&[refspec.as_str()], Some(&mut options))
        .with_context(|| format!("Failed to push branch {}", branch))?;
    Ok(())
}
