//! Runtime configuration for sitesmith.
//!
//! Values come from the environment (after `.env` loading in `main`) and may
//! be overridden by an optional `sitesmith.toml` in the working directory.
//! Secrets stay in the environment; the TOML file covers endpoints and knobs.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Settings for the chat-completions backend.
#[derive(Debug, Clone)]
pub struct ModelSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o".to_string(),
        }
    }
}

/// Settings for the remote sandbox API.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Domain used to build public `https://{port}-{id}.{domain}` URLs.
    pub proxy_domain: String,
    /// Sandbox lifetime requested at creation.
    pub timeout_secs: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.sandbox.dev".to_string(),
            proxy_domain: "sandbox.dev".to_string(),
            timeout_secs: 3600,
        }
    }
}

/// Settings for GitHub publishing.
#[derive(Debug, Clone, Default)]
pub struct GitHubSettings {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub model: ModelSettings,
    pub sandbox: SandboxSettings,
    pub github: GitHubSettings,
}

/// Raw TOML structure for `sitesmith.toml`.
#[derive(Debug, Default, Deserialize)]
struct ConfigToml {
    model: Option<ModelSection>,
    sandbox: Option<SandboxSection>,
}

#[derive(Debug, Deserialize)]
struct ModelSection {
    base_url: Option<String>,
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SandboxSection {
    base_url: Option<String>,
    proxy_domain: Option<String>,
    timeout_secs: Option<u64>,
}

impl Config {
    /// Load configuration from the process environment plus the optional
    /// `sitesmith.toml` in `dir`.
    pub fn load(dir: &Path) -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::from_sources(&env, dir)
    }

    /// Load from an explicit env map. Split out so tests don't have to
    /// mutate the process environment.
    pub fn from_sources(env: &HashMap<String, String>, dir: &Path) -> Result<Self> {
        let mut config = Self {
            model: ModelSettings {
                api_key: env.get("OPENAI_API_KEY").cloned(),
                ..ModelSettings::default()
            },
            sandbox: SandboxSettings {
                api_key: env.get("SANDBOX_API_KEY").cloned(),
                ..SandboxSettings::default()
            },
            github: GitHubSettings {
                token: env.get("GITHUB_TOKEN").cloned(),
            },
        };

        if let Some(url) = env.get("OPENAI_BASE_URL") {
            config.model.base_url = url.clone();
        }
        if let Some(model) = env.get("OPENAI_MODEL") {
            config.model.model = model.clone();
        }
        if let Some(url) = env.get("SANDBOX_BASE_URL") {
            config.sandbox.base_url = url.clone();
        }
        if let Some(domain) = env.get("SANDBOX_PROXY_DOMAIN") {
            config.sandbox.proxy_domain = domain.clone();
        }

        let toml_path = dir.join("sitesmith.toml");
        if toml_path.exists() {
            let content = std::fs::read_to_string(&toml_path)
                .with_context(|| format!("Failed to read {}", toml_path.display()))?;
            let overrides: ConfigToml = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", toml_path.display()))?;
            config.apply_toml(overrides);
        }

        Ok(config)
    }

    fn apply_toml(&mut self, overrides: ConfigToml) {
        if let Some(model) = overrides.model {
            if let Some(url) = model.base_url {
                self.model.base_url = url;
            }
            if let Some(name) = model.model {
                self.model.model = name;
            }
        }
        if let Some(sandbox) = overrides.sandbox {
            if let Some(url) = sandbox.base_url {
                self.sandbox.base_url = url;
            }
            if let Some(domain) = sandbox.proxy_domain {
                self.sandbox.proxy_domain = domain;
            }
            if let Some(secs) = sandbox.timeout_secs {
                self.sandbox.timeout_secs = secs;
            }
        }
    }

    /// GitHub token, required for publishing.
    pub fn github_token(&self) -> Result<&str> {
        self.github
            .token
            .as_deref()
            .context("GITHUB_TOKEN is not set")
    }

    /// Completion API key, required for generation.
    pub fn model_api_key(&self) -> Result<&str> {
        self.model
            .api_key
            .as_deref()
            .context("OPENAI_API_KEY is not set")
    }

    /// Sandbox API key, required for deployment.
    pub fn sandbox_api_key(&self) -> Result<&str> {
        self.sandbox
            .api_key
            .as_deref()
            .context("SANDBOX_API_KEY is not set")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn env_with(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_without_env_or_file() {
        let dir = tempdir().unwrap();
        let config = Config::from_sources(&HashMap::new(), dir.path()).unwrap();
        assert!(config.model.api_key.is_none());
        assert_eq!(config.model.base_url, "https://api.openai.com/v1");
        assert_eq!(config.model.model, "gpt-4o");
        assert_eq!(config.sandbox.timeout_secs, 3600);
        assert!(config.github.token.is_none());
    }

    #[test]
    fn test_env_values_are_picked_up() {
        let dir = tempdir().unwrap();
        let env = env_with(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("OPENAI_MODEL", "gpt-4o-mini"),
            ("GITHUB_TOKEN", "ghp_abc"),
            ("SANDBOX_BASE_URL", "https://sb.example.com"),
        ]);
        let config = Config::from_sources(&env, dir.path()).unwrap();
        assert_eq!(config.model.api_key.as_deref(), Some("sk-test"));
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.github.token.as_deref(), Some("ghp_abc"));
        assert_eq!(config.sandbox.base_url, "https://sb.example.com");
    }

    #[test]
    fn test_toml_overrides_env_defaults() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("sitesmith.toml"),
            r#"
[model]
base_url = "https://llm.internal/v1"

[sandbox]
proxy_domain = "boxes.internal"
timeout_secs = 900
"#,
        )
        .unwrap();

        let config = Config::from_sources(&HashMap::new(), dir.path()).unwrap();
        assert_eq!(config.model.base_url, "https://llm.internal/v1");
        assert_eq!(config.sandbox.proxy_domain, "boxes.internal");
        assert_eq!(config.sandbox.timeout_secs, 900);
        // Untouched values keep defaults
        assert_eq!(config.model.model, "gpt-4o");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("sitesmith.toml"), "not valid {{{{").unwrap();
        assert!(Config::from_sources(&HashMap::new(), dir.path()).is_err());
    }

    #[test]
    fn test_missing_secrets_error_lazily() {
        let dir = tempdir().unwrap();
        let config = Config::from_sources(&HashMap::new(), dir.path()).unwrap();
        assert!(config.github_token().is_err());
        assert!(config.model_api_key().is_err());
    }
}
