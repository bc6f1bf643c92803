//! EC2 provisioning — self-host the builder service.
//!
//! Drives the `aws`, `ssh`, and `scp` CLIs to stand up a single instance:
//! security group, key pair, instance, systemd unit, nginx reverse proxy,
//! then upload the release binary and config. Idempotent where the
//! underlying resources allow it: existing group/key/instance are reused.
//!
//! Requires `aws` configured with credentials and `ssh`/`scp` on PATH.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, bail};
use serde_json::{Value, json};
use tokio::process::Command;
use walkdir::WalkDir;

/// Ports opened to the allow-list (SSH stays open to the world for admin).
const RESTRICTED_PORTS: [u16; 3] = [80, 443, 8000];

const SSH_RETRIES: u32 = 10;
const SSH_RETRY_DELAY_SECS: u64 = 15;

#[derive(Debug, Clone)]
pub struct ProvisionConfig {
    pub region: String,
    pub instance_type: String,
    /// Ubuntu 22.04 LTS in us-east-1.
    pub ami: String,
    pub key_name: String,
    pub security_group: String,
    pub instance_name: String,
    /// CIDRs allowed to reach the HTTP/application ports.
    pub allowed_ips: Vec<String>,
    pub app_dir: String,
    pub service_name: String,
    pub ssh_user: String,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            instance_type: "t2.micro".to_string(),
            ami: "ami-0e86e20dae9224db8".to_string(),
            key_name: "sitesmith-key".to_string(),
            security_group: "sitesmith-sg".to_string(),
            instance_name: "sitesmith-server".to_string(),
            allowed_ips: Vec::new(),
            app_dir: "/home/ubuntu/sitesmith".to_string(),
            service_name: "sitesmith".to_string(),
            ssh_user: "ubuntu".to_string(),
        }
    }
}

impl ProvisionConfig {
    /// Where the key-pair PEM is stored locally.
    pub fn key_file(&self) -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".sitesmith")
            .join("keys")
            .join(format!("{}.pem", self.key_name))
    }
}

#[derive(Debug)]
pub struct ProvisionOutcome {
    pub instance_id: String,
    pub public_dns: String,
    pub public_ip: String,
    pub url: String,
}

/// Ingress rule set: SSH from anywhere, restricted ports from the allow-list.
fn ingress_permissions(allowed_ips: &[String]) -> Value {
    let mut permissions = vec![json!({
        "IpProtocol": "tcp",
        "FromPort": 22,
        "ToPort": 22,
        "IpRanges": [{"CidrIp": "0.0.0.0/0"}]
    })];
    for port in RESTRICTED_PORTS {
        permissions.push(json!({
            "IpProtocol": "tcp",
            "FromPort": port,
            "ToPort": port,
            "IpRanges": allowed_ips
                .iter()
                .map(|ip| json!({"CidrIp": ip}))
                .collect::<Vec<_>>()
        }));
    }
    Value::Array(permissions)
}

/// systemd unit for the service.
fn systemd_unit(config: &ProvisionConfig) -> String {
    format!(
        "[Unit]\n\
         Description=sitesmith website builder API\n\
         After=network.target\n\n\
         [Service]\n\
         User={user}\n\
         WorkingDirectory={dir}\n\
         ExecStart={dir}/sitesmith serve --port 8000\n\
         Restart=always\n\
         EnvironmentFile=-{dir}/.env\n\n\
         [Install]\n\
         WantedBy=multi-user.target\n",
        user = config.ssh_user,
        dir = config.app_dir,
    )
}

/// nginx reverse-proxy site: port 80 to the application port.
/// `$` is escaped so the heredoc writing this file does not expand it.
fn nginx_site(_config: &ProvisionConfig) -> String {
    "server {\n\
     \x20   listen 80;\n\
     \x20   server_name _;\n\n\
     \x20   location / {\n\
     \x20       proxy_pass http://localhost:8000;\n\
     \x20       proxy_set_header Host \\$host;\n\
     \x20       proxy_set_header X-Real-IP \\$remote_addr;\n\
     \x20       proxy_set_header X-Forwarded-For \\$proxy_add_x_forwarded_for;\n\
     \x20       proxy_set_header X-Forwarded-Proto \\$scheme;\n\
     \x20   }\n\
     }\n"
        .to_string()
}

/// Files to upload besides the binary: config and env files, skipping
/// build output and VCS internals.
fn collect_upload_files(project_dir: &Path) -> Vec<PathBuf> {
    let skip_dirs = [".git", "target", "__pycache__", "venv", "node_modules"];
    WalkDir::new(project_dir)
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            !(entry.file_type().is_dir() && skip_dirs.contains(&name.as_ref()))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name == ".env" || name.ends_with(".toml")
        })
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(project_dir)
                .ok()
                .map(|p| p.to_path_buf())
        })
        .collect()
}

pub struct Provisioner {
    config: ProvisionConfig,
}

impl Provisioner {
    pub fn new(config: ProvisionConfig) -> Self {
        Self { config }
    }

    /// Full flow: group, key, instance, SSH wait, setup, deploy.
    pub async fn run(&self, project_dir: &Path) -> Result<ProvisionOutcome> {
        let group_id = self.ensure_security_group().await?;
        tracing::info!(%group_id, "using security group");

        let key_file = self.ensure_key_pair().await?;
        tracing::info!(key_file = %key_file.display(), "using key pair");

        let outcome = self.ensure_instance(&group_id).await?;
        tracing::info!(instance = %outcome.instance_id, dns = %outcome.public_dns, "instance ready");

        self.wait_for_ssh(&outcome.public_dns).await?;
        self.setup_instance(&outcome.public_dns).await?;
        self.deploy_application(&outcome.public_dns, project_dir)
            .await?;

        Ok(outcome)
    }

    async fn aws(&self, args: &[&str]) -> Result<Value> {
        let output = Command::new("aws")
            .args(args)
            .args(["--region", &self.config.region, "--output", "json"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run the aws CLI (is it installed?)")?;

        if !output.status.success() {
            bail!(
                "aws {} failed: {}",
                args.first().copied().unwrap_or(""),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&stdout).context("Failed to parse aws CLI output as JSON")
    }

    async fn ensure_security_group(&self) -> Result<String> {
        let existing = self
            .aws(&[
                "ec2",
                "describe-security-groups",
                "--group-names",
                &self.config.security_group,
            ])
            .await;

        let permissions = ingress_permissions(&self.config.allowed_ips).to_string();

        match existing {
            Ok(described) => {
                let group = &described["SecurityGroups"][0];
                let group_id = group["GroupId"]
                    .as_str()
                    .context("describe-security-groups returned no GroupId")?
                    .to_string();

                // Replace the ingress rules so the allow-list stays current.
                let current = &group["IpPermissions"];
                if current.as_array().is_some_and(|rules| !rules.is_empty()) {
                    self.aws(&[
                        "ec2",
                        "revoke-security-group-ingress",
                        "--group-id",
                        &group_id,
                        "--ip-permissions",
                        &current.to_string(),
                    ])
                    .await
                    .context("Failed to revoke existing ingress rules")?;
                }
                self.aws(&[
                    "ec2",
                    "authorize-security-group-ingress",
                    "--group-id",
                    &group_id,
                    "--ip-permissions",
                    &permissions,
                ])
                .await
                .context("Failed to authorize ingress rules")?;

                Ok(group_id)
            }
            Err(e) if e.to_string().contains("InvalidGroup.NotFound") => {
                tracing::info!(group = %self.config.security_group, "creating security group");
                let created = self
                    .aws(&[
                        "ec2",
                        "create-security-group",
                        "--group-name",
                        &self.config.security_group,
                        "--description",
                        "Security group for the sitesmith API",
                    ])
                    .await?;
                let group_id = created["GroupId"]
                    .as_str()
                    .context("create-security-group returned no GroupId")?
                    .to_string();

                self.aws(&[
                    "ec2",
                    "authorize-security-group-ingress",
                    "--group-id",
                    &group_id,
                    "--ip-permissions",
                    &permissions,
                ])
                .await
                .context("Failed to authorize ingress rules")?;

                Ok(group_id)
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_key_pair(&self) -> Result<PathBuf> {
        let key_file = self.config.key_file();

        let existing = self
            .aws(&[
                "ec2",
                "describe-key-pairs",
                "--key-names",
                &self.config.key_name,
            ])
            .await;

        match existing {
            Ok(_) => {
                if !key_file.exists() {
                    tracing::warn!(
                        key_file = %key_file.display(),
                        "key pair exists in AWS but the local PEM is missing; SSH will fail"
                    );
                }
                Ok(key_file)
            }
            Err(e) if e.to_string().contains("InvalidKeyPair.NotFound") => {
                tracing::info!(key = %self.config.key_name, "creating key pair");
                let created = self
                    .aws(&["ec2", "create-key-pair", "--key-name", &self.config.key_name])
                    .await?;
                let material = created["KeyMaterial"]
                    .as_str()
                    .context("create-key-pair returned no KeyMaterial")?;

                if let Some(parent) = key_file.parent() {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                std::fs::write(&key_file, material)
                    .with_context(|| format!("Failed to write {}", key_file.display()))?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    std::fs::set_permissions(&key_file, std::fs::Permissions::from_mode(0o400))
                        .context("Failed to restrict key file permissions")?;
                }

                Ok(key_file)
            }
            Err(e) => Err(e),
        }
    }

    async fn ensure_instance(&self, group_id: &str) -> Result<ProvisionOutcome> {
        let name_filter = format!("Name=tag:Name,Values={}", self.config.instance_name);
        let described = self
            .aws(&[
                "ec2",
                "describe-instances",
                "--filters",
                &name_filter,
                "Name=instance-state-name,Values=running,pending",
            ])
            .await?;

        let existing = described["Reservations"]
            .as_array()
            .and_then(|rs| rs.first())
            .and_then(|r| r["Instances"].as_array())
            .and_then(|is| is.first())
            .and_then(|i| i["InstanceId"].as_str())
            .map(str::to_string);

        let instance_id = match existing {
            Some(id) => {
                tracing::info!(instance = %id, "found existing instance");
                id
            }
            None => {
                tracing::info!(name = %self.config.instance_name, "launching instance");
                let tag_spec = format!(
                    "ResourceType=instance,Tags=[{{Key=Name,Value={}}}]",
                    self.config.instance_name
                );
                let launched = self
                    .aws(&[
                        "ec2",
                        "run-instances",
                        "--image-id",
                        &self.config.ami,
                        "--instance-type",
                        &self.config.instance_type,
                        "--key-name",
                        &self.config.key_name,
                        "--security-group-ids",
                        group_id,
                        "--count",
                        "1",
                        "--tag-specifications",
                        &tag_spec,
                    ])
                    .await?;
                launched["Instances"][0]["InstanceId"]
                    .as_str()
                    .context("run-instances returned no InstanceId")?
                    .to_string()
            }
        };

        self.aws(&["ec2", "wait", "instance-running", "--instance-ids", &instance_id])
            .await
            .context("Instance did not reach the running state")?;

        let refreshed = self
            .aws(&["ec2", "describe-instances", "--instance-ids", &instance_id])
            .await?;
        let instance = &refreshed["Reservations"][0]["Instances"][0];
        let public_dns = instance["PublicDnsName"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let public_ip = instance["PublicIpAddress"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if public_dns.is_empty() {
            bail!("Instance {} has no public DNS name", instance_id);
        }

        Ok(ProvisionOutcome {
            instance_id,
            url: format!("http://{}", public_ip),
            public_dns,
            public_ip,
        })
    }

    async fn wait_for_ssh(&self, host: &str) -> Result<()> {
        for attempt in 1..=SSH_RETRIES {
            tracing::info!(attempt, total = SSH_RETRIES, "probing SSH");
            if self.ssh(host, "true").await.is_ok() {
                return Ok(());
            }
            if attempt < SSH_RETRIES {
                tokio::time::sleep(std::time::Duration::from_secs(SSH_RETRY_DELAY_SECS)).await;
            }
        }
        bail!("Could not reach {} over SSH after {} attempts", host, SSH_RETRIES)
    }

    async fn setup_instance(&self, host: &str) -> Result<()> {
        let unit = systemd_unit(&self.config);
        let site = nginx_site(&self.config);
        let service = &self.config.service_name;

        let commands = vec![
            "sudo apt-get update".to_string(),
            "sudo apt-get install -y nginx".to_string(),
            format!("mkdir -p {}", self.config.app_dir),
            format!(
                "sudo bash -c 'cat > /etc/systemd/system/{}.service << \"EOF\"\n{}EOF'",
                service, unit
            ),
            format!(
                "sudo bash -c 'cat > /etc/nginx/sites-available/{} << EOF\n{}EOF'",
                service, site
            ),
            format!(
                "sudo ln -sf /etc/nginx/sites-available/{} /etc/nginx/sites-enabled/",
                service
            ),
            "sudo rm -f /etc/nginx/sites-enabled/default".to_string(),
            "sudo nginx -t".to_string(),
            "sudo systemctl restart nginx".to_string(),
            "sudo systemctl daemon-reload".to_string(),
            format!("sudo systemctl enable {}", service),
        ];

        for command in &commands {
            tracing::debug!(command = %command, "setup");
            self.ssh(host, command)
                .await
                .with_context(|| format!("Setup command failed: {}", command))?;
        }
        Ok(())
    }

    async fn deploy_application(&self, host: &str, project_dir: &Path) -> Result<()> {
        // Upload the release binary first; without it there is no service.
        let binary = project_dir.join("target/release/sitesmith");
        if !binary.exists() {
            bail!(
                "Release binary not found at {}, run `cargo build --release` first",
                binary.display()
            );
        }
        let remote_binary = format!("{}/sitesmith", self.config.app_dir);
        self.scp(host, &binary, &remote_binary).await?;
        self.ssh(host, &format!("chmod +x {}", remote_binary)).await?;

        for relative in collect_upload_files(project_dir) {
            let remote = format!("{}/{}", self.config.app_dir, relative.display());
            if let Some(parent) = Path::new(&remote).parent() {
                self.ssh(host, &format!("mkdir -p {}", parent.display()))
                    .await?;
            }
            tracing::info!(file = %relative.display(), "uploading");
            self.scp(host, &project_dir.join(&relative), &remote).await?;
        }

        // Restart; report failures but keep going so status still prints.
        let service = &self.config.service_name;
        let commands = vec![
            format!("sudo systemctl reset-failed {} || true", service),
            format!("sudo systemctl restart {}", service),
            "sleep 3".to_string(),
            format!("sudo systemctl status {} --no-pager", service),
        ];
        for command in &commands {
            match self.ssh(host, command).await {
                Ok(output) => {
                    if !output.trim().is_empty() {
                        tracing::debug!(command = %command, output = %crate::util::truncate_for_log(&output, 500), "deploy");
                    }
                }
                Err(e) => {
                    tracing::warn!(command = %command, error = %e, "deploy command failed, continuing");
                }
            }
        }
        Ok(())
    }

    async fn ssh(&self, host: &str, command: &str) -> Result<String> {
        let key_file = self.config.key_file();
        let output = Command::new("ssh")
            .arg("-i")
            .arg(&key_file)
            .args(["-o", "StrictHostKeyChecking=accept-new", "-o", "ConnectTimeout=10"])
            .arg(format!("{}@{}", self.config.ssh_user, host))
            .arg(command)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run ssh")?;

        if !output.status.success() {
            bail!(
                "ssh command failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn scp(&self, host: &str, local: &Path, remote: &str) -> Result<()> {
        let key_file = self.config.key_file();
        let status = Command::new("scp")
            .arg("-i")
            .arg(&key_file)
            .args(["-o", "StrictHostKeyChecking=accept-new"])
            .arg(local)
            .arg(format!("{}@{}:{}", self.config.ssh_user, host, remote))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .status()
            .await
            .context("Failed to run scp")?;

        if !status.success() {
            bail!("scp failed for {}", local.display());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_values() {
        let config = ProvisionConfig::default();
        assert_eq!(config.instance_type, "t2.micro");
        assert_eq!(config.service_name, "sitesmith");
        assert_eq!(config.ssh_user, "ubuntu");
        assert!(config.key_file().to_string_lossy().ends_with("sitesmith-key.pem"));
    }

    #[test]
    fn test_ingress_permissions_ssh_open_to_world() {
        let permissions = ingress_permissions(&["10.0.0.1/32".to_string()]);
        let rules = permissions.as_array().unwrap();
        assert_eq!(rules.len(), 1 + RESTRICTED_PORTS.len());
        assert_eq!(rules[0]["FromPort"], 22);
        assert_eq!(rules[0]["IpRanges"][0]["CidrIp"], "0.0.0.0/0");
    }

    #[test]
    fn test_ingress_permissions_restricted_ports_use_allow_list() {
        let ips = vec!["10.0.0.1/32".to_string(), "192.168.1.0/24".to_string()];
        let permissions = ingress_permissions(&ips);
        let rules = permissions.as_array().unwrap();
        for rule in &rules[1..] {
            let ranges = rule["IpRanges"].as_array().unwrap();
            assert_eq!(ranges.len(), 2);
            assert_eq!(ranges[0]["CidrIp"], "10.0.0.1/32");
        }
        let ports: Vec<u64> = rules[1..]
            .iter()
            .map(|r| r["FromPort"].as_u64().unwrap())
            .collect();
        assert_eq!(ports, vec![80, 443, 8000]);
    }

    #[test]
    fn test_systemd_unit_contents() {
        let unit = systemd_unit(&ProvisionConfig::default());
        assert!(unit.contains("ExecStart=/home/ubuntu/sitesmith/sitesmith serve --port 8000"));
        assert!(unit.contains("User=ubuntu"));
        assert!(unit.contains("Restart=always"));
        assert!(unit.contains("WantedBy=multi-user.target"));
    }

    #[test]
    fn test_nginx_site_proxies_to_app_port() {
        let site = nginx_site(&ProvisionConfig::default());
        assert!(site.contains("listen 80;"));
        assert!(site.contains("proxy_pass http://localhost:8000;"));
        assert!(site.contains("X-Forwarded-For"));
    }

    #[test]
    fn test_collect_upload_files_picks_config_and_env() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("sitesmith.toml"), "").unwrap();
        std::fs::write(dir.path().join(".env"), "").unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();
        std::fs::create_dir_all(dir.path().join("target/release")).unwrap();
        std::fs::write(dir.path().join("target/release/some.toml"), "").unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/config.toml"), "").unwrap();

        let mut files = collect_upload_files(dir.path());
        files.sort();
        assert_eq!(
            files,
            vec![PathBuf::from(".env"), PathBuf::from("sitesmith.toml")]
        );
    }

    #[test]
    fn test_collect_upload_files_recurses_into_allowed_dirs() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("config")).unwrap();
        std::fs::write(dir.path().join("config/extra.toml"), "").unwrap();

        let files = collect_upload_files(dir.path());
        assert_eq!(files, vec![PathBuf::from("config/extra.toml")]);
    }
}
