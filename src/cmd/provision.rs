use std::path::Path;

use anyhow::Result;
use console::style;
use dialoguer::Confirm;

use sitesmith::provision::{ProvisionConfig, Provisioner};

pub async fn cmd_provision(yes: bool, allow_ips: Vec<String>) -> Result<()> {
    let config = ProvisionConfig {
        allowed_ips: allow_ips,
        ..ProvisionConfig::default()
    };

    if config.allowed_ips.is_empty() {
        println!(
            "{}",
            style("No --allow-ip given: the HTTP ports will accept no traffic.").yellow()
        );
    }

    println!(
        "Provisioning {} ({}) in {} with security group {}",
        config.instance_name, config.instance_type, config.region, config.security_group
    );

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt("Create/update AWS resources and deploy?")
            .default(false)
            .interact()?;
        if !confirmed {
            println!("Aborted.");
            return Ok(());
        }
    }

    let key_file = config.key_file();
    let ssh_user = config.ssh_user.clone();
    let provisioner = Provisioner::new(config);
    let outcome = provisioner.run(Path::new(".")).await?;

    println!("{}", style("Deployment complete").green().bold());
    println!("  Instance: {}", outcome.instance_id);
    println!("  DNS:      {}", outcome.public_dns);
    println!("  URL:      {}", outcome.url);
    println!(
        "  SSH:      ssh -i {} {}@{}",
        key_file.display(),
        ssh_user,
        outcome.public_dns
    );

    Ok(())
}
