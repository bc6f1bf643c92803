use std::path::Path;

use anyhow::Result;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};

use sitesmith::config::Config;
use sitesmith::pipeline::{self, BuildRequest};

pub async fn cmd_build(
    repo_url: String,
    description: String,
    public: bool,
    open_site: bool,
) -> Result<()> {
    let config = Config::load(Path::new("."))?;
    let request = BuildRequest {
        repo_url,
        description,
        public_access: public,
    };

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner} {msg}")
            .expect("progress bar template is a valid static string"),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(100));
    spinner.set_message("Building site (plan, generate, launch, publish)...");

    let result = pipeline::run_build(&config, &request).await;
    spinner.finish_and_clear();

    let outcome = result?;
    println!("{}", style("Build complete").green().bold());
    println!("  Issue:   {}", outcome.issue_url);
    println!("  PR:      {}", outcome.pr_url);
    println!("  Website: {}", outcome.website_url);
    println!(
        "  Branch {} pushed in {}s",
        style(&outcome.branch).cyan(),
        outcome.elapsed_secs
    );

    if open_site && let Err(e) = open::that(&outcome.website_url) {
        tracing::warn!(error = %e, "could not open the browser");
    }

    Ok(())
}
