use anyhow::Result;
use clap::{Parser, Subcommand};

mod cmd;

#[derive(Parser)]
#[command(name = "sitesmith")]
#[command(version, about = "AI website builder - generate, heal, and publish Flask MVPs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the HTTP API server
    Serve {
        #[arg(short, long, default_value = "8000")]
        port: u16,

        /// Dev mode: bind all interfaces and allow cross-origin requests
        #[arg(long)]
        dev: bool,
    },
    /// Build one site from a description and open a pull request
    Build {
        /// GitHub repository URL the pull request targets
        repo_url: String,

        /// Natural-language description of the website
        description: String,

        /// Serve the generated site with gunicorn instead of the dev server
        #[arg(long)]
        public: bool,

        /// Open the hosted site in the browser when the build finishes
        #[arg(long)]
        open: bool,
    },
    /// Provision an EC2 instance and deploy this service to it
    Provision {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,

        /// CIDR allowed to reach the HTTP ports (repeatable)
        #[arg(long = "allow-ip", value_name = "CIDR")]
        allow_ips: Vec<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "sitesmith=debug,info"
    } else {
        "sitesmith=info,warn"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Serve { port, dev } => cmd::cmd_serve(port, dev).await,
        Commands::Build {
            repo_url,
            description,
            public,
            open,
        } => cmd::cmd_build(repo_url, description, public, open).await,
        Commands::Provision { yes, allow_ips } => cmd::cmd_provision(yes, allow_ips).await,
    }
}
