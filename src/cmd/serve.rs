use std::path::Path;

use anyhow::Result;

use sitesmith::config::Config;
use sitesmith::server::{ServerConfig, start_server};

pub async fn cmd_serve(port: u16, dev: bool) -> Result<()> {
    let config = Config::load(Path::new("."))?;
    start_server(
        ServerConfig {
            port,
            dev_mode: dev,
        },
        config,
    )
    .await
}
