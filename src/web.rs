#![cfg(not(tarpaulin_include))]

use clap::Parser;
use perftrack::app;
use perftrack::config::Config;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "perftrack-web")]
#[command(about = "Web front end for the performance tracker")]
struct Cli {
    /// Path to the TOML config file
    #[arg(short, long, env = "PERFTRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the workbook tabs
    #[arg(short, long, env = "PERFTRACK_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:3000
    #[arg(short, long, env = "PERFTRACK_BIND")]
    bind: Option<String>,
}

/// Main entry point for the web application
///
/// Loads the config file, applies command line and environment overrides and
/// serves the tracker until the process is stopped.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = dir;
    }
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    app::run(config).await
}
