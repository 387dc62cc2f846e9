use clap::Parser;
use tracing_subscriber::EnvFilter;

use gilebrowser::config::{Cli, Config};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match Config::from_cli(cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = gilebrowser::server::run(config).await {
        eprintln!("server error: {e:#}");
        std::process::exit(1);
    }
}
