use clap::Parser;
use runway::api::{Cli, run};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // stdout carries JSON output, so logs go to stderr.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::warn!(error = %e, "command failed");
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
