use clap::Parser;
use tracing_subscriber::EnvFilter;

use diffdrive_runtime::config::Cli;

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug). Logs go to stderr so the
    // raw-mode status lines on stdout stay readable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = diffdrive_runtime::runtime::run(cli).await {
        eprintln!("Runtime error: {}", e);
        std::process::exit(1);
    }
}
