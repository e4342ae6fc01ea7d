use clap::Parser;

use vacancy_ingest::cli::{self, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.verbose && !cli.runs_locally() {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = cli::dispatch(&cli).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
