mod cli;

use anyhow::Context;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match cli::run() {
        cli::RunOutcome::Serve(config) => wxnotify::serve(config)
            .await
            .context("wxnotify stopped with an error"),
        cli::RunOutcome::Exit(code) => std::process::exit(code),
    }
}
