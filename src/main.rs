use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pushcast=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match cli::run() {
        cli::RunOutcome::Serve(config) => config,
        cli::RunOutcome::Exit(code) => std::process::exit(code),
    };

    if let Err(err) = pushcast::serve(config).await {
        tracing::error!(error = %err, "pushcast stopped");
        std::process::exit(1);
    }
}
