use clap::Parser;
use envconfig::Envconfig;
use tokio_util::sync::CancellationToken;
use tracing::info;

use common_kafka::KafkaConfig;
use topic_relay::app;
use topic_relay::cli::Cli;

#[tokio::main]
async fn main() {
    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(tracing::Level::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e}");

        let mut causes = e.chain().skip(1).peekable();
        if causes.peek().is_some() {
            eprintln!("\nCaused by:");
            for (index, cause) in causes.enumerate() {
                eprintln!("    {index}: {cause}");
            }
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let kafka = KafkaConfig::init_from_env()?;
    let config = cli.into_run_config(kafka)?;

    let cancel = CancellationToken::new();
    app::cancel_on_signal(cancel.clone())?;

    app::run(&config, cancel.clone()).await?;
    cancel.cancel();

    info!("All done");
    Ok(())
}
