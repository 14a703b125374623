use anyhow::{anyhow, Result};
use is_terminal::IsTerminal;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zonecrab::{Config, Service};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let mut first_args = std::env::args().take(2);
    let (program_name, config_file) = (
        first_args.next().unwrap_or("zonecrab".to_string()),
        first_args.next(),
    );

    let config = config_init(&program_name, config_file)?;
    let cancel = CancellationToken::new();
    let service = Service::bind(config, cancel.clone()).await?;
    let service_handle = tokio::spawn(service.run());

    tokio::spawn(async move {
        match signal::ctrl_c().await {
            Ok(()) => tracing::info!("quitting from signal"),
            Err(err) => tracing::error!("can't listen for shutdown signal: {err}"),
        }
        cancel.cancel();
    });

    service_handle.await??;
    tracing::info!("goodbye");
    Ok(())
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(std::io::stdout().is_terminal()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "zonecrab=info".into()),
        )
        .init();
}

fn config_init(program_name: &str, config_file: Option<String>) -> Result<Config> {
    match config_file {
        None => Err(anyhow!("usage: {program_name} /path/to/config.json")),
        Some(config_file) => {
            let config = Config::try_from_file(&config_file)?;
            tracing::debug!("loaded config from {config_file}");
            Ok(config)
        }
    }
}
