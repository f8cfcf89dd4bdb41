//! Operator entrypoint: tracing setup, client construction, controllers.

use kube::Client;
use tracing_subscriber::EnvFilter;

use nimbus_operator::controller_runner::build_controllers;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("starting nimbus operator");
    let client = Client::try_default().await?;

    let controllers = build_controllers(client);
    futures::future::join_all(controllers).await;

    tracing::info!("nimbus operator shut down");
    Ok(())
}
