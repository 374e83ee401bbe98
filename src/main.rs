use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use virtual_inverter::{Config, Supervisor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Driver start");

    // Placeholder or missing addresses stop us before anything is spawned
    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Configuration is not usable");
        e
    })?;

    Supervisor::new(config).run().await?;

    info!("Driver stop");
    Ok(())
}
