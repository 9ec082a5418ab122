use finevol::Daemon;
use tracing::info;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    if let Ok(env_filter) = tracing_subscriber::EnvFilter::try_from_default_env() {
        tracing_subscriber::fmt()
            .compact()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("info")
            .compact()
            .init();
    }

    info!("Starting finevol {}", env!("CARGO_PKG_VERSION"));

    let (mut daemon, _monitor) = Daemon::bootstrap().await?;
    daemon.enable()?;
    daemon.run().await
}
