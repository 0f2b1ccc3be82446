use tracing_subscriber::{fmt, EnvFilter};

use vaultgate::config::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    let config = GatewayConfig::from_env().apply_args(&args);

    vaultgate::server::run(config).await
}
