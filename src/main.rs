use std::path::PathBuf;

use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use cmsbridge::config::{parse_arg, BridgeConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))?;
    fmt().with_env_filter(filter).init();

    let args: Vec<String> = std::env::args().collect();
    let config_path = parse_arg(&args, "--config")
        .map(PathBuf::from)
        .or_else(|| std::env::var("CMSBRIDGE_CONFIG").ok().map(PathBuf::from));
    let mut config = BridgeConfig::load(config_path.as_deref())?;
    config.apply_env();
    config.apply_args(&args);

    // Startup banner at info level so something always prints at default verbosity
    let rust_log = std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(
        target: "cmsbridge",
        "cmsbridge starting: RUST_LOG='{}', http_port={}, schema='{}', sites='{}', data={:?}, default_user='{}'",
        rust_log,
        config.http_port,
        config.schema_path.display(),
        config.sites_path.display(),
        config.data_path,
        config.default_user
    );

    cmsbridge::server::run(config).await
}
