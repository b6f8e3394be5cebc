//! V2X safety stack binary.
//!
//! ```text
//! ITS_CONFIG=/etc/its/stack.conf ITS_LOG_LEVEL=debug its-runtime
//! ```

use anyhow::{Context, Result};
use its_runtime::{AppContext, ItsRuntime, StackConfig};
use its_telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let _telemetry =
        init_telemetry(TelemetryConfig::from_env()).context("initializing telemetry")?;

    let config = StackConfig::from_env().context("loading stack configuration")?;
    let ctx = AppContext::build(config)
        .await
        .context("building the V2X safety stack")?;

    let runtime = ItsRuntime::new(ctx);
    runtime.start();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl+C")?;
    info!("Ctrl+C received");

    runtime.shutdown().await;
    Ok(())
}
