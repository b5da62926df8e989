use anyhow::Result;
use callshield_core::session::CallSessionManager;
use callshield_core::telemetry::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let _log_guard = init_tracing();

    let manager = CallSessionManager::new()?;
    manager.run().await
}
