//! Consumer process: executes queued tasks and records their results

use std::sync::Arc;
use task_relay::{Config, RequesterApp, run_with_shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    task_relay::logging::init(&config.log)?;

    let app = Arc::new(RequesterApp::new(config).await?);
    run_with_shutdown(app).await?;

    Ok(())
}
