//! Submission process: accepts tasks over HTTP and publishes them to the queue

use std::sync::Arc;
use task_relay::{Config, ProxyApp, run_with_shutdown};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine; real deployments set the environment directly
    let _ = dotenvy::dotenv();

    let config = Config::load()?;
    task_relay::logging::init(&config.log)?;

    let app = Arc::new(ProxyApp::new(config).await?);
    run_with_shutdown(app).await?;

    Ok(())
}
