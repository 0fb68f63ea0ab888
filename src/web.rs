#![cfg(not(tarpaulin_include))]

use checksheet::app;
use checksheet::config::AppConfig;
use std::env;

/// Main entry point for the form web service
///
/// Settings come from the environment (see [`AppConfig::from_env`]); the
/// first two command-line arguments override the bind address and the
/// directory published templates are written to.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = env::args().collect();
    let config = AppConfig::from_env().with_args(&args);

    app::run(config).await
}
