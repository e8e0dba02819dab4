#![cfg(not(tarpaulin_include))]

use secura::{Config, app};

/// Entry point for the check-in web server.
///
/// Settings come from `SECURA_*` environment variables, see [`Config::load`].
/// Log level is controlled with `RUST_LOG`.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load();
    app::run(config).await
}
