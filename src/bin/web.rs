#![cfg(not(tarpaulin_include))]

use std::env;

use vocab_editor::{EditorConfig, app};

/// Main entry point for the web editor
///
/// Settings come from the `EDITOR_*` environment variables; an optional
/// first argument overrides the bind address.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut config = EditorConfig::from_env()?;
    if let Some(bind) = env::args().nth(1) {
        config.bind_addr = bind;
    }

    app::run(config).await
}
