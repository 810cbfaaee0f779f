use anyhow::Result;
use std::path::Path;

pub fn run(root: &Path, port: u16) -> Result<()> {
    // Fail before binding if the project was never initialised.
    recipes_core::config::Config::load(root)?;

    let root = root.to_path_buf();
    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
        tokio::select! {
            result = recipes_server::serve_on(root, listener) => result,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutting down");
                Ok(())
            }
        }
    })
}
