pub mod action;
pub mod approval;
pub mod init;
pub mod recipe;
pub mod serve;
pub mod sign;

use anyhow::Context;
use recipes_core::config::Config;
use recipes_core::workflow::RecipeService;
use std::path::Path;

/// Load the project config and open its store and signing key.
pub fn open_service(root: &Path) -> anyhow::Result<RecipeService> {
    let config = Config::load(root)?;
    RecipeService::open(root, &config)
        .with_context(|| format!("failed to open recipe store in {}", root.display()))
}

/// Parse a JSON object given on the command line.
pub fn parse_json_arg(flag: &str, value: &str) -> anyhow::Result<serde_json::Value> {
    serde_json::from_str(value).with_context(|| format!("--{flag} must be valid JSON"))
}
