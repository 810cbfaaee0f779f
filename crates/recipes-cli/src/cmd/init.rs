use anyhow::Context;
use recipes_core::config::{Config, WarnLevel};
use recipes_core::workflow::RecipeService;
use recipes_core::{io, paths};
use std::path::Path;

use crate::output::print_json;

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let dir = paths::recipes_dir(root);
    io::ensure_dir(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

    let config_created = if paths::config_path(root).exists() {
        false
    } else {
        Config::initial()
            .save(root)
            .context("failed to write config.yaml")?;
        true
    };

    let config = Config::load(root)?;
    for warning in config.validate() {
        let level = match warning.level {
            WarnLevel::Error => "error",
            WarnLevel::Warning => "warning",
        };
        eprintln!("config {level}: {}", warning.message);
    }

    let key_existed = config.key_path(root).exists();
    let service = RecipeService::open(root, &config).context("failed to open recipe store")?;

    if json {
        return print_json(&serde_json::json!({
            "root": root,
            "config_created": config_created,
            "key_created": !key_existed,
            "public_key": service.public_key(),
        }));
    }

    println!("Initializing recipes in: {}", root.display());
    let status = |created: bool| if created { "created:" } else { "exists: " };
    println!("  {} {}", status(config_created), paths::CONFIG_FILE);
    println!("  {} {}", status(!key_existed), config.signing.key_file);
    println!("  ready:   {}", paths::DATABASE_FILE);
    println!("\npublic key: {}", service.public_key());
    Ok(())
}
