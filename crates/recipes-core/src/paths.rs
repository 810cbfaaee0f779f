use crate::error::{Result, RecipeError};
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

// ---------------------------------------------------------------------------
// Directory constants
// ---------------------------------------------------------------------------

pub const RECIPES_DIR: &str = ".recipes";
pub const CONFIG_FILE: &str = ".recipes/config.yaml";
pub const DATABASE_FILE: &str = ".recipes/recipes.redb";
pub const DEFAULT_KEY_FILE: &str = ".recipes/signing.key";

/// Read-only API prefix clients fetch recipes and implementations from.
pub const PUBLIC_API_ROOT: &str = "/api/v1";

// ---------------------------------------------------------------------------
// Path helpers
// ---------------------------------------------------------------------------

pub fn recipes_dir(root: &Path) -> PathBuf {
    root.join(RECIPES_DIR)
}

pub fn config_path(root: &Path) -> PathBuf {
    root.join(CONFIG_FILE)
}

pub fn database_path(root: &Path) -> PathBuf {
    root.join(DATABASE_FILE)
}

// ---------------------------------------------------------------------------
// Name validation
// ---------------------------------------------------------------------------

fn action_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[_\-\w]+$").expect("static regex"))
}

/// Action names appear in URLs, so they are restricted to word characters and dashes.
pub fn validate_action_name(name: &str) -> Result<()> {
    if action_name_re().is_match(name) {
        Ok(())
    } else {
        Err(RecipeError::validation(
            "name",
            format!("'{name}' must contain only letters, digits, '_' or '-'"),
        ))
    }
}
