use std::path::PathBuf;
use std::sync::Arc;

use recipes_core::classify::Classifier;
use recipes_core::config::{Config, WarnLevel};
use recipes_core::workflow::RecipeService;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub root: PathBuf,
    pub config: Arc<Config>,
    pub service: Arc<RecipeService>,
    pub classifier: Arc<Classifier>,
}

impl AppState {
    /// Load config from `root`, open the store and signing key.
    pub fn open(root: PathBuf) -> recipes_core::Result<Self> {
        let config = Config::load(&root)?;
        for warning in config.validate() {
            match warning.level {
                WarnLevel::Error => tracing::error!("config: {}", warning.message),
                WarnLevel::Warning => tracing::warn!("config: {}", warning.message),
            }
        }
        let service = RecipeService::open(&root, &config)?;
        Ok(Self::new(root, config, service))
    }

    pub fn new(root: PathBuf, config: Config, service: RecipeService) -> Self {
        let classifier = Classifier::from_config(&config.classify);
        Self {
            root,
            config: Arc::new(config),
            service: Arc::new(service),
            classifier: Arc::new(classifier),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn open_requires_config() {
        let dir = TempDir::new().unwrap();
        let err = AppState::open(dir.path().to_path_buf()).err().unwrap();
        assert!(matches!(err, recipes_core::RecipeError::NotInitialized));
    }

    #[test]
    fn open_loads_config_and_store() {
        let dir = TempDir::new().unwrap();
        Config::initial().save(dir.path()).unwrap();
        let state = AppState::open(dir.path().to_path_buf()).unwrap();
        assert_eq!(state.root, dir.path());
        assert!(state.config.server.admin_enabled);
        assert!(state.service.actions().unwrap().is_empty());
    }
}
