use crate::error::{RecipeError, Result};
use crate::paths;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// When false every write endpoint answers 403.
    #[serde(default = "default_true")]
    pub admin_enabled: bool,
    /// Bearer token → user name. The user name is recorded as creator/approver.
    #[serde(default)]
    pub admin_tokens: BTreeMap<String, String>,
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            admin_enabled: true,
            admin_tokens: BTreeMap::new(),
        }
    }
}

impl ServerConfig {
    pub fn user_for_token(&self, token: &str) -> Option<&str> {
        self.admin_tokens.get(token).map(String::as_str)
    }
}

// ---------------------------------------------------------------------------
// ApprovalConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalConfig {
    /// Reject approvals/rejections made by the request's own creator.
    #[serde(default = "default_true")]
    pub peer_approval_enforced: bool,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            peer_approval_enforced: true,
        }
    }
}

// ---------------------------------------------------------------------------
// SigningConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SigningConfig {
    #[serde(default = "default_key_file")]
    pub key_file: String,
    /// Sign eligible-but-unsigned items before answering a `signed` listing.
    #[serde(default = "default_true")]
    pub resign_on_fetch: bool,
}

fn default_key_file() -> String {
    paths::DEFAULT_KEY_FILE.to_string()
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            key_file: default_key_file(),
            resign_on_fetch: true,
        }
    }
}

// ---------------------------------------------------------------------------
// CacheConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_api_max_age")]
    pub api_max_age: u64,
    #[serde(default = "default_immutable_max_age")]
    pub immutable_max_age: u64,
}

fn default_api_max_age() -> u64 {
    30
}

fn default_immutable_max_age() -> u64 {
    31_536_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            api_max_age: default_api_max_age(),
            immutable_max_age: default_immutable_max_age(),
        }
    }
}

// ---------------------------------------------------------------------------
// ClassifyConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountryRange {
    pub cidr: String,
    pub country: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifyConfig {
    /// Honour `X-Forwarded-For` / `X-Real-IP` (only behind a trusted proxy).
    #[serde(default)]
    pub trust_forwarded_for: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel_header: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub country_ranges: Vec<CountryRange>,
}

// ---------------------------------------------------------------------------
// LookupsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LookupEntry {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupsConfig {
    #[serde(default)]
    pub channels: Vec<LookupEntry>,
    #[serde(default)]
    pub locales: Vec<LookupEntry>,
    #[serde(default)]
    pub countries: Vec<LookupEntry>,
}

impl LookupsConfig {
    fn default_seed() -> Self {
        let entry = |code: &str, name: &str| LookupEntry {
            code: code.to_string(),
            name: name.to_string(),
        };
        Self {
            channels: vec![
                entry("release", "Release"),
                entry("beta", "Beta"),
                entry("aurora", "Developer Edition"),
                entry("nightly", "Nightly"),
            ],
            locales: vec![entry("en-US", "English (US)"), entry("de", "German")],
            countries: vec![entry("US", "United States"), entry("DE", "Germany")],
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub version: u32,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub approval: ApprovalConfig,
    #[serde(default)]
    pub signing: SigningConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub classify: ClassifyConfig,
    #[serde(default)]
    pub lookups: LookupsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: 1,
            server: ServerConfig::default(),
            approval: ApprovalConfig::default(),
            signing: SigningConfig::default(),
            cache: CacheConfig::default(),
            classify: ClassifyConfig::default(),
            lookups: LookupsConfig::default(),
        }
    }
}

impl Config {
    /// Config written by `recipes init`: defaults plus a starter lookup seed.
    pub fn initial() -> Self {
        Self {
            lookups: LookupsConfig::default_seed(),
            ..Self::default()
        }
    }

    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Err(RecipeError::NotInitialized);
        }
        let data = std::fs::read_to_string(&path)?;
        let config: Config = serde_yaml::from_str(&data)?;
        Ok(config)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&paths::config_path(root), data.as_bytes())
    }

    pub fn key_path(&self, root: &Path) -> PathBuf {
        root.join(&self.signing.key_file)
    }

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        for (field, entries) in [
            ("channels", &self.lookups.channels),
            ("locales", &self.lookups.locales),
            ("countries", &self.lookups.countries),
        ] {
            let mut seen = HashSet::new();
            for e in entries {
                if !seen.insert(e.code.as_str()) {
                    warnings.push(ConfigWarning {
                        level: WarnLevel::Warning,
                        message: format!("lookups.{field}: duplicate code '{}'", e.code),
                    });
                }
            }
        }

        for range in &self.classify.country_ranges {
            if crate::classify::Cidr::parse(&range.cidr).is_none() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: format!("classify.country_ranges: invalid CIDR '{}'", range.cidr),
                });
            }
        }

        if self.server.admin_tokens.keys().any(|t| t.trim().is_empty()) {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: "server.admin_tokens: empty token".to_string(),
            });
        }

        if self.server.admin_enabled && self.server.admin_tokens.is_empty() {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "server.admin_enabled is set but no admin_tokens are configured"
                    .to_string(),
            });
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
