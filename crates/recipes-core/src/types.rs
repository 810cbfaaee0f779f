use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// ApprovalStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    /// Pending and approved requests block a second request on the same revision.
    pub fn is_active(self) -> bool {
        matches!(self, ApprovalStatus::Pending | ApprovalStatus::Approved)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ApprovalStatus {
    type Err = crate::error::RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ApprovalStatus::Pending),
            "approved" => Ok(ApprovalStatus::Approved),
            "rejected" => Ok(ApprovalStatus::Rejected),
            _ => Err(crate::error::RecipeError::validation(
                "status",
                format!("unknown approval status '{s}'"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// LookupKind
// ---------------------------------------------------------------------------

/// The three reference tables a revision can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupKind {
    Channel,
    Locale,
    Country,
}

impl LookupKind {
    pub fn all() -> &'static [LookupKind] {
        &[LookupKind::Channel, LookupKind::Locale, LookupKind::Country]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LookupKind::Channel => "channel",
            LookupKind::Locale => "locale",
            LookupKind::Country => "country",
        }
    }

    /// Name of the revision field (and query parameter) holding codes of this kind.
    pub fn field(self) -> &'static str {
        match self {
            LookupKind::Channel => "channels",
            LookupKind::Locale => "locales",
            LookupKind::Country => "countries",
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// EnabledState
// ---------------------------------------------------------------------------

/// Tri-state value of the `enabled` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnabledState {
    Enabled,
    Disabled,
    #[default]
    Unset,
}

impl std::str::FromStr for EnabledState {
    type Err = crate::error::RecipeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" => Ok(EnabledState::Unset),
            "true" | "1" => Ok(EnabledState::Enabled),
            "false" | "0" => Ok(EnabledState::Disabled),
            other => Err(crate::error::RecipeError::validation(
                "enabled",
                format!("expected true or false, got '{other}'"),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// RecipeStatus
// ---------------------------------------------------------------------------

/// Value of the `status` query parameter. Anything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipeStatus {
    Enabled,
    Disabled,
}

impl RecipeStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enabled" => Some(RecipeStatus::Enabled),
            "disabled" => Some(RecipeStatus::Disabled),
            _ => None,
        }
    }
}
