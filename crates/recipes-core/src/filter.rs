//! Recipe filtering.
//!
//! A [`FilterSet`] is an explicit list of named predicates built from query
//! parameters. Every predicate must hold for a recipe to match (AND); a
//! multi-value predicate such as `channels=a,b` matches when any one of its
//! values does (OR). Evaluation is eager over already-loaded snapshots.
//!
//! `status` is not part of the set: it selects a collection through the
//! store's `only_enabled` / `only_disabled` queries before filtering.

use crate::error::Result;
use crate::lookup::Lookup;
use crate::recipe::RecipeSnapshot;
use crate::types::{EnabledState, LookupKind};
use serde::Serialize;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// RecipeFilter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RecipeFilter {
    /// Exact match on the latest revision's action name.
    Action(String),
    /// Enabled (true) or disabled (false) recipes.
    Enabled(bool),
    /// Revision targets at least one of the given codes.
    AnyOf(LookupKind, Vec<String>),
    /// Case-sensitive substring of the name or the extra filter expression.
    Text(String),
}

impl RecipeFilter {
    pub fn name(&self) -> &'static str {
        match self {
            RecipeFilter::Action(_) => "action",
            RecipeFilter::Enabled(_) => "enabled",
            RecipeFilter::AnyOf(kind, _) => kind.field(),
            RecipeFilter::Text(_) => "text",
        }
    }

    pub fn matches(&self, snap: &RecipeSnapshot) -> bool {
        let rev = &snap.revision;
        match self {
            RecipeFilter::Action(name) => &rev.action_name == name,
            RecipeFilter::Enabled(want) => snap.is_enabled() == *want,
            RecipeFilter::AnyOf(kind, wanted) => {
                let have = match kind {
                    LookupKind::Channel => &rev.channels,
                    LookupKind::Locale => &rev.locales,
                    LookupKind::Country => &rev.countries,
                };
                wanted.iter().any(|w| have.contains(w))
            }
            RecipeFilter::Text(text) => {
                rev.name.contains(text.as_str()) || rev.extra_filter_expression.contains(text.as_str())
            }
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

// ---------------------------------------------------------------------------
// FilterSet
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    filters: Vec<RecipeFilter>,
}

impl FilterSet {
    pub fn new(filters: Vec<RecipeFilter>) -> Self {
        Self { filters }
    }

    /// Build from raw query parameters. Unknown keys and empty values impose
    /// no constraint; a malformed `enabled` value is a validation error.
    pub fn from_query(params: &BTreeMap<String, String>) -> Result<Self> {
        let mut filters = Vec::new();

        if let Some(action) = params.get("action").filter(|v| !v.is_empty()) {
            filters.push(RecipeFilter::Action(action.clone()));
        }

        if let Some(enabled) = params.get("enabled") {
            match enabled.parse::<EnabledState>()? {
                EnabledState::Enabled => filters.push(RecipeFilter::Enabled(true)),
                EnabledState::Disabled => filters.push(RecipeFilter::Enabled(false)),
                EnabledState::Unset => {}
            }
        }

        for &kind in LookupKind::all() {
            if let Some(value) = params.get(kind.field()) {
                let values = split_list(value);
                if !values.is_empty() {
                    filters.push(RecipeFilter::AnyOf(kind, values));
                }
            }
        }

        if let Some(text) = params.get("text") {
            filters.push(RecipeFilter::Text(text.clone()));
        }

        Ok(Self { filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.filters.iter().map(RecipeFilter::name).collect()
    }

    pub fn matches(&self, snap: &RecipeSnapshot) -> bool {
        self.filters.iter().all(|f| f.matches(snap))
    }

    pub fn apply(&self, snapshots: Vec<RecipeSnapshot>) -> Vec<RecipeSnapshot> {
        snapshots.into_iter().filter(|s| self.matches(s)).collect()
    }
}

// ---------------------------------------------------------------------------
// FilterOptions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FilterOption {
    pub key: String,
    pub value: String,
}

/// Valid values for each filter, for populating a UI.
#[derive(Debug, Clone, Serialize)]
pub struct FilterOptions {
    pub status: Vec<FilterOption>,
    pub channels: Vec<FilterOption>,
    pub countries: Vec<FilterOption>,
    pub locales: Vec<FilterOption>,
}

impl FilterOptions {
    pub fn from_lookups(lookups: &[Lookup]) -> Self {
        let of = |kind: LookupKind| {
            lookups
                .iter()
                .filter(|l| l.kind == kind)
                .map(|l| FilterOption {
                    key: l.code.clone(),
                    value: l.name.clone(),
                })
                .collect()
        };
        Self {
            status: vec![
                FilterOption {
                    key: "enabled".to_string(),
                    value: "Enabled".to_string(),
                },
                FilterOption {
                    key: "disabled".to_string(),
                    value: "Disabled".to_string(),
                },
            ],
            channels: of(LookupKind::Channel),
            countries: of(LookupKind::Country),
            locales: of(LookupKind::Locale),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
