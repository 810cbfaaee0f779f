use crate::approval::ApprovalRequest;
use crate::error::{RecipeError, Result};
use crate::signing::{self, Signature};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// RecipeRevision
// ---------------------------------------------------------------------------

/// Immutable snapshot of a recipe's configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipeRevision {
    pub id: u64,
    pub recipe_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<u64>,
    pub name: String,
    pub action_name: String,
    pub arguments: serde_json::Value,
    #[serde(default)]
    pub extra_filter_expression: String,
    #[serde(default)]
    pub channels: Vec<String>,
    #[serde(default)]
    pub locales: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub comment: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RecipeRevision {
    pub fn from_draft(
        id: u64,
        recipe_id: u64,
        parent_id: Option<u64>,
        draft: RevisionDraft,
        user: Option<String>,
    ) -> Self {
        Self {
            id,
            recipe_id,
            parent_id,
            name: draft.name,
            action_name: draft.action_name,
            arguments: draft.arguments,
            extra_filter_expression: draft.extra_filter_expression,
            channels: draft.channels,
            locales: draft.locales,
            countries: draft.countries,
            comment: draft.comment,
            user,
            created_at: Utc::now(),
        }
    }

    /// Full targeting expression evaluated by clients.
    pub fn filter_expression(&self) -> String {
        fn list(values: &[String]) -> String {
            let quoted: Vec<String> = values.iter().map(|v| format!("\"{v}\"")).collect();
            format!("[{}]", quoted.join(", "))
        }

        let mut parts = Vec::new();
        if !self.channels.is_empty() {
            parts.push(format!("normandy.channel in {}", list(&self.channels)));
        }
        if !self.locales.is_empty() {
            parts.push(format!("normandy.locale in {}", list(&self.locales)));
        }
        if !self.countries.is_empty() {
            parts.push(format!("normandy.country in {}", list(&self.countries)));
        }
        let extra = self.extra_filter_expression.trim();
        if !extra.is_empty() {
            if parts.is_empty() {
                parts.push(extra.to_string());
            } else {
                parts.push(format!("({extra})"));
            }
        }
        parts.join(" && ")
    }

    /// Bytes covered by a recipe signature: the public fields of this revision.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        signing::canonical_json(&serde_json::json!({
            "id": self.recipe_id,
            "revision_id": self.id,
            "name": self.name,
            "action": self.action_name,
            "arguments": self.arguments,
            "channels": self.channels,
            "locales": self.locales,
            "countries": self.countries,
            "extra_filter_expression": self.extra_filter_expression,
            "filter_expression": self.filter_expression(),
        }))
    }
}

// ---------------------------------------------------------------------------
// Recipe
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipe {
    pub id: u64,
    pub latest_revision_id: u64,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<Signature>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl Recipe {
    pub fn new(id: u64, latest_revision_id: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            latest_revision_id,
            enabled: false,
            signature: None,
            created_at: now,
            last_updated: now,
        }
    }

    /// Point at a freshly written revision. Any signature belongs to the old one.
    pub fn repoint(&mut self, revision_id: u64) {
        self.latest_revision_id = revision_id;
        self.signature = None;
        self.last_updated = Utc::now();
    }
}

// ---------------------------------------------------------------------------
// RecipeFields / RevisionDraft
// ---------------------------------------------------------------------------

/// Client-supplied recipe fields. On create the required ones must be
/// present; on update every omitted field keeps its prior value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecipeFields {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub arguments: Option<serde_json::Value>,
    #[serde(default)]
    pub extra_filter_expression: Option<String>,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
    #[serde(default)]
    pub locales: Option<Vec<String>>,
    #[serde(default)]
    pub countries: Option<Vec<String>>,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Fully resolved fields of a revision that has not been written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionDraft {
    pub name: String,
    pub action_name: String,
    pub arguments: serde_json::Value,
    pub extra_filter_expression: String,
    pub channels: Vec<String>,
    pub locales: Vec<String>,
    pub countries: Vec<String>,
    pub comment: String,
}

fn normalize_codes(mut codes: Vec<String>) -> Vec<String> {
    codes.retain(|c| !c.trim().is_empty());
    codes.sort();
    codes.dedup();
    codes
}

impl RecipeFields {
    /// Draft for a brand-new recipe.
    pub fn into_draft(self) -> Result<RevisionDraft> {
        let name = self
            .name
            .ok_or_else(|| RecipeError::validation("name", "this field is required"))?;
        let action_name = self
            .action
            .ok_or_else(|| RecipeError::validation("action", "this field is required"))?;
        let draft = RevisionDraft {
            name,
            action_name,
            arguments: self.arguments.unwrap_or_else(|| serde_json::json!({})),
            extra_filter_expression: self.extra_filter_expression.unwrap_or_default(),
            channels: normalize_codes(self.channels.unwrap_or_default()),
            locales: normalize_codes(self.locales.unwrap_or_default()),
            countries: normalize_codes(self.countries.unwrap_or_default()),
            comment: self.comment.unwrap_or_default(),
        };
        draft.check_shape()?;
        Ok(draft)
    }

    /// Draft for the revision following `prior`. The comment describes the
    /// edit itself, so it is never carried over.
    pub fn apply(self, prior: &RecipeRevision) -> Result<RevisionDraft> {
        let draft = RevisionDraft {
            name: self.name.unwrap_or_else(|| prior.name.clone()),
            action_name: self.action.unwrap_or_else(|| prior.action_name.clone()),
            arguments: self.arguments.unwrap_or_else(|| prior.arguments.clone()),
            extra_filter_expression: self
                .extra_filter_expression
                .unwrap_or_else(|| prior.extra_filter_expression.clone()),
            channels: normalize_codes(self.channels.unwrap_or_else(|| prior.channels.clone())),
            locales: normalize_codes(self.locales.unwrap_or_else(|| prior.locales.clone())),
            countries: normalize_codes(
                self.countries.unwrap_or_else(|| prior.countries.clone()),
            ),
            comment: self.comment.unwrap_or_default(),
        };
        draft.check_shape()?;
        Ok(draft)
    }
}

impl RevisionDraft {
    fn check_shape(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(RecipeError::validation("name", "may not be blank"));
        }
        if self.action_name.trim().is_empty() {
            return Err(RecipeError::validation("action", "may not be blank"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// RecipeSnapshot
// ---------------------------------------------------------------------------

/// A recipe together with its latest revision and that revision's most
/// recent approval request, loaded eagerly in one read transaction.
#[derive(Debug, Clone)]
pub struct RecipeSnapshot {
    pub recipe: Recipe,
    pub revision: RecipeRevision,
    pub approval: Option<ApprovalRequest>,
}

impl RecipeSnapshot {
    pub fn id(&self) -> u64 {
        self.recipe.id
    }

    pub fn is_approved(&self) -> bool {
        self.approval.as_ref().is_some_and(|a| a.is_approved())
    }

    /// Served to clients: switched on and the current revision approved.
    pub fn is_enabled(&self) -> bool {
        self.recipe.enabled && self.is_approved()
    }

    /// The stored signature, only if it verifies against the latest revision.
    pub fn valid_signature(&self) -> Option<&Signature> {
        if !self.is_approved() {
            return None;
        }
        let sig = self.recipe.signature.as_ref()?;
        if sig.verify(&self.revision.canonical_bytes()) {
            Some(sig)
        } else {
            tracing::warn!(
                recipe_id = self.recipe.id,
                revision_id = self.revision.id,
                "ignoring stale or invalid recipe signature"
            );
            None
        }
    }

    /// Approved but not (validly) signed.
    pub fn needs_signature(&self) -> bool {
        self.is_approved()
            && self
                .recipe
                .signature
                .as_ref()
                .is_none_or(|s| !s.verify(&self.revision.canonical_bytes()))
    }

    /// Flat wire form shared by the API and `--json` output.
    pub fn to_json(&self) -> serde_json::Value {
        let rev = &self.revision;
        serde_json::json!({
            "id": self.recipe.id,
            "name": rev.name,
            "action": rev.action_name,
            "arguments": rev.arguments,
            "extra_filter_expression": rev.extra_filter_expression,
            "filter_expression": rev.filter_expression(),
            "channels": rev.channels,
            "locales": rev.locales,
            "countries": rev.countries,
            "enabled": self.is_enabled(),
            "is_approved": self.is_approved(),
            "revision_id": rev.id,
            "latest_revision_id": self.recipe.latest_revision_id,
            "last_updated": self.recipe.last_updated,
            "approval_request": self.approval,
            "signature": self.valid_signature(),
        })
    }
}

// ---------------------------------------------------------------------------
// RevisionRecord
// ---------------------------------------------------------------------------

/// A revision plus the most recent approval request filed against it.
#[derive(Debug, Clone)]
pub struct RevisionRecord {
    pub revision: RecipeRevision,
    pub approval: Option<ApprovalRequest>,
}

impl RevisionRecord {
    pub fn to_json(&self) -> serde_json::Value {
        let rev = &self.revision;
        serde_json::json!({
            "id": rev.id,
            "recipe_id": rev.recipe_id,
            "parent_id": rev.parent_id,
            "name": rev.name,
            "action": rev.action_name,
            "arguments": rev.arguments,
            "extra_filter_expression": rev.extra_filter_expression,
            "filter_expression": rev.filter_expression(),
            "channels": rev.channels,
            "locales": rev.locales,
            "countries": rev.countries,
            "comment": rev.comment,
            "user": rev.user,
            "date_created": rev.created_at,
            "approval_request": self.approval,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn revision() -> RecipeRevision {
        let draft = RecipeFields {
            name: Some("X".into()),
            action: Some("console-log".into()),
            arguments: Some(json!({"message": "hi"})),
            channels: Some(vec!["release".into(), "beta".into(), "beta".into()]),
            countries: Some(vec!["US".into()]),
            ..Default::default()
        }
        .into_draft()
        .unwrap();
        RecipeRevision::from_draft(1, 1, None, draft, Some("alice".into()))
    }

    #[test]
    fn create_requires_name_and_action() {
        let err = RecipeFields {
            name: Some("X".into()),
            ..Default::default()
        }
        .into_draft()
        .unwrap_err();
        assert!(matches!(err, RecipeError::Validation { ref field, .. } if field == "action"));

        let err = RecipeFields {
            name: Some("  ".into()),
            action: Some("a".into()),
            ..Default::default()
        }
        .into_draft()
        .unwrap_err();
        assert!(matches!(err, RecipeError::Validation { ref field, .. } if field == "name"));
    }

    #[test]
    fn codes_are_sorted_and_deduplicated() {
        assert_eq!(revision().channels, vec!["beta", "release"]);
    }

    #[test]
    fn patch_keeps_omitted_fields() {
        let prior = revision();
        let draft = RecipeFields {
            name: Some("Y".into()),
            ..Default::default()
        }
        .apply(&prior)
        .unwrap();
        assert_eq!(draft.name, "Y");
        assert_eq!(draft.action_name, prior.action_name);
        assert_eq!(draft.arguments, prior.arguments);
        assert_eq!(draft.channels, prior.channels);
        assert_eq!(draft.countries, prior.countries);
        assert_eq!(draft.extra_filter_expression, prior.extra_filter_expression);
    }

    #[test]
    fn filter_expression_joins_targeting() {
        let mut rev = revision();
        rev.extra_filter_expression = "normandy.version >= 60".into();
        assert_eq!(
            rev.filter_expression(),
            "normandy.channel in [\"beta\", \"release\"] && normandy.country in [\"US\"] && (normandy.version >= 60)"
        );

        rev.channels.clear();
        rev.countries.clear();
        assert_eq!(rev.filter_expression(), "normandy.version >= 60");
    }

    #[test]
    fn canonical_bytes_change_with_name() {
        let a = revision();
        let mut b = a.clone();
        b.name = "Y".into();
        assert_ne!(a.canonical_bytes(), b.canonical_bytes());
        // created_at and user are not public fields
        let mut c = a.clone();
        c.user = Some("bob".into());
        assert_eq!(a.canonical_bytes(), c.canonical_bytes());
    }

    #[test]
    fn wire_form_hides_unapproved_signature() {
        let signer = crate::signing::Signer::generate();
        let rev = revision();
        let mut recipe = Recipe::new(1, 1);
        recipe.enabled = true;
        recipe.signature = Some(signer.sign(&rev.canonical_bytes()));
        let snap = RecipeSnapshot {
            recipe,
            revision: rev,
            approval: None,
        };
        let json = snap.to_json();
        assert_eq!(json["enabled"], false);
        assert_eq!(json["is_approved"], false);
        assert!(json["signature"].is_null());
        assert_eq!(json["action"], "console-log");
        assert_eq!(json["channels"], json!(["beta", "release"]));
    }

    #[test]
    fn forged_signature_is_neither_served_nor_trusted() {
        let signer = crate::signing::Signer::generate();
        let rev = revision();
        let mut approval = ApprovalRequest::new(1, rev.id, Some("alice".into()));
        approval.approve(Some("bob".into()), None, true).unwrap();

        let mut signature = signer.sign(&rev.canonical_bytes());
        signature.signature = crate::signing::Signer::generate()
            .sign(&rev.canonical_bytes())
            .signature;
        let mut recipe = Recipe::new(1, rev.id);
        recipe.signature = Some(signature);
        let snap = RecipeSnapshot {
            recipe,
            revision: rev,
            approval: Some(approval),
        };

        assert!(snap.is_approved());
        assert!(snap.valid_signature().is_none());
        assert!(snap.needs_signature());
        assert!(snap.to_json()["signature"].is_null());
    }

    #[test]
    fn repoint_drops_signature() {
        let signer = crate::signing::Signer::generate();
        let mut recipe = Recipe::new(1, 1);
        recipe.signature = Some(signer.sign(b"x"));
        recipe.repoint(2);
        assert_eq!(recipe.latest_revision_id, 2);
        assert!(recipe.signature.is_none());
    }
}
