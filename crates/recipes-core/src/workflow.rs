//! The recipe service: store operations combined with signing and the
//! configured approval policy. Server handlers and CLI commands go through
//! this type rather than the store directly.

use std::path::Path;

use serde::Serialize;

use crate::action::Action;
use crate::approval::ApprovalRequest;
use crate::config::Config;
use crate::error::{RecipeError, Result};
use crate::filter::{FilterOptions, FilterSet};
use crate::paths;
use crate::recipe::{RecipeFields, RecipeSnapshot, RevisionRecord};
use crate::signing::{Signature, Signer};
use crate::store::Store;
use crate::types::RecipeStatus;

// ---------------------------------------------------------------------------
// SignatureState / ResignReport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureState {
    Valid,
    /// Signed, but over content that has since changed.
    Stale,
    /// Hash matches but the Ed25519 check fails.
    Invalid,
    Unsigned,
}

impl SignatureState {
    pub fn of(signature: Option<&Signature>, canonical: &[u8]) -> Self {
        match signature {
            None => SignatureState::Unsigned,
            Some(sig) if !sig.matches(canonical) => SignatureState::Stale,
            Some(sig) if !sig.verify(canonical) => SignatureState::Invalid,
            Some(_) => SignatureState::Valid,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SignatureState::Valid => "valid",
            SignatureState::Stale => "stale",
            SignatureState::Invalid => "invalid",
            SignatureState::Unsigned => "unsigned",
        }
    }
}

impl std::fmt::Display for SignatureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResignReport {
    pub recipes: usize,
    pub actions: usize,
}

// ---------------------------------------------------------------------------
// RecipeService
// ---------------------------------------------------------------------------

pub struct RecipeService {
    store: Store,
    signer: Signer,
    peer_approval_enforced: bool,
    resign_on_fetch: bool,
}

impl RecipeService {
    pub fn new(store: Store, signer: Signer, config: &Config) -> Self {
        Self {
            store,
            signer,
            peer_approval_enforced: config.approval.peer_approval_enforced,
            resign_on_fetch: config.signing.resign_on_fetch,
        }
    }

    /// Open the database and signing key under `root` and seed the lookups
    /// from `config`.
    pub fn open(root: &Path, config: &Config) -> Result<Self> {
        let store = Store::open(&paths::database_path(root))?;
        let seeded = store.sync_lookups(&config.lookups)?;
        tracing::debug!(lookups = seeded, "synchronised lookups");
        let signer = Signer::load_or_create(&config.key_path(root))?;
        Ok(Self::new(store, signer, config))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn public_key(&self) -> String {
        self.signer.public_key()
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Register (or replace) an action and sign the stored record.
    pub fn register_action(
        &self,
        name: &str,
        implementation: &str,
        arguments_schema: serde_json::Value,
    ) -> Result<Action> {
        let action = Action::new(name, implementation, arguments_schema)?;
        let (stored, replaced) = self.store.upsert_action(action)?;
        if !replaced {
            tracing::debug!(action = name, "action unchanged");
            return Ok(stored);
        }
        let signature = self.signer.sign(&stored.canonical_bytes());
        self.store.set_action_signature(name, signature)?;
        tracing::info!(
            action = name,
            hash = %stored.implementation_hash,
            "registered action"
        );
        self.store.action(name)
    }

    pub fn action(&self, name: &str) -> Result<Action> {
        self.store.action(name)
    }

    pub fn actions(&self) -> Result<Vec<Action>> {
        self.store.actions()
    }

    /// The action, only if `hash` names its current implementation.
    pub fn action_implementation(&self, name: &str, hash: &str) -> Result<Action> {
        let action = self.store.action(name)?;
        if action.implementation_hash != hash {
            return Err(RecipeError::ActionNotFound(format!(
                "{name} (implementation {hash})"
            )));
        }
        Ok(action)
    }

    pub fn signed_actions(&self) -> Result<Vec<Action>> {
        if self.resign_on_fetch {
            self.resign_actions()?;
        }
        self.store.signed_actions()
    }

    // -----------------------------------------------------------------------
    // Recipes
    // -----------------------------------------------------------------------

    pub fn create_recipe(&self, fields: RecipeFields, user: Option<String>) -> Result<RecipeSnapshot> {
        self.store.create_recipe(fields, user)
    }

    pub fn update_recipe(
        &self,
        recipe_id: u64,
        fields: RecipeFields,
        user: Option<String>,
    ) -> Result<RecipeSnapshot> {
        self.store.update_recipe(recipe_id, fields, user)
    }

    pub fn recipe(&self, recipe_id: u64) -> Result<RecipeSnapshot> {
        self.store.recipe(recipe_id)
    }

    /// `status` picks the collection, then every filter must hold.
    pub fn list_recipes(
        &self,
        status: Option<RecipeStatus>,
        filters: &FilterSet,
    ) -> Result<Vec<RecipeSnapshot>> {
        let recipes = self.store.recipes_with_status(status)?;
        if filters.is_empty() {
            return Ok(recipes);
        }
        tracing::debug!(filters = ?filters.names(), "filtering recipes");
        Ok(filters.apply(recipes))
    }

    pub fn signed_recipes(&self) -> Result<Vec<RecipeSnapshot>> {
        if self.resign_on_fetch {
            self.resign_recipes()?;
        }
        self.store.signed_recipes()
    }

    pub fn history(&self, recipe_id: u64) -> Result<Vec<RevisionRecord>> {
        self.store.history(recipe_id)
    }

    pub fn revision(&self, revision_id: u64) -> Result<RevisionRecord> {
        self.store.revision(revision_id)
    }

    pub fn revisions(&self) -> Result<Vec<RevisionRecord>> {
        self.store.revisions()
    }

    pub fn enable(&self, recipe_id: u64) -> Result<RecipeSnapshot> {
        self.store.set_enabled(recipe_id, true)
    }

    pub fn disable(&self, recipe_id: u64) -> Result<RecipeSnapshot> {
        self.store.set_enabled(recipe_id, false)
    }

    pub fn filter_options(&self) -> Result<FilterOptions> {
        Ok(FilterOptions::from_lookups(&self.store.lookups()?))
    }

    // -----------------------------------------------------------------------
    // Approval
    // -----------------------------------------------------------------------

    pub fn request_approval(
        &self,
        revision_id: u64,
        creator: Option<String>,
    ) -> Result<ApprovalRequest> {
        self.store.request_approval(revision_id, creator)
    }

    /// Approve and, if the revision is still current, sign it in the same
    /// transaction.
    pub fn approve(
        &self,
        request_id: u64,
        approver: Option<String>,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        let peer = self.peer_approval_enforced;
        self.store.decide_approval(request_id, |req, latest| {
            req.approve(approver, comment, peer)?;
            match latest {
                Some(revision) => Ok(Some(self.signer.sign(&revision.canonical_bytes()))),
                None => {
                    tracing::warn!(
                        request_id,
                        revision_id = req.revision_id,
                        "approved revision is no longer the latest; not signing"
                    );
                    Ok(None)
                }
            }
        })
    }

    pub fn reject(
        &self,
        request_id: u64,
        approver: Option<String>,
        comment: Option<String>,
    ) -> Result<ApprovalRequest> {
        let peer = self.peer_approval_enforced;
        self.store.decide_approval(request_id, |req, _| {
            req.reject(approver, comment, peer)?;
            Ok(None)
        })
    }

    pub fn close(&self, request_id: u64) -> Result<ApprovalRequest> {
        self.store.close_approval(request_id)
    }

    pub fn approval_request(&self, request_id: u64) -> Result<ApprovalRequest> {
        self.store.approval_request(request_id)
    }

    pub fn approval_requests(&self) -> Result<Vec<ApprovalRequest>> {
        self.store.approval_requests()
    }

    // -----------------------------------------------------------------------
    // Signatures
    // -----------------------------------------------------------------------

    /// Check the recipe's stored signature against its latest revision.
    pub fn verify(&self, recipe_id: u64) -> Result<SignatureState> {
        let snap = self.store.recipe(recipe_id)?;
        let state = SignatureState::of(
            snap.recipe.signature.as_ref(),
            &snap.revision.canonical_bytes(),
        );
        if state == SignatureState::Stale {
            tracing::warn!(recipe_id, revision_id = snap.revision.id, "recipe signature is stale");
        }
        Ok(state)
    }

    pub fn verify_action(&self, name: &str) -> Result<SignatureState> {
        let action = self.store.action(name)?;
        Ok(SignatureState::of(
            action.signature.as_ref(),
            &action.canonical_bytes(),
        ))
    }

    /// Sign every approved recipe and every action whose signature is
    /// missing or stale.
    pub fn resign_eligible(&self) -> Result<ResignReport> {
        Ok(ResignReport {
            recipes: self.resign_recipes()?,
            actions: self.resign_actions()?,
        })
    }

    fn resign_recipes(&self) -> Result<usize> {
        let mut signed = 0;
        for snap in self.store.all_recipes()? {
            if !snap.needs_signature() {
                continue;
            }
            let signature = self.signer.sign(&snap.revision.canonical_bytes());
            if self
                .store
                .set_recipe_signature(snap.id(), snap.revision.id, signature)?
            {
                tracing::info!(recipe_id = snap.id(), revision_id = snap.revision.id, "signed recipe");
                signed += 1;
            }
        }
        Ok(signed)
    }

    fn resign_actions(&self) -> Result<usize> {
        let mut signed = 0;
        for action in self.store.actions()? {
            if action.current_signature().is_some() {
                continue;
            }
            let signature = self.signer.sign(&action.canonical_bytes());
            if self.store.set_action_signature(&action.name, signature)? {
                tracing::info!(action = %action.name, "signed action");
                signed += 1;
            }
        }
        Ok(signed)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::RecipeFilter;
    use serde_json::json;
    use tempfile::TempDir;

    fn service_with(config: Config) -> (TempDir, RecipeService) {
        let dir = TempDir::new().unwrap();
        let svc = RecipeService::open(dir.path(), &config).unwrap();
        svc.register_action("console-log", "console.log(message)", json!({"required": ["message"]}))
            .unwrap();
        (dir, svc)
    }

    fn service() -> (TempDir, RecipeService) {
        service_with(Config::initial())
    }

    fn fields(name: &str, channels: &[&str]) -> RecipeFields {
        RecipeFields {
            name: Some(name.to_string()),
            action: Some("console-log".to_string()),
            arguments: Some(json!({"message": "hello"})),
            channels: Some(channels.iter().map(|c| c.to_string()).collect()),
            ..Default::default()
        }
    }

    fn approved(svc: &RecipeService, name: &str) -> RecipeSnapshot {
        let snap = svc.create_recipe(fields(name, &["beta"]), Some("alice".into())).unwrap();
        let req = svc
            .request_approval(snap.revision.id, Some("alice".into()))
            .unwrap();
        svc.approve(req.id, Some("bob".into()), Some("r+".into()))
            .unwrap();
        svc.recipe(snap.id()).unwrap()
    }

    #[test]
    fn registering_an_action_signs_it() {
        let (_dir, svc) = service();
        assert_eq!(svc.verify_action("console-log").unwrap(), SignatureState::Valid);
        assert_eq!(svc.signed_actions().unwrap().len(), 1);
    }

    #[test]
    fn reregistering_same_content_is_a_noop() {
        let (_dir, svc) = service();
        let before = svc.action("console-log").unwrap();
        let after = svc
            .register_action("console-log", "console.log(message)", json!({"required": ["message"]}))
            .unwrap();
        assert_eq!(before.created_at, after.created_at);
        assert_eq!(before.signature, after.signature);
    }

    #[test]
    fn implementation_lookup_checks_hash() {
        let (_dir, svc) = service();
        let action = svc.action("console-log").unwrap();
        assert!(svc
            .action_implementation("console-log", &action.implementation_hash)
            .is_ok());
        let err = svc
            .action_implementation("console-log", "deadbeef")
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn approval_signs_and_edit_invalidates() {
        let (_dir, svc) = service();
        let snap = approved(&svc, "X");
        assert!(snap.is_approved());
        assert!(snap.valid_signature().is_some());
        assert_eq!(svc.verify(snap.id()).unwrap(), SignatureState::Valid);
        assert_eq!(svc.signed_recipes().unwrap().len(), 1);

        let edited = svc
            .update_recipe(
                snap.id(),
                RecipeFields {
                    name: Some("Y".into()),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert!(edited.recipe.signature.is_none());
        assert_eq!(svc.verify(snap.id()).unwrap(), SignatureState::Unsigned);
        assert!(svc.signed_recipes().unwrap().is_empty());
    }

    #[test]
    fn stale_signature_is_reported_and_never_served() {
        let (_dir, svc) = service();
        let snap = approved(&svc, "X");
        let bogus = svc.signer.sign(b"not the revision");
        svc.store()
            .set_recipe_signature(snap.id(), snap.revision.id, bogus)
            .unwrap();
        assert_eq!(svc.verify(snap.id()).unwrap(), SignatureState::Stale);
        let loaded = svc.recipe(snap.id()).unwrap();
        assert!(loaded.valid_signature().is_none());
        assert!(loaded.to_json()["signature"].is_null());
    }

    #[test]
    fn approving_an_outdated_revision_does_not_sign() {
        let (_dir, svc) = service();
        let snap = svc.create_recipe(fields("X", &["beta"]), None).unwrap();
        let req = svc.request_approval(snap.revision.id, Some("alice".into())).unwrap();
        svc.update_recipe(
            snap.id(),
            RecipeFields {
                name: Some("Y".into()),
                ..Default::default()
            },
            None,
        )
        .unwrap();

        let decided = svc.approve(req.id, Some("bob".into()), None).unwrap();
        assert!(decided.is_approved());
        let loaded = svc.recipe(snap.id()).unwrap();
        assert!(loaded.recipe.signature.is_none());
        assert!(!loaded.is_approved());
        assert!(svc.store().revision(snap.revision.id).unwrap().approval.is_some());
    }

    #[test]
    fn self_approval_depends_on_config() {
        let (_dir, svc) = service();
        let snap = svc.create_recipe(fields("X", &["beta"]), None).unwrap();
        let req = svc.request_approval(snap.revision.id, Some("alice".into())).unwrap();
        assert!(matches!(
            svc.approve(req.id, Some("alice".into()), None),
            Err(RecipeError::PermissionDenied(_))
        ));

        let mut config = Config::initial();
        config.approval.peer_approval_enforced = false;
        let (_dir, lax) = service_with(config);
        let snap = lax.create_recipe(fields("X", &["beta"]), None).unwrap();
        let req = lax.request_approval(snap.revision.id, Some("alice".into())).unwrap();
        assert!(lax.approve(req.id, Some("alice".into()), None).is_ok());
    }

    #[test]
    fn rejection_allows_a_new_request() {
        let (_dir, svc) = service();
        let snap = svc.create_recipe(fields("X", &["beta"]), None).unwrap();
        let req = svc.request_approval(snap.revision.id, Some("alice".into())).unwrap();
        svc.reject(req.id, Some("bob".into()), Some("typo".into())).unwrap();
        assert!(svc.recipe(snap.id()).unwrap().recipe.signature.is_none());
        assert!(svc.request_approval(snap.revision.id, None).is_ok());
    }

    #[test]
    fn resign_covers_unsigned_actions() {
        let (_dir, svc) = service();
        let raw = Action::new("show-heartbeat", "run()", json!({})).unwrap();
        svc.store().upsert_action(raw).unwrap();
        assert_eq!(svc.verify_action("show-heartbeat").unwrap(), SignatureState::Unsigned);

        let report = svc.resign_eligible().unwrap();
        assert_eq!(report, ResignReport { recipes: 0, actions: 1 });
        assert_eq!(svc.verify_action("show-heartbeat").unwrap(), SignatureState::Valid);
        assert_eq!(svc.resign_eligible().unwrap(), ResignReport::default());
    }

    #[test]
    fn list_combines_status_and_filters() {
        let (_dir, svc) = service();
        let a = approved(&svc, "beta one");
        svc.enable(a.id()).unwrap();
        approved(&svc, "beta two");
        svc.create_recipe(fields("release one", &["release"]), None)
            .unwrap();

        let beta = FilterSet::new(vec![RecipeFilter::AnyOf(
            crate::types::LookupKind::Channel,
            vec!["beta".into()],
        )]);
        assert_eq!(svc.list_recipes(None, &beta).unwrap().len(), 2);
        let enabled_beta = svc
            .list_recipes(Some(RecipeStatus::Enabled), &beta)
            .unwrap();
        assert_eq!(enabled_beta.len(), 1);
        assert_eq!(enabled_beta[0].id(), a.id());
        assert_eq!(
            svc.list_recipes(Some(RecipeStatus::Disabled), &FilterSet::default())
                .unwrap()
                .len(),
            2
        );
    }

    #[test]
    fn filter_options_come_from_configured_lookups() {
        let (_dir, svc) = service();
        let opts = svc.filter_options().unwrap();
        assert_eq!(opts.channels.len(), 4);
        assert!(opts.countries.iter().any(|c| c.key == "US"));
    }
}
