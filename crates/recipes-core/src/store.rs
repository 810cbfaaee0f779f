//! Persistent storage for actions, recipes, revisions and approvals using redb.
//!
//! # Table design
//!
//! Records are JSON-encoded values keyed by id (or by name for actions).
//! Two index tables carry the invariants:
//!
//! ```text
//! recipe_history     (recipe_id, revision_id) -> ()   append-only history
//! revision_approval  revision_id -> request_id        latest request per revision
//! ```
//!
//! redb runs one write transaction at a time, so every read-check-write
//! sequence below (repointing a recipe, the single-active-request check, an
//! approval decision) is a compare-and-swap against committed state: a second
//! concurrent writer sees the first writer's result and fails its check.

use std::path::Path;

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::action::Action;
use crate::approval::ApprovalRequest;
use crate::config::LookupsConfig;
use crate::error::{RecipeError, Result};
use crate::lookup::{Lookup, LookupSet};
use crate::recipe::{
    Recipe, RecipeFields, RecipeRevision, RecipeSnapshot, RevisionDraft, RevisionRecord,
};
use crate::signing::Signature;
use crate::types::{LookupKind, RecipeStatus};

// ---------------------------------------------------------------------------
// Table definitions
// ---------------------------------------------------------------------------

const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
const ACTIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("actions");
const RECIPES: TableDefinition<u64, &[u8]> = TableDefinition::new("recipes");
const REVISIONS: TableDefinition<u64, &[u8]> = TableDefinition::new("revisions");
const RECIPE_HISTORY: TableDefinition<(u64, u64), ()> = TableDefinition::new("recipe_history");
const APPROVALS: TableDefinition<u64, &[u8]> = TableDefinition::new("approval_requests");
const REVISION_APPROVAL: TableDefinition<u64, u64> = TableDefinition::new("revision_approval");
/// Key: `{kind}:{code}`
const LOOKUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("lookups");

const RECIPE_SEQ: &str = "recipe";
const REVISION_SEQ: &str = "revision";
const APPROVAL_SEQ: &str = "approval_request";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn db_err(e: impl std::fmt::Display) -> RecipeError {
    RecipeError::Store(e.to_string())
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(db_err)
}

fn get_by_id<T, Tbl>(table: &Tbl, id: u64) -> Result<Option<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<u64, &'static [u8]>,
{
    match table.get(id).map_err(db_err)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn get_by_name<T, Tbl>(table: &Tbl, name: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    Tbl: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(name).map_err(db_err)? {
        Some(guard) => Ok(Some(decode(guard.value())?)),
        None => Ok(None),
    }
}

fn put_by_id<T: Serialize>(
    table: &mut redb::Table<'_, u64, &'static [u8]>,
    id: u64,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    table.insert(id, bytes.as_slice()).map_err(db_err)?;
    Ok(())
}

fn all_values<T, K, Tbl>(table: &Tbl) -> Result<Vec<T>>
where
    T: DeserializeOwned,
    K: redb::Key + 'static,
    Tbl: ReadableTable<K, &'static [u8]>,
{
    let mut out = Vec::new();
    for entry in table.iter().map_err(db_err)? {
        let (_, v) = entry.map_err(db_err)?;
        out.push(decode(v.value())?);
    }
    Ok(out)
}

fn next_id(wt: &WriteTransaction, seq: &str) -> Result<u64> {
    let mut counters = wt.open_table(COUNTERS).map_err(db_err)?;
    let next = counters
        .get(seq)
        .map_err(db_err)?
        .map(|g| g.value())
        .unwrap_or(0)
        + 1;
    counters.insert(seq, next).map_err(db_err)?;
    Ok(next)
}

fn lookup_key(kind: LookupKind, code: &str) -> String {
    format!("{}:{}", kind.as_str(), code)
}

fn latest_approval<A, I>(approvals: &A, index: &I, revision_id: u64) -> Result<Option<ApprovalRequest>>
where
    A: ReadableTable<u64, &'static [u8]>,
    I: ReadableTable<u64, u64>,
{
    let Some(request_id) = index.get(revision_id).map_err(db_err)?.map(|g| g.value()) else {
        return Ok(None);
    };
    get_by_id(approvals, request_id)
}

fn load_snapshot<R, A, I>(
    revisions: &R,
    approvals: &A,
    index: &I,
    recipe: Recipe,
) -> Result<RecipeSnapshot>
where
    R: ReadableTable<u64, &'static [u8]>,
    A: ReadableTable<u64, &'static [u8]>,
    I: ReadableTable<u64, u64>,
{
    let revision: RecipeRevision = get_by_id(revisions, recipe.latest_revision_id)?
        .ok_or(RecipeError::RevisionNotFound(recipe.latest_revision_id))?;
    let approval = latest_approval(approvals, index, revision.id)?;
    Ok(RecipeSnapshot {
        recipe,
        revision,
        approval,
    })
}

/// Checks a draft against the actions and lookups committed in `wt`.
fn validate_draft(wt: &WriteTransaction, draft: &RevisionDraft) -> Result<()> {
    let actions = wt.open_table(ACTIONS).map_err(db_err)?;
    let action: Action = get_by_name(&actions, &draft.action_name)?.ok_or_else(|| {
        RecipeError::validation("action", format!("unknown action '{}'", draft.action_name))
    })?;
    action.validate_arguments(&draft.arguments)?;

    let lookups = wt.open_table(LOOKUPS).map_err(db_err)?;
    let known = LookupSet::new(all_values::<Lookup, _, _>(&lookups)?);
    known.check(LookupKind::Channel, &draft.channels)?;
    known.check(LookupKind::Locale, &draft.locales)?;
    known.check(LookupKind::Country, &draft.countries)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct Store {
    db: Database,
}

impl Store {
    /// Open or create the database at `path`, creating every table.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            crate::io::ensure_dir(parent)?;
        }
        let db = Database::create(path).map_err(db_err)?;
        let wt = db.begin_write().map_err(db_err)?;
        {
            wt.open_table(COUNTERS).map_err(db_err)?;
            wt.open_table(ACTIONS).map_err(db_err)?;
            wt.open_table(RECIPES).map_err(db_err)?;
            wt.open_table(REVISIONS).map_err(db_err)?;
            wt.open_table(RECIPE_HISTORY).map_err(db_err)?;
            wt.open_table(APPROVALS).map_err(db_err)?;
            wt.open_table(REVISION_APPROVAL).map_err(db_err)?;
            wt.open_table(LOOKUPS).map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;
        Ok(Self { db })
    }

    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    /// Replace the lookup tables with the configured entries.
    pub fn sync_lookups(&self, cfg: &LookupsConfig) -> Result<usize> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let mut count = 0;
        {
            let mut table = wt.open_table(LOOKUPS).map_err(db_err)?;
            let existing: Vec<String> = table
                .iter()
                .map_err(db_err)?
                .map(|e| e.map(|(k, _)| k.value().to_string()))
                .collect::<std::result::Result<_, _>>()
                .map_err(db_err)?;
            for key in existing {
                table.remove(key.as_str()).map_err(db_err)?;
            }

            for (kind, entries) in [
                (LookupKind::Channel, &cfg.channels),
                (LookupKind::Locale, &cfg.locales),
                (LookupKind::Country, &cfg.countries),
            ] {
                for entry in entries {
                    let lookup = Lookup {
                        kind,
                        code: entry.code.clone(),
                        name: entry.name.clone(),
                    };
                    let bytes = serde_json::to_vec(&lookup)?;
                    table
                        .insert(lookup_key(kind, &entry.code).as_str(), bytes.as_slice())
                        .map_err(db_err)?;
                    count += 1;
                }
            }
        }
        wt.commit().map_err(db_err)?;
        Ok(count)
    }

    pub fn lookups(&self) -> Result<Vec<Lookup>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(LOOKUPS).map_err(db_err)?;
        all_values::<Lookup, _, _>(&table)
    }

    // -----------------------------------------------------------------------
    // Actions
    // -----------------------------------------------------------------------

    /// Store `action` unless an identical one is already registered.
    ///
    /// Returns the stored record and whether it was replaced.
    pub fn upsert_action(&self, action: Action) -> Result<(Action, bool)> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let result = {
            let mut table = wt.open_table(ACTIONS).map_err(db_err)?;
            let existing: Option<Action> = get_by_name(&table, &action.name)?;
            match existing {
                Some(current) if current.same_content(&action) => (current, false),
                _ => {
                    let bytes = serde_json::to_vec(&action)?;
                    table
                        .insert(action.name.as_str(), bytes.as_slice())
                        .map_err(db_err)?;
                    (action, true)
                }
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(result)
    }

    pub fn action(&self, name: &str) -> Result<Action> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ACTIONS).map_err(db_err)?;
        get_by_name(&table, name)?.ok_or_else(|| RecipeError::ActionNotFound(name.to_string()))
    }

    /// All actions ordered by name.
    pub fn actions(&self) -> Result<Vec<Action>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let table = rt.open_table(ACTIONS).map_err(db_err)?;
        all_values::<Action, _, _>(&table)
    }

    pub fn signed_actions(&self) -> Result<Vec<Action>> {
        Ok(self
            .actions()?
            .into_iter()
            .filter(|a| a.current_signature().is_some())
            .collect())
    }

    /// Attach `signature` if the stored action is still the one it covers.
    pub fn set_action_signature(&self, name: &str, signature: Signature) -> Result<bool> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let stored = {
            let mut table = wt.open_table(ACTIONS).map_err(db_err)?;
            let mut action: Action = get_by_name(&table, name)?
                .ok_or_else(|| RecipeError::ActionNotFound(name.to_string()))?;
            if signature.matches(&action.canonical_bytes()) {
                action.signature = Some(signature);
                let bytes = serde_json::to_vec(&action)?;
                table.insert(name, bytes.as_slice()).map_err(db_err)?;
                true
            } else {
                false
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(stored)
    }

    // -----------------------------------------------------------------------
    // Recipes
    // -----------------------------------------------------------------------

    /// Create a recipe and its first revision in one transaction.
    pub fn create_recipe(&self, fields: RecipeFields, user: Option<String>) -> Result<RecipeSnapshot> {
        let draft = fields.into_draft()?;

        let wt = self.db.begin_write().map_err(db_err)?;
        let recipe_id = next_id(&wt, RECIPE_SEQ)?;
        let revision_id = next_id(&wt, REVISION_SEQ)?;
        validate_draft(&wt, &draft)?;
        {
            let revision = RecipeRevision::from_draft(revision_id, recipe_id, None, draft, user);
            let recipe = Recipe::new(recipe_id, revision_id);

            let mut revisions = wt.open_table(REVISIONS).map_err(db_err)?;
            put_by_id(&mut revisions, revision_id, &revision)?;
            let mut recipes = wt.open_table(RECIPES).map_err(db_err)?;
            put_by_id(&mut recipes, recipe_id, &recipe)?;
            let mut history = wt.open_table(RECIPE_HISTORY).map_err(db_err)?;
            history
                .insert((recipe_id, revision_id), ())
                .map_err(db_err)?;
        }
        wt.commit().map_err(db_err)?;

        tracing::info!(recipe_id, revision_id, "created recipe");
        self.recipe(recipe_id)
    }

    /// Append a revision built from `fields` over the current one, repoint
    /// the recipe at it and drop its signature, all in one transaction.
    pub fn update_recipe(
        &self,
        recipe_id: u64,
        fields: RecipeFields,
        user: Option<String>,
    ) -> Result<RecipeSnapshot> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let revision_id = next_id(&wt, REVISION_SEQ)?;
        {
            let mut recipes = wt.open_table(RECIPES).map_err(db_err)?;
            let mut recipe: Recipe =
                get_by_id(&recipes, recipe_id)?.ok_or(RecipeError::RecipeNotFound(recipe_id))?;

            let mut revisions = wt.open_table(REVISIONS).map_err(db_err)?;
            let prior: RecipeRevision = get_by_id(&revisions, recipe.latest_revision_id)?
                .ok_or(RecipeError::RevisionNotFound(recipe.latest_revision_id))?;

            let draft = fields.apply(&prior)?;
            validate_draft(&wt, &draft)?;

            let revision =
                RecipeRevision::from_draft(revision_id, recipe_id, Some(prior.id), draft, user);
            put_by_id(&mut revisions, revision_id, &revision)?;

            let had_signature = recipe.signature.is_some();
            recipe.repoint(revision_id);
            put_by_id(&mut recipes, recipe_id, &recipe)?;

            let mut history = wt.open_table(RECIPE_HISTORY).map_err(db_err)?;
            history
                .insert((recipe_id, revision_id), ())
                .map_err(db_err)?;

            tracing::info!(
                recipe_id,
                revision_id,
                parent_id = prior.id,
                signature_invalidated = had_signature,
                "created recipe revision"
            );
        }
        wt.commit().map_err(db_err)?;

        self.recipe(recipe_id)
    }

    pub fn recipe(&self, recipe_id: u64) -> Result<RecipeSnapshot> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let recipes = rt.open_table(RECIPES).map_err(db_err)?;
        let revisions = rt.open_table(REVISIONS).map_err(db_err)?;
        let approvals = rt.open_table(APPROVALS).map_err(db_err)?;
        let index = rt.open_table(REVISION_APPROVAL).map_err(db_err)?;

        let recipe: Recipe =
            get_by_id(&recipes, recipe_id)?.ok_or(RecipeError::RecipeNotFound(recipe_id))?;
        load_snapshot(&revisions, &approvals, &index, recipe)
    }

    /// Every recipe ordered by id.
    pub fn all_recipes(&self) -> Result<Vec<RecipeSnapshot>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let recipes = rt.open_table(RECIPES).map_err(db_err)?;
        let revisions = rt.open_table(REVISIONS).map_err(db_err)?;
        let approvals = rt.open_table(APPROVALS).map_err(db_err)?;
        let index = rt.open_table(REVISION_APPROVAL).map_err(db_err)?;

        all_values::<Recipe, _, _>(&recipes)?
            .into_iter()
            .map(|r| load_snapshot(&revisions, &approvals, &index, r))
            .collect()
    }

    pub fn only_enabled(&self) -> Result<Vec<RecipeSnapshot>> {
        Ok(self
            .all_recipes()?
            .into_iter()
            .filter(RecipeSnapshot::is_enabled)
            .collect())
    }

    pub fn only_disabled(&self) -> Result<Vec<RecipeSnapshot>> {
        Ok(self
            .all_recipes()?
            .into_iter()
            .filter(|s| !s.is_enabled())
            .collect())
    }

    /// Collection selected by the `status` query parameter.
    pub fn recipes_with_status(&self, status: Option<RecipeStatus>) -> Result<Vec<RecipeSnapshot>> {
        match status {
            Some(RecipeStatus::Enabled) => self.only_enabled(),
            Some(RecipeStatus::Disabled) => self.only_disabled(),
            None => self.all_recipes(),
        }
    }

    /// Recipes whose stored signature still covers their latest revision.
    pub fn signed_recipes(&self) -> Result<Vec<RecipeSnapshot>> {
        Ok(self
            .all_recipes()?
            .into_iter()
            .filter(|s| s.valid_signature().is_some())
            .collect())
    }

    /// Flip the enabled flag. Enabling requires an approved latest revision.
    pub fn set_enabled(&self, recipe_id: u64, enabled: bool) -> Result<RecipeSnapshot> {
        let wt = self.db.begin_write().map_err(db_err)?;
        {
            let mut recipes = wt.open_table(RECIPES).map_err(db_err)?;
            let revisions = wt.open_table(REVISIONS).map_err(db_err)?;
            let approvals = wt.open_table(APPROVALS).map_err(db_err)?;
            let index = wt.open_table(REVISION_APPROVAL).map_err(db_err)?;

            let recipe: Recipe =
                get_by_id(&recipes, recipe_id)?.ok_or(RecipeError::RecipeNotFound(recipe_id))?;
            let mut snap = load_snapshot(&revisions, &approvals, &index, recipe)?;
            if enabled && !snap.is_approved() {
                return Err(RecipeError::InvalidTransition {
                    from: "disabled".to_string(),
                    to: "enabled".to_string(),
                    reason: format!(
                        "revision {} has not been approved",
                        snap.revision.id
                    ),
                });
            }
            snap.recipe.enabled = enabled;
            snap.recipe.last_updated = chrono::Utc::now();
            put_by_id(&mut recipes, recipe_id, &snap.recipe)?;
        }
        wt.commit().map_err(db_err)?;

        tracing::info!(recipe_id, enabled, "changed recipe enabled state");
        self.recipe(recipe_id)
    }

    /// Attach `signature` if `revision_id` is still the recipe's latest revision.
    pub fn set_recipe_signature(
        &self,
        recipe_id: u64,
        revision_id: u64,
        signature: Signature,
    ) -> Result<bool> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let stored = {
            let mut recipes = wt.open_table(RECIPES).map_err(db_err)?;
            let mut recipe: Recipe =
                get_by_id(&recipes, recipe_id)?.ok_or(RecipeError::RecipeNotFound(recipe_id))?;
            if recipe.latest_revision_id == revision_id {
                recipe.signature = Some(signature);
                put_by_id(&mut recipes, recipe_id, &recipe)?;
                true
            } else {
                false
            }
        };
        wt.commit().map_err(db_err)?;
        Ok(stored)
    }

    // -----------------------------------------------------------------------
    // Revisions
    // -----------------------------------------------------------------------

    /// Revisions of one recipe, newest first.
    pub fn history(&self, recipe_id: u64) -> Result<Vec<RevisionRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let recipes = rt.open_table(RECIPES).map_err(db_err)?;
        if recipes.get(recipe_id).map_err(db_err)?.is_none() {
            return Err(RecipeError::RecipeNotFound(recipe_id));
        }
        let history = rt.open_table(RECIPE_HISTORY).map_err(db_err)?;
        let revisions = rt.open_table(REVISIONS).map_err(db_err)?;
        let approvals = rt.open_table(APPROVALS).map_err(db_err)?;
        let index = rt.open_table(REVISION_APPROVAL).map_err(db_err)?;

        let mut ids = Vec::new();
        for entry in history
            .range((recipe_id, 0)..=(recipe_id, u64::MAX))
            .map_err(db_err)?
        {
            let (k, _) = entry.map_err(db_err)?;
            ids.push(k.value().1);
        }
        ids.reverse();

        ids.into_iter()
            .map(|id| {
                let revision: RecipeRevision =
                    get_by_id(&revisions, id)?.ok_or(RecipeError::RevisionNotFound(id))?;
                let approval = latest_approval(&approvals, &index, id)?;
                Ok(RevisionRecord { revision, approval })
            })
            .collect()
    }

    pub fn revision(&self, revision_id: u64) -> Result<RevisionRecord> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let revisions = rt.open_table(REVISIONS).map_err(db_err)?;
        let approvals = rt.open_table(APPROVALS).map_err(db_err)?;
        let index = rt.open_table(REVISION_APPROVAL).map_err(db_err)?;
        let revision: RecipeRevision = get_by_id(&revisions, revision_id)?
            .ok_or(RecipeError::RevisionNotFound(revision_id))?;
        let approval = latest_approval(&approvals, &index, revision_id)?;
        Ok(RevisionRecord { revision, approval })
    }

    pub fn revisions(&self) -> Result<Vec<RevisionRecord>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let revisions = rt.open_table(REVISIONS).map_err(db_err)?;
        let approvals = rt.open_table(APPROVALS).map_err(db_err)?;
        let index = rt.open_table(REVISION_APPROVAL).map_err(db_err)?;
        all_values::<RecipeRevision, _, _>(&revisions)?
            .into_iter()
            .map(|revision| {
                let approval = latest_approval(&approvals, &index, revision.id)?;
                Ok(RevisionRecord { revision, approval })
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Approval requests
    // -----------------------------------------------------------------------

    /// File a pending request. Fails with a conflict while another pending or
    /// approved request exists for the same revision.
    pub fn request_approval(
        &self,
        revision_id: u64,
        creator: Option<String>,
    ) -> Result<ApprovalRequest> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let request_id = next_id(&wt, APPROVAL_SEQ)?;
        let request = {
            let revisions = wt.open_table(REVISIONS).map_err(db_err)?;
            if revisions.get(revision_id).map_err(db_err)?.is_none() {
                return Err(RecipeError::RevisionNotFound(revision_id));
            }

            let mut approvals = wt.open_table(APPROVALS).map_err(db_err)?;
            let mut index = wt.open_table(REVISION_APPROVAL).map_err(db_err)?;
            if let Some(existing) = latest_approval(&approvals, &index, revision_id)? {
                if existing.status.is_active() {
                    return Err(RecipeError::ApprovalConflict(format!(
                        "revision {revision_id} already has a {} approval request ({})",
                        existing.status, existing.id
                    )));
                }
            }

            let request = ApprovalRequest::new(request_id, revision_id, creator);
            put_by_id(&mut approvals, request_id, &request)?;
            index.insert(revision_id, request_id).map_err(db_err)?;
            request
        };
        wt.commit().map_err(db_err)?;

        tracing::info!(request_id, revision_id, "approval requested");
        Ok(request)
    }

    /// Apply a decision to a request inside one write transaction.
    ///
    /// `decide` receives the request and, when the request's revision is
    /// still the recipe's latest, that revision. A signature it returns is
    /// stored on the recipe in the same transaction.
    pub fn decide_approval<F>(&self, request_id: u64, decide: F) -> Result<ApprovalRequest>
    where
        F: FnOnce(&mut ApprovalRequest, Option<&RecipeRevision>) -> Result<Option<Signature>>,
    {
        let wt = self.db.begin_write().map_err(db_err)?;
        let request = {
            let mut approvals = wt.open_table(APPROVALS).map_err(db_err)?;
            let mut request: ApprovalRequest = get_by_id(&approvals, request_id)?
                .ok_or(RecipeError::ApprovalRequestNotFound(request_id))?;

            let revisions = wt.open_table(REVISIONS).map_err(db_err)?;
            let revision: RecipeRevision = get_by_id(&revisions, request.revision_id)?
                .ok_or(RecipeError::RevisionNotFound(request.revision_id))?;

            let mut recipes = wt.open_table(RECIPES).map_err(db_err)?;
            let mut recipe: Recipe = get_by_id(&recipes, revision.recipe_id)?
                .ok_or(RecipeError::RecipeNotFound(revision.recipe_id))?;
            let is_latest = recipe.latest_revision_id == revision.id;

            let signature = decide(&mut request, is_latest.then_some(&revision))?;
            put_by_id(&mut approvals, request_id, &request)?;

            if let Some(signature) = signature.filter(|_| is_latest) {
                recipe.signature = Some(signature);
                put_by_id(&mut recipes, recipe.id, &recipe)?;
                tracing::info!(
                    recipe_id = recipe.id,
                    revision_id = revision.id,
                    "signed recipe"
                );
            }
            request
        };
        wt.commit().map_err(db_err)?;

        tracing::info!(
            request_id,
            revision_id = request.revision_id,
            status = %request.status,
            "approval request decided"
        );
        Ok(request)
    }

    /// Delete a pending request so the revision can be re-submitted.
    pub fn close_approval(&self, request_id: u64) -> Result<ApprovalRequest> {
        let wt = self.db.begin_write().map_err(db_err)?;
        let request = {
            let mut approvals = wt.open_table(APPROVALS).map_err(db_err)?;
            let request: ApprovalRequest = get_by_id(&approvals, request_id)?
                .ok_or(RecipeError::ApprovalRequestNotFound(request_id))?;
            request.ensure_closable()?;
            approvals.remove(request_id).map_err(db_err)?;

            let mut index = wt.open_table(REVISION_APPROVAL).map_err(db_err)?;
            let points_here = index
                .get(request.revision_id)
                .map_err(db_err)?
                .is_some_and(|g| g.value() == request_id);
            if points_here {
                index.remove(request.revision_id).map_err(db_err)?;
            }
            request
        };
        wt.commit().map_err(db_err)?;

        tracing::info!(request_id, revision_id = request.revision_id, "approval request closed");
        Ok(request)
    }

    pub fn approval_request(&self, request_id: u64) -> Result<ApprovalRequest> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let approvals = rt.open_table(APPROVALS).map_err(db_err)?;
        get_by_id(&approvals, request_id)?.ok_or(RecipeError::ApprovalRequestNotFound(request_id))
    }

    pub fn approval_requests(&self) -> Result<Vec<ApprovalRequest>> {
        let rt = self.db.begin_read().map_err(db_err)?;
        let approvals = rt.open_table(APPROVALS).map_err(db_err)?;
        all_values::<ApprovalRequest, _, _>(&approvals)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LookupEntry, LookupsConfig};
    use crate::types::ApprovalStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        let entry = |code: &str| LookupEntry {
            code: code.to_string(),
            name: code.to_uppercase(),
        };
        store
            .sync_lookups(&LookupsConfig {
                channels: vec![entry("beta"), entry("release")],
                locales: vec![entry("en-US")],
                countries: vec![entry("US"), entry("DE")],
            })
            .unwrap();
        store
            .upsert_action(
                Action::new("console-log", "console.log(x)", json!({"required": ["message"]}))
                    .unwrap(),
            )
            .unwrap();
        (dir, store)
    }

    fn fields(name: &str) -> RecipeFields {
        RecipeFields {
            name: Some(name.to_string()),
            action: Some("console-log".to_string()),
            arguments: Some(json!({"message": "hi"})),
            channels: Some(vec!["beta".to_string()]),
            ..Default::default()
        }
    }

    fn approve(store: &Store, request_id: u64) -> Result<ApprovalRequest> {
        store.decide_approval(request_id, |req, _| {
            req.approve(Some("bob".into()), None, true)?;
            Ok(None)
        })
    }

    #[test]
    fn create_and_load_recipe() {
        let (_dir, store) = open_tmp();
        let snap = store.create_recipe(fields("X"), Some("alice".into())).unwrap();
        assert_eq!(snap.revision.name, "X");
        assert_eq!(snap.recipe.latest_revision_id, snap.revision.id);
        assert!(!snap.is_approved());

        let loaded = store.recipe(snap.id()).unwrap();
        assert_eq!(loaded.revision.user.as_deref(), Some("alice"));
    }

    #[test]
    fn unknown_recipe_is_not_found() {
        let (_dir, store) = open_tmp();
        assert!(matches!(store.recipe(42), Err(RecipeError::RecipeNotFound(42))));
        assert!(matches!(
            store.update_recipe(42, RecipeFields::default(), None),
            Err(RecipeError::RecipeNotFound(42))
        ));
        assert!(matches!(store.history(42), Err(RecipeError::RecipeNotFound(42))));
    }

    #[test]
    fn validation_failures_leave_nothing_behind() {
        let (_dir, store) = open_tmp();
        let mut bad = fields("X");
        bad.action = Some("nope".into());
        assert!(matches!(
            store.create_recipe(bad, None),
            Err(RecipeError::Validation { ref field, .. }) if field == "action"
        ));

        let mut bad = fields("X");
        bad.countries = Some(vec!["FR".into()]);
        assert!(store.create_recipe(bad, None).is_err());

        let mut bad = fields("X");
        bad.arguments = Some(json!({}));
        assert!(store.create_recipe(bad, None).is_err());

        assert!(store.all_recipes().unwrap().is_empty());
        assert!(store.revisions().unwrap().is_empty());
        // the aborted transactions did not consume ids
        let snap = store.create_recipe(fields("ok"), None).unwrap();
        assert_eq!(snap.id(), 1);
        assert_eq!(snap.revision.id, 1);
    }

    #[test]
    fn update_appends_exactly_one_revision() {
        let (_dir, store) = open_tmp();
        let snap = store.create_recipe(fields("X"), None).unwrap();
        let updated = store
            .update_recipe(
                snap.id(),
                RecipeFields {
                    name: Some("Y".into()),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert_eq!(updated.id(), snap.id());
        assert_eq!(updated.revision.name, "Y");
        assert_eq!(updated.revision.parent_id, Some(snap.revision.id));
        assert_eq!(updated.revision.channels, vec!["beta"]);
        assert_eq!(updated.revision.arguments, json!({"message": "hi"}));

        let history = store.history(snap.id()).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].revision.name, "Y");
        assert_eq!(history[1].revision.name, "X");
        // old revision untouched
        assert_eq!(store.revision(snap.revision.id).unwrap().revision.name, "X");
    }

    #[test]
    fn failed_update_keeps_pointer() {
        let (_dir, store) = open_tmp();
        let snap = store.create_recipe(fields("X"), None).unwrap();
        let bad = RecipeFields {
            channels: Some(vec!["aurora".into()]),
            ..Default::default()
        };
        assert!(store.update_recipe(snap.id(), bad, None).is_err());
        let loaded = store.recipe(snap.id()).unwrap();
        assert_eq!(loaded.recipe.latest_revision_id, snap.revision.id);
        assert_eq!(store.history(snap.id()).unwrap().len(), 1);
    }

    #[test]
    fn one_active_request_per_revision() {
        let (_dir, store) = open_tmp();
        let snap = store.create_recipe(fields("X"), None).unwrap();
        let first = store
            .request_approval(snap.revision.id, Some("alice".into()))
            .unwrap();
        assert!(matches!(
            store.request_approval(snap.revision.id, None),
            Err(RecipeError::ApprovalConflict(_))
        ));

        store
            .decide_approval(first.id, |req, _| {
                req.reject(Some("bob".into()), None, true)?;
                Ok(None)
            })
            .unwrap();
        let second = store.request_approval(snap.revision.id, None).unwrap();
        assert_eq!(second.status, ApprovalStatus::Pending);
        assert_eq!(
            store.revision(snap.revision.id).unwrap().approval.unwrap().id,
            second.id
        );
    }

    #[test]
    fn request_for_unknown_revision_is_not_found() {
        let (_dir, store) = open_tmp();
        assert!(matches!(
            store.request_approval(9, None),
            Err(RecipeError::RevisionNotFound(9))
        ));
    }

    #[test]
    fn second_approval_conflicts() {
        let (_dir, store) = open_tmp();
        let snap = store.create_recipe(fields("X"), None).unwrap();
        let req = store
            .request_approval(snap.revision.id, Some("alice".into()))
            .unwrap();
        approve(&store, req.id).unwrap();
        assert!(matches!(
            approve(&store, req.id),
            Err(RecipeError::ApprovalConflict(_))
        ));
    }

    #[test]
    fn concurrent_approvals_exactly_one_wins() {
        let (_dir, store) = open_tmp();
        let snap = store.create_recipe(fields("X"), None).unwrap();
        let req = store
            .request_approval(snap.revision.id, Some("alice".into()))
            .unwrap();

        let store = std::sync::Arc::new(store);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || approve(&store, req.id))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, RecipeError::ApprovalConflict(_))));
    }

    #[test]
    fn close_frees_the_revision() {
        let (_dir, store) = open_tmp();
        let snap = store.create_recipe(fields("X"), None).unwrap();
        let req = store.request_approval(snap.revision.id, None).unwrap();
        store.close_approval(req.id).unwrap();
        assert!(matches!(
            store.approval_request(req.id),
            Err(RecipeError::ApprovalRequestNotFound(_))
        ));
        assert!(store.revision(snap.revision.id).unwrap().approval.is_none());
        store.request_approval(snap.revision.id, None).unwrap();
    }

    #[test]
    fn enable_requires_approval() {
        let (_dir, store) = open_tmp();
        let snap = store.create_recipe(fields("X"), None).unwrap();
        assert!(matches!(
            store.set_enabled(snap.id(), true),
            Err(RecipeError::InvalidTransition { .. })
        ));

        let req = store
            .request_approval(snap.revision.id, Some("alice".into()))
            .unwrap();
        approve(&store, req.id).unwrap();
        let enabled = store.set_enabled(snap.id(), true).unwrap();
        assert!(enabled.is_enabled());
        assert_eq!(store.only_enabled().unwrap().len(), 1);
        assert!(store.only_disabled().unwrap().is_empty());

        // an edit takes the recipe out of service until re-approved
        store
            .update_recipe(
                snap.id(),
                RecipeFields {
                    name: Some("Y".into()),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        assert!(store.only_enabled().unwrap().is_empty());
        assert_eq!(
            store.recipes_with_status(Some(RecipeStatus::Disabled)).unwrap().len(),
            1
        );
    }

    #[test]
    fn upsert_action_is_idempotent_for_same_content() {
        let (_dir, store) = open_tmp();
        let again = Action::new("console-log", "console.log(x)", json!({"required": ["message"]}))
            .unwrap();
        let (_, replaced) = store.upsert_action(again).unwrap();
        assert!(!replaced);

        let changed = Action::new("console-log", "console.log(y)", json!({})).unwrap();
        let hash = changed.implementation_hash.clone();
        let (stored, replaced) = store.upsert_action(changed).unwrap();
        assert!(replaced);
        assert_eq!(store.action("console-log").unwrap().implementation_hash, hash);
        assert!(stored.signature.is_none());
    }

    #[test]
    fn stale_action_signature_is_not_stored() {
        let (_dir, store) = open_tmp();
        let signer = crate::signing::Signer::generate();
        let sig = signer.sign(b"something else");
        assert!(!store.set_action_signature("console-log", sig).unwrap());

        let action = store.action("console-log").unwrap();
        let sig = signer.sign(&action.canonical_bytes());
        assert!(store.set_action_signature("console-log", sig).unwrap());
        assert_eq!(store.signed_actions().unwrap().len(), 1);
    }

    #[test]
    fn lookups_are_replaced_on_sync() {
        let (_dir, store) = open_tmp();
        assert_eq!(store.lookups().unwrap().len(), 5);
        store
            .sync_lookups(&LookupsConfig {
                channels: vec![LookupEntry {
                    code: "nightly".into(),
                    name: "Nightly".into(),
                }],
                ..Default::default()
            })
            .unwrap();
        let lookups = store.lookups().unwrap();
        assert_eq!(lookups.len(), 1);
        assert_eq!(lookups[0].code, "nightly");
    }
}
