use crate::error::{RecipeError, Result};
use crate::types::ApprovalStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A request to approve one recipe revision.
///
/// Transitions: `pending → approved | rejected`. Both outcomes are final;
/// a pending request can also be closed (deleted) by the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: u64,
    pub revision_id: u64,
    pub status: ApprovalStatus,
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl ApprovalRequest {
    pub fn new(id: u64, revision_id: u64, creator: Option<String>) -> Self {
        Self {
            id,
            revision_id,
            status: ApprovalStatus::Pending,
            creator,
            approver: None,
            comment: None,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == ApprovalStatus::Approved
    }

    pub fn approve(
        &mut self,
        approver: Option<String>,
        comment: Option<String>,
        peer_enforced: bool,
    ) -> Result<()> {
        self.decide(ApprovalStatus::Approved, approver, comment, peer_enforced)
    }

    pub fn reject(
        &mut self,
        approver: Option<String>,
        comment: Option<String>,
        peer_enforced: bool,
    ) -> Result<()> {
        self.decide(ApprovalStatus::Rejected, approver, comment, peer_enforced)
    }

    /// Only a pending request may be closed.
    pub fn ensure_closable(&self) -> Result<()> {
        if self.status == ApprovalStatus::Pending {
            Ok(())
        } else {
            Err(RecipeError::InvalidTransition {
                from: self.status.to_string(),
                to: "closed".to_string(),
                reason: "only pending approval requests can be closed".to_string(),
            })
        }
    }

    fn decide(
        &mut self,
        outcome: ApprovalStatus,
        approver: Option<String>,
        comment: Option<String>,
        peer_enforced: bool,
    ) -> Result<()> {
        if self.status != ApprovalStatus::Pending {
            return Err(RecipeError::ApprovalConflict(format!(
                "approval request {} is already {}",
                self.id, self.status
            )));
        }
        if peer_enforced {
            if approver.is_none() {
                return Err(RecipeError::PermissionDenied(
                    "an approver identity is required".to_string(),
                ));
            }
            if approver == self.creator {
                return Err(RecipeError::PermissionDenied(
                    "you cannot approve or reject your own approval request".to_string(),
                ));
            }
        }
        self.status = outcome;
        self.approver = approver;
        self.comment = comment;
        self.decided_at = Some(Utc::now());
        Ok(())
    }
}
