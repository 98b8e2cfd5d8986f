//! Review entity and the state machine governing its transitions.
//!
//! A review starts `Pending` and can only move to `Approved`. The approval
//! record carries both the approver and the approval time, so the presence of
//! approval metadata and the `Approved` status cannot drift apart.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ReviewError, ReviewResult};

/// Lifecycle state for a review request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
}

impl ReviewStatus {
    /// Returns true when moving from `self` to `next` is permitted.
    pub fn can_transition_to(self, next: Self) -> bool {
        if self == next {
            return true;
        }
        matches!((self, next), (Self::Pending, Self::Approved))
    }

    pub fn ensure_transition(self, next: Self) -> ReviewResult<()> {
        if self.can_transition_to(next) {
            return Ok(());
        }
        Err(ReviewError::Validation(format!(
            "invalid review status transition: {} -> {}",
            self.as_str(),
            next.as_str()
        )))
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Approved)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
        }
    }
}

/// Set of reviewer identifiers. Membership only grows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReviewerSet(BTreeSet<String>);

impl ReviewerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `user_id`, returning false when it was already present.
    /// Blank identifiers are ignored.
    pub fn insert(&mut self, user_id: impl Into<String>) -> bool {
        let user_id = user_id.into();
        let trimmed = user_id.trim();
        if trimmed.is_empty() {
            return false;
        }
        self.0.insert(trimmed.to_string())
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.0.contains(user_id.trim())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for ReviewerSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = Self::new();
        for user_id in iter {
            set.insert(user_id);
        }
        set
    }
}

impl<'a> IntoIterator for &'a ReviewerSet {
    type Item = &'a String;
    type IntoIter = std::collections::btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Who approved a review and when.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Approval {
    pub approved_by: String,
    pub approved_at: DateTime<Utc>,
}

/// Outcome of [`Review::add_reviewer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewerChange {
    Added,
    AlreadyPresent,
}

/// Outcome of [`Review::approve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalChange {
    Approved,
    AlreadyApproved,
}

/// Outcome of [`Review::transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Changed,
    Unchanged,
}

/// Creation payload for a review; the store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub pr_url: String,
    pub description: String,
    pub channel_id: String,
    pub correlation_key: String,
    pub reviewers: ReviewerSet,
    pub team_id: String,
    pub created_at: DateTime<Utc>,
}

impl NewReview {
    pub fn validate(&self) -> ReviewResult<()> {
        for (field, value) in [
            ("pr_url", &self.pr_url),
            ("channel_id", &self.channel_id),
            ("correlation_key", &self.correlation_key),
            ("team_id", &self.team_id),
        ] {
            if value.trim().is_empty() {
                return Err(ReviewError::Validation(format!("{field} must not be empty")));
            }
        }
        Ok(())
    }
}

/// A tracked code change awaiting approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Review {
    pub id: i64,
    pub pr_url: String,
    pub description: String,
    pub channel_id: String,
    pub correlation_key: String,
    pub reviewers: ReviewerSet,
    pub team_id: String,
    pub created_at: DateTime<Utc>,
    approval: Option<Approval>,
}

impl Review {
    /// Builds a pending review from its creation payload.
    pub fn from_new(id: i64, new: NewReview) -> Self {
        Self {
            id,
            pr_url: new.pr_url,
            description: new.description,
            channel_id: new.channel_id,
            correlation_key: new.correlation_key,
            reviewers: new.reviewers,
            team_id: new.team_id,
            created_at: new.created_at,
            approval: None,
        }
    }

    /// Rehydrates a review from persisted parts.
    pub fn restore(id: i64, new: NewReview, approval: Option<Approval>) -> Self {
        Self {
            approval,
            ..Self::from_new(id, new)
        }
    }

    pub fn status(&self) -> ReviewStatus {
        if self.approval.is_some() {
            ReviewStatus::Approved
        } else {
            ReviewStatus::Pending
        }
    }

    pub fn approval(&self) -> Option<&Approval> {
        self.approval.as_ref()
    }

    /// Adds a reviewer. Permitted in any state.
    pub fn add_reviewer(&mut self, user_id: &str) -> ReviewerChange {
        if self.reviewers.insert(user_id) {
            ReviewerChange::Added
        } else {
            ReviewerChange::AlreadyPresent
        }
    }

    /// Marks the review approved. A second approval keeps the first record.
    pub fn approve(&mut self, approver_id: &str, at: DateTime<Utc>) -> ApprovalChange {
        if self.approval.is_some() {
            return ApprovalChange::AlreadyApproved;
        }
        self.approval = Some(Approval {
            approved_by: approver_id.trim().to_string(),
            approved_at: at,
        });
        ApprovalChange::Approved
    }

    /// Applies a requested status change through the transition table.
    pub fn transition_to(
        &mut self,
        next: ReviewStatus,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> ReviewResult<StatusChange> {
        self.status().ensure_transition(next)?;
        match next {
            ReviewStatus::Approved => match self.approve(actor_id, at) {
                ApprovalChange::Approved => Ok(StatusChange::Changed),
                ApprovalChange::AlreadyApproved => Ok(StatusChange::Unchanged),
            },
            ReviewStatus::Pending => Ok(StatusChange::Unchanged),
        }
    }
}
