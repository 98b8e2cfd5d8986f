//! Review store abstractions and in-memory backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prbot_core::{
    CredentialResolver, NewReview, Review, ReviewError, ReviewResult, ReviewStatus,
    ReviewerChange, StatusChange,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

mod sqlite;

pub use sqlite::SqliteReviewStore;

/// Result type for review store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by store implementations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("review '{0}' already exists")]
    DuplicateCorrelationKey(String),
    #[error("review '{0}' not found")]
    ReviewNotFound(String),
    #[error("workspace '{0}' not found")]
    WorkspaceNotFound(String),
    #[error(transparent)]
    Rejected(#[from] ReviewError),
    #[error("invalid persisted value for '{field}': {value}")]
    InvalidPersistedValue { field: &'static str, value: String },
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Chrono(#[from] chrono::ParseError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<StoreError> for ReviewError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::DuplicateCorrelationKey(key) => {
                ReviewError::Validation(format!("correlation key '{key}' is already in use"))
            }
            StoreError::ReviewNotFound(key) => ReviewError::NotFound(key),
            StoreError::WorkspaceNotFound(team_id) => {
                ReviewError::NotFound(format!("workspace {team_id}"))
            }
            StoreError::Rejected(inner) => inner,
            other => ReviewError::TransientStore(other.to_string()),
        }
    }
}

/// Installed chat workspace and its bot credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub team_id: String,
    pub team_name: String,
    pub access_token: String,
    pub bot_user_id: String,
}

/// Async store contract used by the intake path and the escalation scheduler.
///
/// Mutations are atomic per correlation key: implementations apply the review
/// state machine inside a single critical section or transaction.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Persists a pending review. Fails when the correlation key is taken.
    async fn create_review(&self, review: NewReview) -> StoreResult<Review>;
    async fn get_by_correlation_key(&self, correlation_key: &str) -> StoreResult<Review>;
    async fn add_reviewer(&self, correlation_key: &str, user_id: &str)
        -> StoreResult<ReviewerChange>;
    async fn update_status(
        &self,
        correlation_key: &str,
        status: ReviewStatus,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<StatusChange>;
    /// Snapshot of every review still awaiting approval, oldest first.
    async fn list_pending(&self) -> StoreResult<Vec<Review>>;
}

/// Workspace registry. The engine only reads from it.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn upsert_workspace(&self, workspace: Workspace) -> StoreResult<()>;
    async fn get_workspace(&self, team_id: &str) -> StoreResult<Workspace>;
}

/// In-memory implementation for tests and local experimentation.
#[derive(Debug, Default)]
pub struct InMemoryReviewStore {
    inner: RwLock<StoreInner>,
}

#[derive(Debug, Default)]
struct StoreInner {
    next_id: i64,
    reviews: HashMap<String, Review>,
    workspaces: HashMap<String, Workspace>,
}

impl InMemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewStore for InMemoryReviewStore {
    async fn create_review(&self, review: NewReview) -> StoreResult<Review> {
        review.validate()?;
        let mut inner = self.inner.write().await;
        if inner.reviews.contains_key(&review.correlation_key) {
            return Err(StoreError::DuplicateCorrelationKey(review.correlation_key));
        }
        inner.next_id = inner.next_id.saturating_add(1);
        let created = Review::from_new(inner.next_id, review);
        inner
            .reviews
            .insert(created.correlation_key.clone(), created.clone());
        Ok(created)
    }

    async fn get_by_correlation_key(&self, correlation_key: &str) -> StoreResult<Review> {
        let inner = self.inner.read().await;
        inner
            .reviews
            .get(correlation_key)
            .cloned()
            .ok_or_else(|| StoreError::ReviewNotFound(correlation_key.to_string()))
    }

    async fn add_reviewer(
        &self,
        correlation_key: &str,
        user_id: &str,
    ) -> StoreResult<ReviewerChange> {
        let mut inner = self.inner.write().await;
        let review = inner
            .reviews
            .get_mut(correlation_key)
            .ok_or_else(|| StoreError::ReviewNotFound(correlation_key.to_string()))?;
        Ok(review.add_reviewer(user_id))
    }

    async fn update_status(
        &self,
        correlation_key: &str,
        status: ReviewStatus,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<StatusChange> {
        let mut inner = self.inner.write().await;
        let review = inner
            .reviews
            .get_mut(correlation_key)
            .ok_or_else(|| StoreError::ReviewNotFound(correlation_key.to_string()))?;
        Ok(review.transition_to(status, actor_id, at)?)
    }

    async fn list_pending(&self) -> StoreResult<Vec<Review>> {
        let inner = self.inner.read().await;
        let mut pending = inner
            .reviews
            .values()
            .filter(|review| review.status() == ReviewStatus::Pending)
            .cloned()
            .collect::<Vec<_>>();
        pending.sort_by(|left, right| {
            left.created_at
                .cmp(&right.created_at)
                .then(left.id.cmp(&right.id))
        });
        Ok(pending)
    }
}

#[async_trait]
impl WorkspaceStore for InMemoryReviewStore {
    async fn upsert_workspace(&self, workspace: Workspace) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .workspaces
            .insert(workspace.team_id.clone(), workspace);
        Ok(())
    }

    async fn get_workspace(&self, team_id: &str) -> StoreResult<Workspace> {
        let inner = self.inner.read().await;
        inner
            .workspaces
            .get(team_id)
            .cloned()
            .ok_or_else(|| StoreError::WorkspaceNotFound(team_id.to_string()))
    }
}

#[async_trait]
impl CredentialResolver for InMemoryReviewStore {
    async fn resolve_credential(&self, team_id: &str) -> ReviewResult<String> {
        Ok(self.get_workspace(team_id).await?.access_token)
    }
}
