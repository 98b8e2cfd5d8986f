//! SQLite-backed `ReviewStore` implementation with durable persistence.

use crate::{ReviewStore, StoreError, StoreResult, Workspace, WorkspaceStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prbot_core::{
    Approval, CredentialResolver, NewReview, Review, ReviewResult, ReviewStatus, ReviewerChange,
    ReviewerSet, StatusChange,
};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::time::Duration;

const REVIEW_COLUMNS: &str = r#"
    id, pr_url, description, channel_id, correlation_key, reviewers_json, status,
    team_id, created_at, approved_at, approved_by
"#;

/// Persistent SQLite store backend for reviews and workspaces.
#[derive(Debug)]
pub struct SqliteReviewStore {
    db_path: PathBuf,
}

impl SqliteReviewStore {
    /// Creates a SQLite-backed store at `path`, creating schema if needed.
    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        let db_path = path.as_ref().to_path_buf();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { db_path };
        let connection = store.open_connection()?;
        store.initialize_schema(&connection)?;
        tracing::debug!(database = %store.db_path.display(), "review store schema ready");
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    fn open_connection(&self) -> StoreResult<Connection> {
        let connection = Connection::open(&self.db_path)?;
        connection.busy_timeout(Duration::from_secs(5))?;
        connection.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            "#,
        )?;
        Ok(connection)
    }

    fn initialize_schema(&self, connection: &Connection) -> StoreResult<()> {
        connection.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS pr_reviews (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pr_url TEXT NOT NULL,
                description TEXT NOT NULL,
                channel_id TEXT NOT NULL,
                correlation_key TEXT NOT NULL UNIQUE,
                reviewers_json TEXT NOT NULL,
                status TEXT NOT NULL,
                team_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                approved_at TEXT NULL,
                approved_by TEXT NULL,
                CHECK ((status = 'approved') = (approved_at IS NOT NULL AND approved_by IS NOT NULL))
            );

            CREATE INDEX IF NOT EXISTS idx_pr_reviews_status ON pr_reviews (status, created_at);

            CREATE TABLE IF NOT EXISTS workspaces (
                team_id TEXT PRIMARY KEY,
                team_name TEXT NOT NULL,
                access_token TEXT NOT NULL,
                bot_user_id TEXT NOT NULL,
                installed_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }
}

#[async_trait]
impl ReviewStore for SqliteReviewStore {
    async fn create_review(&self, review: NewReview) -> StoreResult<Review> {
        review.validate()?;
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let exists = transaction
            .query_row(
                "SELECT 1 FROM pr_reviews WHERE correlation_key = ?1",
                params![review.correlation_key],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::DuplicateCorrelationKey(review.correlation_key));
        }

        transaction.execute(
            r#"
            INSERT INTO pr_reviews (
                pr_url, description, channel_id, correlation_key, reviewers_json, status,
                team_id, created_at, approved_at, approved_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, NULL)
            "#,
            params![
                review.pr_url,
                review.description,
                review.channel_id,
                review.correlation_key,
                serde_json::to_string(&review.reviewers)?,
                ReviewStatus::Pending.as_str(),
                review.team_id,
                timestamp_to_db(review.created_at),
            ],
        )?;
        let id = transaction.last_insert_rowid();
        transaction.commit()?;

        Ok(Review::from_new(id, review))
    }

    async fn get_by_correlation_key(&self, correlation_key: &str) -> StoreResult<Review> {
        let connection = self.open_connection()?;
        load_review(&connection, correlation_key)?
            .ok_or_else(|| StoreError::ReviewNotFound(correlation_key.to_string()))
    }

    async fn add_reviewer(
        &self,
        correlation_key: &str,
        user_id: &str,
    ) -> StoreResult<ReviewerChange> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut review = load_review(&transaction, correlation_key)?
            .ok_or_else(|| StoreError::ReviewNotFound(correlation_key.to_string()))?;

        let change = review.add_reviewer(user_id);
        if change == ReviewerChange::Added {
            transaction.execute(
                "UPDATE pr_reviews SET reviewers_json = ?1 WHERE correlation_key = ?2",
                params![serde_json::to_string(&review.reviewers)?, correlation_key],
            )?;
        }
        transaction.commit()?;
        Ok(change)
    }

    async fn update_status(
        &self,
        correlation_key: &str,
        status: ReviewStatus,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<StatusChange> {
        let mut connection = self.open_connection()?;
        let transaction = connection.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut review = load_review(&transaction, correlation_key)?
            .ok_or_else(|| StoreError::ReviewNotFound(correlation_key.to_string()))?;

        let change = review.transition_to(status, actor_id, at)?;
        if change == StatusChange::Changed {
            let approval = review.approval();
            transaction.execute(
                r#"
                UPDATE pr_reviews
                SET status = ?1, approved_at = ?2, approved_by = ?3
                WHERE correlation_key = ?4
                "#,
                params![
                    review.status().as_str(),
                    approval.map(|value| timestamp_to_db(value.approved_at)),
                    approval.map(|value| value.approved_by.clone()),
                    correlation_key,
                ],
            )?;
        }
        transaction.commit()?;
        Ok(change)
    }

    async fn list_pending(&self) -> StoreResult<Vec<Review>> {
        let connection = self.open_connection()?;
        let mut statement = connection.prepare(&format!(
            "SELECT {REVIEW_COLUMNS} FROM pr_reviews WHERE status = ?1 ORDER BY created_at, id"
        ))?;
        let rows = statement
            .query_map(params![ReviewStatus::Pending.as_str()], ReviewRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ReviewRow::into_review).collect()
    }
}

#[async_trait]
impl WorkspaceStore for SqliteReviewStore {
    async fn upsert_workspace(&self, workspace: Workspace) -> StoreResult<()> {
        let connection = self.open_connection()?;
        connection.execute(
            r#"
            INSERT INTO workspaces (team_id, team_name, access_token, bot_user_id, installed_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(team_id) DO UPDATE SET
                team_name = excluded.team_name,
                access_token = excluded.access_token,
                bot_user_id = excluded.bot_user_id
            "#,
            params![
                workspace.team_id,
                workspace.team_name,
                workspace.access_token,
                workspace.bot_user_id,
                timestamp_to_db(Utc::now()),
            ],
        )?;
        Ok(())
    }

    async fn get_workspace(&self, team_id: &str) -> StoreResult<Workspace> {
        let connection = self.open_connection()?;
        connection
            .query_row(
                r#"
                SELECT team_id, team_name, access_token, bot_user_id
                FROM workspaces
                WHERE team_id = ?1
                "#,
                params![team_id],
                |row| {
                    Ok(Workspace {
                        team_id: row.get(0)?,
                        team_name: row.get(1)?,
                        access_token: row.get(2)?,
                        bot_user_id: row.get(3)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| StoreError::WorkspaceNotFound(team_id.to_string()))
    }
}

#[async_trait]
impl CredentialResolver for SqliteReviewStore {
    async fn resolve_credential(&self, team_id: &str) -> ReviewResult<String> {
        tracing::debug!(team_id, "resolving workspace credential");
        Ok(self.get_workspace(team_id).await?.access_token)
    }
}

struct ReviewRow {
    id: i64,
    pr_url: String,
    description: String,
    channel_id: String,
    correlation_key: String,
    reviewers_json: String,
    status: String,
    team_id: String,
    created_at: String,
    approved_at: Option<String>,
    approved_by: Option<String>,
}

impl ReviewRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            pr_url: row.get(1)?,
            description: row.get(2)?,
            channel_id: row.get(3)?,
            correlation_key: row.get(4)?,
            reviewers_json: row.get(5)?,
            status: row.get(6)?,
            team_id: row.get(7)?,
            created_at: row.get(8)?,
            approved_at: row.get(9)?,
            approved_by: row.get(10)?,
        })
    }

    fn into_review(self) -> StoreResult<Review> {
        let status = review_status_from_db(&self.status)?;
        let approval = match (status, self.approved_by, self.approved_at) {
            (ReviewStatus::Pending, _, _) => None,
            (ReviewStatus::Approved, Some(approved_by), Some(approved_at)) => Some(Approval {
                approved_by,
                approved_at: timestamp_from_db(&approved_at)?,
            }),
            (ReviewStatus::Approved, _, _) => {
                return Err(StoreError::InvalidPersistedValue {
                    field: "approved_at",
                    value: format!("missing approval metadata for {}", self.correlation_key),
                })
            }
        };
        let reviewers: ReviewerSet = serde_json::from_str(&self.reviewers_json)?;
        Ok(Review::restore(
            self.id,
            NewReview {
                pr_url: self.pr_url,
                description: self.description,
                channel_id: self.channel_id,
                correlation_key: self.correlation_key,
                reviewers,
                team_id: self.team_id,
                created_at: timestamp_from_db(&self.created_at)?,
            },
            approval,
        ))
    }
}

fn load_review(connection: &Connection, correlation_key: &str) -> StoreResult<Option<Review>> {
    connection
        .query_row(
            &format!("SELECT {REVIEW_COLUMNS} FROM pr_reviews WHERE correlation_key = ?1"),
            params![correlation_key],
            ReviewRow::from_row,
        )
        .optional()?
        .map(ReviewRow::into_review)
        .transpose()
}

fn timestamp_to_db(value: DateTime<Utc>) -> String {
    value.to_rfc3339()
}

fn timestamp_from_db(value: &str) -> StoreResult<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn review_status_from_db(value: &str) -> StoreResult<ReviewStatus> {
    match value {
        "pending" => Ok(ReviewStatus::Pending),
        "approved" => Ok(ReviewStatus::Approved),
        _ => Err(StoreError::InvalidPersistedValue {
            field: "review_status",
            value: value.to_string(),
        }),
    }
}
