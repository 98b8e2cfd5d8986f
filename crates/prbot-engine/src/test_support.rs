//! Shared fakes for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use prbot_core::{
    GatewayError, GatewayResult, MessagingGateway, NewReview, OutboundMessage, Review,
    ReviewStatus, ReviewerChange, ReviewerSet, StatusChange,
};
use prbot_store::{InMemoryReviewStore, ReviewStore, StoreError, StoreResult};

pub(crate) fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap()
}

pub(crate) fn new_review(key: &str, created_hours_ago: i64) -> NewReview {
    NewReview {
        pr_url: format!("https://github.com/acme/api/pull/{key}"),
        description: "tighten retry policy".to_string(),
        channel_id: "C1".to_string(),
        correlation_key: key.to_string(),
        reviewers: ["U1", "U2"].into_iter().collect(),
        team_id: "T1".to_string(),
        created_at: base_time() - Duration::hours(created_hours_ago),
    }
}

pub(crate) fn pending_review(key: &str, created_hours_ago: i64) -> Review {
    Review::from_new(1, new_review(key, created_hours_ago))
}

#[derive(Debug, Clone)]
pub(crate) struct PostedMessage {
    pub(crate) team_id: String,
    pub(crate) message: OutboundMessage,
}

#[derive(Debug, Default)]
struct GatewayState {
    next_ts: u64,
    posted: Vec<PostedMessage>,
    reactions: HashMap<(String, String), ReviewerSet>,
    reaction_lookups: usize,
    failing_reactions: HashSet<String>,
    failing_posts: HashSet<String>,
    display_names: HashMap<String, String>,
}

/// In-memory gateway that records posts and serves canned reactions.
#[derive(Debug, Default)]
pub(crate) struct RecordingGateway {
    state: Mutex<GatewayState>,
}

impl RecordingGateway {
    pub(crate) fn set_reaction_users(&self, key: &str, reaction: &str, users: &[&str]) {
        let mut state = self.state.lock().expect("gateway state");
        state.reactions.insert(
            (key.to_string(), reaction.to_string()),
            users.iter().copied().collect(),
        );
    }

    pub(crate) fn fail_reactions_for(&self, key: &str) {
        let mut state = self.state.lock().expect("gateway state");
        state.failing_reactions.insert(key.to_string());
    }

    /// Fails posts whose thread key or channel equals `target`.
    pub(crate) fn fail_posts_for(&self, target: &str) {
        let mut state = self.state.lock().expect("gateway state");
        state.failing_posts.insert(target.to_string());
    }

    pub(crate) fn set_display_name(&self, user_id: &str, name: &str) {
        let mut state = self.state.lock().expect("gateway state");
        state
            .display_names
            .insert(user_id.to_string(), name.to_string());
    }

    pub(crate) fn posted(&self) -> Vec<PostedMessage> {
        self.state.lock().expect("gateway state").posted.clone()
    }

    pub(crate) fn posted_in_thread(&self, key: &str) -> Vec<PostedMessage> {
        self.posted()
            .into_iter()
            .filter(|posted| posted.message.thread_key.as_deref() == Some(key))
            .collect()
    }

    pub(crate) fn reaction_lookups(&self) -> usize {
        self.state.lock().expect("gateway state").reaction_lookups
    }
}

#[async_trait]
impl MessagingGateway for RecordingGateway {
    async fn post_message(&self, team_id: &str, message: &OutboundMessage) -> GatewayResult<String> {
        let mut state = self.state.lock().expect("gateway state");
        let thread_failing = message
            .thread_key
            .as_ref()
            .is_some_and(|key| state.failing_posts.contains(key));
        if thread_failing || state.failing_posts.contains(&message.channel_id) {
            return Err(GatewayError::Request {
                operation: "chat.postMessage",
                message: "status 500".to_string(),
            });
        }
        state.next_ts = state.next_ts.saturating_add(1);
        state.posted.push(PostedMessage {
            team_id: team_id.to_string(),
            message: message.clone(),
        });
        Ok(format!("1714554000.{:06}", state.next_ts))
    }

    async fn get_reaction_users(
        &self,
        _team_id: &str,
        _channel_id: &str,
        correlation_key: &str,
        reaction: &str,
    ) -> GatewayResult<ReviewerSet> {
        let mut state = self.state.lock().expect("gateway state");
        state.reaction_lookups = state.reaction_lookups.saturating_add(1);
        if state.failing_reactions.contains(correlation_key) {
            return Err(GatewayError::Request {
                operation: "reactions.get",
                message: "status 503".to_string(),
            });
        }
        Ok(state
            .reactions
            .get(&(correlation_key.to_string(), reaction.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn user_display_name(&self, _team_id: &str, user_id: &str) -> GatewayResult<String> {
        let state = self.state.lock().expect("gateway state");
        state
            .display_names
            .get(user_id)
            .cloned()
            .ok_or_else(|| GatewayError::Request {
                operation: "users.info",
                message: "user_not_found".to_string(),
            })
    }
}

/// Store wrapper that injects persistence failures for chosen keys.
#[derive(Debug, Default)]
pub(crate) struct FlakyStore {
    inner: InMemoryReviewStore,
    failing_keys: Mutex<HashSet<String>>,
    fail_listing: Mutex<bool>,
}

impl FlakyStore {
    pub(crate) fn fail_key(&self, key: &str) {
        self.failing_keys
            .lock()
            .expect("failing keys")
            .insert(key.to_string());
    }

    pub(crate) fn fail_listing(&self) {
        *self.fail_listing.lock().expect("fail listing") = true;
    }

    fn check(&self, key: &str) -> StoreResult<()> {
        if self.failing_keys.lock().expect("failing keys").contains(key) {
            return Err(StoreError::Io(std::io::Error::other("disk I/O error")));
        }
        Ok(())
    }
}

#[async_trait]
impl ReviewStore for FlakyStore {
    async fn create_review(&self, review: NewReview) -> StoreResult<Review> {
        self.inner.create_review(review).await
    }

    async fn get_by_correlation_key(&self, correlation_key: &str) -> StoreResult<Review> {
        self.check(correlation_key)?;
        self.inner.get_by_correlation_key(correlation_key).await
    }

    async fn add_reviewer(
        &self,
        correlation_key: &str,
        user_id: &str,
    ) -> StoreResult<ReviewerChange> {
        self.check(correlation_key)?;
        self.inner.add_reviewer(correlation_key, user_id).await
    }

    async fn update_status(
        &self,
        correlation_key: &str,
        status: ReviewStatus,
        actor_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<StatusChange> {
        self.check(correlation_key)?;
        self.inner
            .update_status(correlation_key, status, actor_id, at)
            .await
    }

    async fn list_pending(&self) -> StoreResult<Vec<Review>> {
        if *self.fail_listing.lock().expect("fail listing") {
            return Err(StoreError::Io(std::io::Error::other("database is locked")));
        }
        self.inner.list_pending().await
    }
}
