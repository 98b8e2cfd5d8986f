//! Entry points that turn chat activity into review state transitions.

use std::sync::Arc;

use prbot_core::{
    Clock, MessageSection, MessagingGateway, NewReview, OutboundMessage, Review, ReviewError,
    ReviewResult, ReviewStatus, ReviewerChange, ReviewerSet, StatusChange,
};
use prbot_store::ReviewStore;
use serde::Serialize;

use crate::signal::ReviewSignal;

const ANNOUNCEMENT_FALLBACK_TEXT: &str = "New PR Review Request";

/// A review request as captured by the submission form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitReview {
    pub pr_url: String,
    pub description: String,
    pub channel_id: String,
    pub reviewer_ids: Vec<String>,
    pub team_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReactionEvent {
    pub team_id: String,
    pub channel_id: String,
    /// Timestamp of the message the reaction was added to.
    pub correlation_key: String,
    pub user_id: String,
    pub reaction: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReactionOutcome {
    /// Reaction name carries no review meaning.
    Ignored,
    ReviewerAdded,
    ReviewerAlreadyPresent,
    Approved { confirmation_key: Option<String> },
    AlreadyApproved,
}

/// Builds the announcement sections for a new review request.
pub fn render_announcement(request: &SubmitReview) -> Vec<MessageSection> {
    let mut sections = vec![
        MessageSection::Header("🔍 New PR Review Request".to_string()),
        MessageSection::Markdown(format!("*PR Link:* <{}>", request.pr_url)),
        MessageSection::Markdown(format!("*Description:*\n{}", request.description)),
    ];
    let reviewers = request
        .reviewer_ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(|id| format!("<@{id}>"))
        .collect::<Vec<_>>();
    if !reviewers.is_empty() {
        sections.push(MessageSection::Markdown(format!(
            "*Reviewers:* {}",
            reviewers.join(", ")
        )));
    }
    sections.push(MessageSection::Divider);
    sections.push(MessageSection::Context(format!(
        "{} = reviewing | {} = approved",
        ReviewSignal::Watching.emoji(),
        ReviewSignal::Approved.emoji()
    )));
    sections
}

pub struct ReviewIntake {
    store: Arc<dyn ReviewStore>,
    gateway: Arc<dyn MessagingGateway>,
    clock: Arc<dyn Clock>,
}

impl ReviewIntake {
    pub fn new(
        store: Arc<dyn ReviewStore>,
        gateway: Arc<dyn MessagingGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            gateway,
            clock,
        }
    }

    /// Announces the request, then records a pending review keyed by the
    /// announcement. Nothing is stored when the announcement fails.
    pub async fn submit(&self, request: SubmitReview) -> ReviewResult<Review> {
        for (field, value) in [
            ("pr_url", &request.pr_url),
            ("channel_id", &request.channel_id),
            ("team_id", &request.team_id),
        ] {
            if value.trim().is_empty() {
                return Err(ReviewError::Validation(format!("{field} must not be empty")));
            }
        }

        let announcement =
            OutboundMessage::text(request.channel_id.clone(), ANNOUNCEMENT_FALLBACK_TEXT)
                .with_sections(render_announcement(&request));
        let correlation_key = self
            .gateway
            .post_message(&request.team_id, &announcement)
            .await?;

        let reviewers = request
            .reviewer_ids
            .iter()
            .map(String::as_str)
            .collect::<ReviewerSet>();
        let review = self
            .store
            .create_review(NewReview {
                pr_url: request.pr_url,
                description: request.description,
                channel_id: request.channel_id,
                correlation_key,
                reviewers,
                team_id: request.team_id,
                created_at: self.clock.now(),
            })
            .await
            .map_err(ReviewError::from)?;
        tracing::info!(
            correlation_key = %review.correlation_key,
            channel_id = %review.channel_id,
            team_id = %review.team_id,
            reviewers = review.reviewers.len(),
            "review request stored"
        );
        Ok(review)
    }

    pub async fn handle_reaction(&self, event: ReactionEvent) -> ReviewResult<ReactionOutcome> {
        let Some(signal) = ReviewSignal::from_reaction(&event.reaction) else {
            return Ok(ReactionOutcome::Ignored);
        };
        match signal {
            ReviewSignal::Watching => {
                let change = self
                    .store
                    .add_reviewer(&event.correlation_key, &event.user_id)
                    .await
                    .map_err(ReviewError::from)?;
                tracing::info!(
                    correlation_key = %event.correlation_key,
                    user_id = %event.user_id,
                    added = change == ReviewerChange::Added,
                    "reviewer watching"
                );
                Ok(match change {
                    ReviewerChange::Added => ReactionOutcome::ReviewerAdded,
                    ReviewerChange::AlreadyPresent => ReactionOutcome::ReviewerAlreadyPresent,
                })
            }
            ReviewSignal::Approved => {
                let change = self
                    .store
                    .update_status(
                        &event.correlation_key,
                        ReviewStatus::Approved,
                        &event.user_id,
                        self.clock.now(),
                    )
                    .await
                    .map_err(ReviewError::from)?;
                if change == StatusChange::Unchanged {
                    return Ok(ReactionOutcome::AlreadyApproved);
                }
                let confirmation_key = self.post_approval_confirmation(&event).await;
                Ok(ReactionOutcome::Approved { confirmation_key })
            }
        }
    }

    /// One-shot: a failed confirmation is logged and not retried.
    async fn post_approval_confirmation(&self, event: &ReactionEvent) -> Option<String> {
        let display_name = match self
            .gateway
            .user_display_name(&event.team_id, &event.user_id)
            .await
        {
            Ok(name) if !name.trim().is_empty() => name,
            Ok(_) => event.user_id.clone(),
            Err(error) => {
                tracing::debug!(user_id = %event.user_id, %error, "display name lookup failed");
                event.user_id.clone()
            }
        };
        let message = OutboundMessage::text(
            event.channel_id.clone(),
            format!("✅ PR approved by {display_name}"),
        )
        .in_thread(event.correlation_key.clone());
        match self.gateway.post_message(&event.team_id, &message).await {
            Ok(key) => {
                tracing::info!(
                    correlation_key = %event.correlation_key,
                    approved_by = %event.user_id,
                    "review approved"
                );
                Some(key)
            }
            Err(error) => {
                tracing::warn!(
                    correlation_key = %event.correlation_key,
                    %error,
                    "approval confirmation failed"
                );
                None
            }
        }
    }
}
