//! Live engagement resolution.

use std::sync::Arc;

use async_trait::async_trait;
use prbot_core::{MessagingGateway, Review, ReviewerSet};

use crate::signal::ReviewSignal;

/// Determines which reviewers are actively watching a review right now.
#[async_trait]
pub trait EngagementResolver: Send + Sync {
    /// Never fails: an unavailable source yields an empty set.
    async fn resolve(&self, review: &Review) -> ReviewerSet;
}

/// Pulls the "watching" reaction from the announcement on every call.
pub struct ReactionEngagementResolver {
    gateway: Arc<dyn MessagingGateway>,
}

impl ReactionEngagementResolver {
    pub fn new(gateway: Arc<dyn MessagingGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl EngagementResolver for ReactionEngagementResolver {
    async fn resolve(&self, review: &Review) -> ReviewerSet {
        let reaction = ReviewSignal::Watching.reaction_name();
        match self
            .gateway
            .get_reaction_users(
                &review.team_id,
                &review.channel_id,
                &review.correlation_key,
                reaction,
            )
            .await
        {
            Ok(users) => users,
            Err(error) => {
                tracing::warn!(
                    correlation_key = %review.correlation_key,
                    channel_id = %review.channel_id,
                    %error,
                    "engagement lookup failed; falling back to assigned reviewers"
                );
                ReviewerSet::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{EngagementResolver, ReactionEngagementResolver};
    use crate::test_support::{pending_review, RecordingGateway};
    use std::sync::Arc;

    #[tokio::test]
    async fn functional_resolver_reads_watching_reaction_users() {
        let gateway = Arc::new(RecordingGateway::default());
        gateway.set_reaction_users("1.0", "eyes", &["U7", "U8"]);
        gateway.set_reaction_users("1.0", "white_check_mark", &["U9"]);

        let resolver = ReactionEngagementResolver::new(gateway.clone());
        let engaged = resolver.resolve(&pending_review("1.0", 0)).await;
        assert_eq!(engaged.iter().collect::<Vec<_>>(), vec!["U7", "U8"]);
    }

    #[tokio::test]
    async fn regression_resolver_swallows_gateway_failures() {
        let gateway = Arc::new(RecordingGateway::default());
        gateway.fail_reactions_for("1.0");

        let resolver = ReactionEngagementResolver::new(gateway.clone());
        let engaged = resolver.resolve(&pending_review("1.0", 0)).await;
        assert!(engaged.is_empty());
    }
}
