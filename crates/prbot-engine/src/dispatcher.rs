//! Reminder composition and delivery.

use std::sync::Arc;

use prbot_core::{MessagingGateway, OutboundMessage, Review, ReviewResult};

use crate::policy::Tier;

/// Renders the reminder body for `tier`, or `None` when nothing is due.
pub fn render_reminder_text(review: &Review, tier: &Tier) -> Option<String> {
    let tone = tier.tone()?;
    let mut text = format!(
        "🔔 *Reminder:* PR needs review\n<{}|Open PR>\n",
        review.pr_url
    );
    let mentions = tier.mentions();
    if !mentions.is_empty() {
        text.push_str(&format!("Hey {}! {tone}", mentions.join(", ")));
    }
    Some(text)
}

/// Posts reminders as threaded replies under the review announcement.
#[derive(Clone)]
pub struct NotificationDispatcher {
    gateway: Arc<dyn MessagingGateway>,
}

impl NotificationDispatcher {
    pub fn new(gateway: Arc<dyn MessagingGateway>) -> Self {
        Self { gateway }
    }

    /// Sends one reminder. Returns the posted message key, or `None` for
    /// `Tier::None`. Failures are not retried here; the next tick retries.
    pub async fn dispatch(&self, review: &Review, tier: &Tier) -> ReviewResult<Option<String>> {
        let Some(text) = render_reminder_text(review, tier) else {
            return Ok(None);
        };
        let message = OutboundMessage::text(review.channel_id.clone(), text)
            .in_thread(review.correlation_key.clone());
        let posted = self.gateway.post_message(&review.team_id, &message).await?;
        tracing::info!(
            correlation_key = %review.correlation_key,
            channel_id = %review.channel_id,
            tier = tier.level().as_str(),
            reminder_key = %posted,
            "review reminder posted"
        );
        Ok(Some(posted))
    }
}
