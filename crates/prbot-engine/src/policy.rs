//! Time-based escalation policy.
//!
//! `evaluate` is a pure function of elapsed time and the two reviewer sets.
//! Lower bounds are inclusive: reaching `start_after` exactly already yields a
//! direct reminder, reaching `channel_after` exactly already broadcasts.

use std::time::Duration;

use prbot_core::ReviewerSet;
use serde::Serialize;
use thiserror::Error;

/// Slack broadcast marker addressing the whole conversation.
pub const CHANNEL_MENTION: &str = "<!channel>";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error(
        "reminder start threshold ({start_after:?}) must be shorter than the channel threshold ({channel_after:?})"
    )]
    InvalidThresholds {
        start_after: Duration,
        channel_after: Duration,
    },
}

/// Escalation decision for one review at one point in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tier {
    None,
    /// Remind individual reviewers. An empty set still produces a bare reminder.
    Direct { recipients: ReviewerSet },
    /// Remind the whole conversation.
    Broadcast { waiting_label: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TierLevel {
    None,
    Direct,
    Broadcast,
}

impl TierLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Direct => "direct",
            Self::Broadcast => "broadcast",
        }
    }
}

impl Tier {
    pub fn level(&self) -> TierLevel {
        match self {
            Self::None => TierLevel::None,
            Self::Direct { .. } => TierLevel::Direct,
            Self::Broadcast { .. } => TierLevel::Broadcast,
        }
    }

    /// Chat mention tokens for the recipients of this tier.
    pub fn mentions(&self) -> Vec<String> {
        match self {
            Self::None => Vec::new(),
            Self::Direct { recipients } => recipients
                .iter()
                .map(|user_id| format!("<@{user_id}>"))
                .collect(),
            Self::Broadcast { .. } => vec![CHANNEL_MENTION.to_string()],
        }
    }

    pub fn tone(&self) -> Option<String> {
        match self {
            Self::None => None,
            Self::Direct { .. } => Some("This PR is awaiting your review.".to_string()),
            Self::Broadcast { waiting_label } => Some(format!(
                "This PR has been waiting for review for {waiting_label}."
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscalationPolicy {
    start_after: Duration,
    channel_after: Duration,
}

impl EscalationPolicy {
    pub fn new(start_after: Duration, channel_after: Duration) -> Result<Self, PolicyError> {
        if start_after >= channel_after {
            return Err(PolicyError::InvalidThresholds {
                start_after,
                channel_after,
            });
        }
        Ok(Self {
            start_after,
            channel_after,
        })
    }

    /// Human-scale thresholds: remind after a day, broadcast after three.
    pub fn production() -> Self {
        Self {
            start_after: Duration::from_secs(24 * 3_600),
            channel_after: Duration::from_secs(3 * 24 * 3_600),
        }
    }

    /// Second-scale thresholds for exercising the full flow quickly.
    pub fn fast() -> Self {
        Self {
            start_after: Duration::from_secs(10),
            channel_after: Duration::from_secs(20),
        }
    }

    pub fn start_after(&self) -> Duration {
        self.start_after
    }

    pub fn channel_after(&self) -> Duration {
        self.channel_after
    }

    /// True when `evaluate` at `elapsed` would consult the engaged set.
    pub fn needs_engagement(&self, elapsed: Duration) -> bool {
        elapsed >= self.start_after && elapsed < self.channel_after
    }

    pub fn evaluate(
        &self,
        elapsed: Duration,
        assigned: &ReviewerSet,
        engaged: &ReviewerSet,
    ) -> Tier {
        if elapsed < self.start_after {
            return Tier::None;
        }
        if elapsed >= self.channel_after {
            return Tier::Broadcast {
                waiting_label: waiting_label(self.channel_after),
            };
        }
        let recipients = if engaged.is_empty() {
            assigned.clone()
        } else {
            engaged.clone()
        };
        Tier::Direct { recipients }
    }
}

/// Renders a threshold as "N+ unit" using the largest unit that divides it.
fn waiting_label(threshold: Duration) -> String {
    const UNITS: [(u64, &str); 4] = [
        (86_400, "day"),
        (3_600, "hour"),
        (60, "minute"),
        (1, "second"),
    ];
    let seconds = threshold.as_secs();
    for (unit_seconds, unit) in UNITS {
        if seconds >= unit_seconds && seconds % unit_seconds == 0 {
            let count = seconds / unit_seconds;
            let plural = if count == 1 { "" } else { "s" };
            return format!("{count}+ {unit}{plural}");
        }
    }
    format!("{}+ milliseconds", threshold.as_millis())
}
