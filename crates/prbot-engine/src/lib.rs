//! Review escalation engine.
//!
//! Combines the pure escalation policy with live engagement resolution, a
//! recurring scheduler, the reminder dispatcher, and the intake entry points
//! that turn chat events into review state transitions.

pub mod dispatcher;
pub mod engagement;
pub mod intake;
pub mod policy;
pub mod scheduler;
pub mod signal;

#[cfg(test)]
mod test_support;

pub use dispatcher::{render_reminder_text, NotificationDispatcher};
pub use engagement::{EngagementResolver, ReactionEngagementResolver};
pub use intake::{
    render_announcement, ReactionEvent, ReactionOutcome, ReviewIntake, SubmitReview,
};
pub use policy::{EscalationPolicy, PolicyError, Tier, TierLevel, CHANNEL_MENTION};
pub use scheduler::{
    start_escalation_scheduler, EscalationScheduler, EscalationSchedulerConfig,
    EscalationSchedulerHandle, ReviewOutcome, TickReport,
};
pub use signal::ReviewSignal;
