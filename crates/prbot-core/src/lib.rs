//! Foundational review types shared across prbot crates.
//!
//! Hosts the review entity and its state machine, the error taxonomy, the
//! injectable clock, and the collaborator traits (messaging gateway and
//! credential resolution) that the engine and runtimes are written against.

pub mod clock;
pub mod error;
pub mod gateway;
pub mod review;

pub use clock::{elapsed_between, Clock, ManualClock, SystemClock};
pub use error::{ErrorKind, ReviewError, ReviewResult};
pub use gateway::{
    CredentialResolver, GatewayError, GatewayResult, MessageSection, MessagingGateway,
    OutboundMessage,
};
pub use review::{
    Approval, ApprovalChange, NewReview, Review, ReviewStatus, ReviewerChange, ReviewerSet,
    StatusChange,
};
