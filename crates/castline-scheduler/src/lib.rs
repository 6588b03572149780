//! Scheduled publish pipeline for Castline.
//!
//! Turns due posts into exactly one publish job each and runs those jobs:
//! - `PostClaimer` takes ownership of a post with a conditional update
//! - `ScheduledSweeper` polls for due posts with resource-pressure backoff
//! - `JobRunner` fans a job out to provider adapters under an admission limit
//! - `RealtimeHub` pushes lifecycle events to connected clients

pub mod claimer;
pub mod error;
pub mod hub;
pub mod runner;
pub mod sweeper;

pub use claimer::{AdhocRequest, ClaimOutcome, PostClaimer, PublishSource, PublishTask};
pub use error::{ClaimError, SweepError};
pub use hub::{ConnectionId, RealtimeHub, Subscription};
pub use runner::{JobOutcome, JobRunner};
pub use sweeper::ScheduledSweeper;
