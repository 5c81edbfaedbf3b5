//! Content moderation consensus pipeline.
//!
//! Messages pass through up to three LLM classifiers in order. Every stage
//! fails closed, consensus is unanimous, and only an approved message is
//! handed to the delivery system.

pub mod consensus;
pub mod normalizer;
pub mod parse;
pub mod pipeline;
pub mod result;
pub mod route;
pub mod stages;
pub mod types;

pub use consensus::{ConsensusDecision, FinalDecision, Vote};
pub use normalizer::ContentFingerprint;
pub use pipeline::{ModerationPipeline, StageClassifiers};
pub use result::{ModerationResult, SubmissionOutcome, SubmissionSummary, format_result};
pub use route::classify_route;
pub use types::{AgentKind, ModerationRequest, RouteType, StageVerdict};
