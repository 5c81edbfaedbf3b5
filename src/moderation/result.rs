//! Caller-facing moderation result.
//!
//! `format_result` is a pure function of its inputs: the same decision and
//! submission outcome always produce an identical result and identical JSON.

use serde::{Deserialize, Serialize};

use crate::delivery::{JobStatus, TrackingOutcome, TrackingReport};
use crate::moderation::consensus::{ConsensusDecision, FinalDecision, Vote};
use crate::moderation::normalizer::ContentFingerprint;
use crate::moderation::types::RouteType;

/// What happened after consensus.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionOutcome {
    /// Consensus blocked; nothing was sent.
    NotAttempted,
    /// The attempt was cancelled before anything was sent.
    Cancelled,
    /// `/submit` failed.
    Rejected { error: String },
    /// Submitted and tracked.
    Tracked(TrackingReport),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionSummary {
    pub submitted: bool,
    pub job_id: Option<String>,
    pub status: Option<JobStatus>,
    pub submission_count: u32,
    pub completed_count: u32,
    pub tracking: Option<TrackingOutcome>,
    /// Human-readable account of the delivery state.
    pub explanation: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationResult {
    pub template_id: String,
    pub route: RouteType,
    pub fingerprint: ContentFingerprint,
    pub approved: bool,
    pub final_decision: FinalDecision,
    pub reasoning: Vec<String>,
    pub votes: Vec<Vote>,
    pub cancelled: bool,
    pub submission: SubmissionSummary,
}

impl ModerationResult {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Merge the decision and the delivery outcome into one result.
pub fn format_result(
    template_id: &str,
    route: RouteType,
    fingerprint: &ContentFingerprint,
    decision: &ConsensusDecision,
    outcome: &SubmissionOutcome,
) -> ModerationResult {
    let cancelled = match outcome {
        SubmissionOutcome::Cancelled => true,
        SubmissionOutcome::Tracked(report) => report.outcome == TrackingOutcome::Cancelled,
        _ => false,
    };

    ModerationResult {
        template_id: template_id.to_string(),
        route,
        fingerprint: fingerprint.clone(),
        approved: decision.approved,
        final_decision: decision.final_decision,
        reasoning: decision.reasoning.clone(),
        votes: decision.votes.clone(),
        cancelled,
        submission: summarize(decision, outcome),
    }
}

fn summarize(decision: &ConsensusDecision, outcome: &SubmissionOutcome) -> SubmissionSummary {
    let not_submitted = |explanation: String, error: Option<String>| SubmissionSummary {
        submitted: false,
        job_id: None,
        status: None,
        submission_count: 0,
        completed_count: 0,
        tracking: None,
        explanation,
        error,
    };

    match outcome {
        SubmissionOutcome::NotAttempted => not_submitted(
            format!(
                "Not submitted: {}",
                decision.rejection_reason().unwrap_or("message was not approved")
            ),
            None,
        ),
        SubmissionOutcome::Cancelled => {
            not_submitted("Not submitted: moderation was cancelled.".to_string(), None)
        }
        SubmissionOutcome::Rejected { error } => not_submitted(
            "Approved, but the delivery system rejected the submission.".to_string(),
            Some(error.clone()),
        ),
        SubmissionOutcome::Tracked(report) => {
            let job = &report.job;
            let explanation = match report.outcome {
                TrackingOutcome::Terminal => match job.status {
                    JobStatus::Completed => format!(
                        "Delivered: {} of {} submissions completed.",
                        job.completed_count, job.submission_count
                    ),
                    JobStatus::Partial => format!(
                        "Partially delivered: {} of {} submissions completed.",
                        job.completed_count, job.submission_count
                    ),
                    JobStatus::Failed => "Delivery failed for all submissions.".to_string(),
                    other => format!("Delivery finished with status {other}."),
                },
                TrackingOutcome::TimedOut => format!(
                    "Still {} when tracking stopped at the deadline; re-poll job {} for the final status.",
                    report.last_known_status, job.job_id
                ),
                TrackingOutcome::Cancelled => format!(
                    "Tracking cancelled while the job was {}; re-poll job {} for the final status.",
                    job.status, job.job_id
                ),
            };
            let error = match report.outcome {
                TrackingOutcome::Terminal => None,
                _ => report.last_error.clone(),
            };

            SubmissionSummary {
                submitted: true,
                job_id: Some(job.job_id.clone()),
                status: Some(job.status),
                submission_count: job.submission_count,
                completed_count: job.completed_count,
                tracking: Some(report.outcome),
                explanation,
                error,
            }
        }
    }
}
