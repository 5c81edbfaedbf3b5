//! Delivery-system wire types and the tracked submission job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::templates::{Template, UserProfile};

/// Status of a delivery job.
///
/// `TimedOut` is never reported by the delivery system; the tracker sets it
/// when its own deadline passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Partial,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        Self::Queued,
        Self::Processing,
        Self::Completed,
        Self::Partial,
        Self::Failed,
        Self::TimedOut,
    ];

    /// Forward-only: queued → processing → terminal.
    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        use JobStatus::*;

        matches!(
            (self, target),
            (Queued, Processing)
                | (Queued, Completed)
                | (Queued, Partial)
                | (Queued, Failed)
                | (Queued, TimedOut)
                | (Processing, Completed)
                | (Processing, Partial)
                | (Processing, Failed)
                | (Processing, TimedOut)
        )
    }

    /// Whether a freshly polled `target` may replace this stored status.
    ///
    /// `TimedOut` is set locally, never by the delivery system, so any
    /// reported status supersedes it.
    pub fn can_refresh_to(&self, target: JobStatus) -> bool {
        (*self == Self::TimedOut && target != Self::TimedOut) || self.can_transition_to(target)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Partial | Self::Failed | Self::TimedOut
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Wire DTOs ───────────────────────────────────────────────────────

/// Body of `POST /submit`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub template_id: String,
    pub user_id: String,
    pub template: Template,
    pub user: UserProfile,
}

/// Successful `POST /submit` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: String,
    #[serde(default)]
    pub queued_submissions: u32,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Per-recipient entry in a job status response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionEntry {
    pub status: String,
}

impl SubmissionEntry {
    fn is_done(&self) -> bool {
        matches!(
            self.status.to_ascii_lowercase().as_str(),
            "completed" | "delivered" | "sent" | "success"
        )
    }
}

/// `GET /jobs/{jobId}` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStatusResponse {
    pub status: JobStatus,
    #[serde(default)]
    pub submission_count: u32,
    #[serde(default)]
    pub submissions: Vec<SubmissionEntry>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobStatusResponse {
    pub fn completed_count(&self) -> u32 {
        u32::try_from(self.submissions.iter().filter(|s| s.is_done()).count()).unwrap_or(u32::MAX)
    }
}

// ── Tracked job ─────────────────────────────────────────────────────

/// The downstream delivery attempt, as last observed.
///
/// Each poll produces a fresh snapshot via `observe`; a snapshot is never
/// edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionJob {
    pub job_id: String,
    pub status: JobStatus,
    pub submission_count: u32,
    pub completed_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl SubmissionJob {
    /// A freshly queued job from a `/submit` response.
    pub fn queued(response: &SubmitResponse) -> Self {
        Self {
            job_id: response.job_id.clone(),
            status: JobStatus::Queued,
            submission_count: response.queued_submissions,
            completed_count: 0,
            created_at: response.timestamp.unwrap_or_else(Utc::now),
            last_polled_at: None,
            completed_at: None,
        }
    }

    /// Snapshot after a successful poll.
    ///
    /// Counts and timestamps always refresh. The status only moves forward;
    /// a backwards report (e.g. processing → queued) keeps the current one.
    pub fn observe(&self, response: &JobStatusResponse, polled_at: DateTime<Utc>) -> Self {
        let status = if response.status == self.status
            || self.status.can_transition_to(response.status)
        {
            response.status
        } else {
            tracing::debug!(
                job_id = %self.job_id,
                current = %self.status,
                reported = %response.status,
                "Ignoring backwards job status"
            );
            self.status
        };

        Self {
            job_id: self.job_id.clone(),
            status,
            submission_count: response.submission_count.max(self.submission_count),
            completed_count: response.completed_count(),
            created_at: self.created_at,
            last_polled_at: Some(polled_at),
            completed_at: response.completed_at.or(self.completed_at),
        }
    }

    /// Snapshot marking the tracker's deadline as passed.
    pub fn timed_out(&self) -> Self {
        let mut next = self.clone();
        if self.status.can_transition_to(JobStatus::TimedOut) {
            next.status = JobStatus::TimedOut;
        }
        next
    }
}
