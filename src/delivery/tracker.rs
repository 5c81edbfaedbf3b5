//! Job status polling under a hard deadline.
//!
//! Timing runs on `tokio::time`, so tests drive it with a paused clock.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollPolicy;
use crate::delivery::client::DeliveryClient;
use crate::delivery::types::{JobStatus, SubmissionJob};

/// Why tracking stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingOutcome {
    /// The job reached a terminal status reported by the delivery system.
    Terminal,
    /// The deadline passed before a terminal status was seen.
    TimedOut,
    /// The caller cancelled; the job carries the last known state.
    Cancelled,
}

/// Final tracking state handed to the result formatter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingReport {
    pub job: SubmissionJob,
    pub outcome: TrackingOutcome,
    /// Status the delivery system last reported (before any `timed_out`).
    pub last_known_status: JobStatus,
    pub polls: u32,
    pub poll_errors: u32,
    pub last_error: Option<String>,
}

/// Polls one job until it is terminal, the deadline passes, or the
/// caller cancels.
pub struct JobTracker {
    client: Arc<dyn DeliveryClient>,
    policy: PollPolicy,
}

impl JobTracker {
    pub fn new(client: Arc<dyn DeliveryClient>, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    /// Track `job`, measuring the deadline from `submitted_at`.
    ///
    /// Poll failures (network, HTTP, undecodable body, per-poll timeout) are
    /// retried on the normal schedule; only the deadline ends tracking
    /// without a terminal status. No poll is started once the deadline has
    /// passed, and a poll in flight never outlives it.
    pub async fn track(
        &self,
        job: SubmissionJob,
        submitted_at: Instant,
        cancel: &CancellationToken,
    ) -> TrackingReport {
        let deadline = submitted_at + self.policy.deadline;
        let mut job = job;
        let mut polls = 0u32;
        let mut poll_errors = 0u32;
        let mut last_error: Option<String> = None;
        let mut delay = self.policy.initial_delay;

        let finish = |job: SubmissionJob,
                      outcome: TrackingOutcome,
                      polls: u32,
                      poll_errors: u32,
                      last_error: Option<String>| {
            let last_known_status = job.status;
            let job = match outcome {
                TrackingOutcome::TimedOut => job.timed_out(),
                _ => job,
            };
            TrackingReport {
                job,
                outcome,
                last_known_status,
                polls,
                poll_errors,
                last_error,
            }
        };

        loop {
            let wake = (Instant::now() + delay).min(deadline);
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(job_id = %job.job_id, status = %job.status, polls, "Job tracking cancelled");
                    return finish(job, TrackingOutcome::Cancelled, polls, poll_errors, last_error);
                }
                _ = tokio::time::sleep_until(wake) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(
                    job_id = %job.job_id,
                    status = %job.status,
                    polls,
                    poll_errors,
                    "Job tracking deadline reached"
                );
                return finish(job, TrackingOutcome::TimedOut, polls, poll_errors, last_error);
            }

            let budget = self.policy.request_timeout.min(deadline - now);
            let job_id = job.job_id.clone();
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(job_id = %job.job_id, status = %job.status, polls, "Job tracking cancelled");
                    return finish(job, TrackingOutcome::Cancelled, polls, poll_errors, last_error);
                }
                r = tokio::time::timeout(budget, self.client.job_status(&job_id)) => r,
            };
            polls += 1;

            match polled {
                Ok(Ok(response)) => {
                    job = job.observe(&response, Utc::now());
                    debug!(
                        job_id = %job.job_id,
                        status = %job.status,
                        completed = job.completed_count,
                        total = job.submission_count,
                        "Job polled"
                    );
                    if job.status.is_terminal() {
                        info!(job_id = %job.job_id, status = %job.status, polls, "Job finished");
                        return finish(job, TrackingOutcome::Terminal, polls, poll_errors, last_error);
                    }
                }
                Ok(Err(e)) => {
                    poll_errors += 1;
                    warn!(job_id = %job.job_id, error = %e, "Job poll failed; will retry");
                    last_error = Some(e.to_string());
                }
                Err(_) => {
                    poll_errors += 1;
                    warn!(job_id = %job.job_id, budget = ?budget, "Job poll timed out; will retry");
                    last_error = Some(format!("job status request timed out after {budget:?}"));
                }
            }

            delay = self.policy.retry_delay;
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::delivery::client::DeliveryClient;
    use crate::delivery::types::{JobStatusResponse, SubmitRequest, SubmitResponse};
    use crate::error::DeliveryError;

    /// One scripted poll answer.
    #[derive(Clone, Copy)]
    pub enum PollReply {
        Status(&'static str),
        Error,
        Hang,
    }

    /// Scripted delivery system. Once the script runs out the last reply
    /// repeats.
    pub struct ScriptedDelivery {
        pub submit_ok: bool,
        pub replies: Mutex<VecDeque<PollReply>>,
        pub submits: AtomicUsize,
        pub polls: AtomicUsize,
        pub last_submit: Mutex<Option<SubmitRequest>>,
    }

    impl ScriptedDelivery {
        pub fn new(replies: Vec<PollReply>) -> Self {
            Self {
                submit_ok: true,
                replies: Mutex::new(replies.into()),
                submits: AtomicUsize::new(0),
                polls: AtomicUsize::new(0),
                last_submit: Mutex::new(None),
            }
        }

        pub fn rejecting_submit() -> Self {
            Self {
                submit_ok: false,
                ..Self::new(vec![])
            }
        }

        pub fn submit_count(&self) -> usize {
            self.submits.load(Ordering::SeqCst)
        }

        pub fn poll_count(&self) -> usize {
            self.polls.load(Ordering::SeqCst)
        }

        fn next_reply(&self) -> PollReply {
            let mut replies = self.replies.lock().unwrap();
            match replies.len() {
                0 => PollReply::Status("processing"),
                1 => *replies.front().unwrap(),
                _ => replies.pop_front().unwrap(),
            }
        }
    }

    #[async_trait]
    impl DeliveryClient for ScriptedDelivery {
        async fn submit(&self, request: &SubmitRequest) -> Result<SubmitResponse, DeliveryError> {
            self.submits.fetch_add(1, Ordering::SeqCst);
            *self.last_submit.lock().unwrap() = Some(request.clone());
            if !self.submit_ok {
                return Err(DeliveryError::Http {
                    endpoint: "/submit".into(),
                    status: 503,
                    body: "unavailable".into(),
                });
            }
            Ok(SubmitResponse {
                job_id: "job-42".into(),
                queued_submissions: 2,
                timestamp: None,
            })
        }

        async fn job_status(&self, job_id: &str) -> Result<JobStatusResponse, DeliveryError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            match self.next_reply() {
                PollReply::Status(status) => Ok(serde_json::from_value(serde_json::json!({
                    "status": status,
                    "submissionCount": 2,
                    "submissions": [{"status": "delivered"}, {"status": "pending"}],
                }))
                .unwrap()),
                PollReply::Error => Err(DeliveryError::RequestFailed {
                    endpoint: format!("/jobs/{job_id}"),
                    reason: "connection refused".into(),
                }),
                PollReply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(DeliveryError::RequestFailed {
                        endpoint: format!("/jobs/{job_id}"),
                        reason: "unreachable".into(),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::test_support::{PollReply, ScriptedDelivery};
    use super::*;
    use crate::delivery::types::{JobStatus, SubmitResponse};

    fn queued_job() -> SubmissionJob {
        SubmissionJob::queued(&SubmitResponse {
            job_id: "job-42".into(),
            queued_submissions: 2,
            timestamp: None,
        })
    }

    fn tracker(delivery: Arc<ScriptedDelivery>) -> JobTracker {
        JobTracker::new(delivery, PollPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn completes_on_terminal_status() {
        let delivery = Arc::new(ScriptedDelivery::new(vec![
            PollReply::Status("processing"),
            PollReply::Status("completed"),
        ]));
        let started = Instant::now();
        let report = tracker(delivery.clone())
            .track(queued_job(), started, &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, TrackingOutcome::Terminal);
        assert_eq!(report.job.status, JobStatus::Completed);
        assert_eq!(report.polls, 2);
        assert_eq!(report.job.completed_count, 1);
        // 5s initial delay + 10s retry delay.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(15));
        assert!(elapsed < Duration::from_secs(16));
    }

    #[tokio::test(start_paused = true)]
    async fn never_terminal_times_out_at_deadline() {
        let delivery = Arc::new(ScriptedDelivery::new(vec![PollReply::Status("processing")]));
        let started = Instant::now();
        let report = tracker(delivery.clone())
            .track(queued_job(), started, &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, TrackingOutcome::TimedOut);
        assert_eq!(report.job.status, JobStatus::TimedOut);
        assert_eq!(report.last_known_status, JobStatus::Processing);
        // Polls at 5s, 15s, ..., 295s.
        assert_eq!(report.polls, 30);
        assert_eq!(delivery.poll_count(), 30);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(300));
        assert!(elapsed < Duration::from_secs(301));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_errors_are_retried_within_budget() {
        let delivery = Arc::new(ScriptedDelivery::new(vec![
            PollReply::Error,
            PollReply::Error,
            PollReply::Status("partial"),
        ]));
        let report = tracker(delivery.clone())
            .track(queued_job(), Instant::now(), &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, TrackingOutcome::Terminal);
        assert_eq!(report.job.status, JobStatus::Partial);
        assert_eq!(report.polls, 3);
        assert_eq!(report.poll_errors, 2);
        assert!(report.last_error.unwrap().contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_errors_end_in_timeout() {
        let delivery = Arc::new(ScriptedDelivery::new(vec![PollReply::Error]));
        let started = Instant::now();
        let report = tracker(delivery)
            .track(queued_job(), started, &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, TrackingOutcome::TimedOut);
        assert_eq!(report.job.status, JobStatus::TimedOut);
        assert_eq!(report.last_known_status, JobStatus::Queued);
        assert_eq!(report.poll_errors, report.polls);
        assert!(started.elapsed() < Duration::from_secs(301));
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_poll_never_outlives_deadline() {
        let delivery = Arc::new(ScriptedDelivery::new(vec![PollReply::Hang]));
        let started = Instant::now();
        let report = tracker(delivery)
            .track(queued_job(), started, &CancellationToken::new())
            .await;

        assert_eq!(report.outcome, TrackingOutcome::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(300));
        assert!(elapsed < Duration::from_secs(301));
        assert!(report.last_error.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn backwards_status_is_ignored() {
        let delivery = Arc::new(ScriptedDelivery::new(vec![
            PollReply::Status("processing"),
            PollReply::Status("queued"),
            PollReply::Status("completed"),
        ]));
        let report = tracker(delivery)
            .track(queued_job(), Instant::now(), &CancellationToken::new())
            .await;
        assert_eq!(report.job.status, JobStatus::Completed);
        assert_eq!(report.polls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_reports_last_known_state() {
        let delivery = Arc::new(ScriptedDelivery::new(vec![PollReply::Status("processing")]));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let report = tracker(delivery).track(queued_job(), started, &cancel).await;

        assert_eq!(report.outcome, TrackingOutcome::Cancelled);
        assert_eq!(report.job.status, JobStatus::Processing);
        assert_eq!(report.polls, 2);
        assert!(started.elapsed() < Duration::from_secs(25));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_counts_from_submission() {
        let delivery = Arc::new(ScriptedDelivery::new(vec![PollReply::Status("queued")]));
        let submitted_at = Instant::now();
        tokio::time::sleep(Duration::from_secs(298)).await;

        // Only two seconds of budget remain, less than the initial delay.
        let now = Instant::now();
        let report = tracker(delivery)
            .track(queued_job(), submitted_at, &CancellationToken::new())
            .await;
        assert_eq!(report.outcome, TrackingOutcome::TimedOut);
        assert_eq!(report.polls, 0);
        assert!(now.elapsed() < Duration::from_secs(3));
    }
}
