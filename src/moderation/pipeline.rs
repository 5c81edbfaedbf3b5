//! Moderation coordinator.
//!
//! Flow:
//! 1. Fingerprint and route (no model calls)
//! 2. Safety triage → stop on block
//! 3. Contextual analysis → stop on block
//! 4. Credibility review, direct outreach only
//! 5. Consensus; submit and track only on approval
//! 6. Format, audit, return
//!
//! Nothing is submitted unless every stage that ran approved.

use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ModerationConfig, StageConfig};
use crate::delivery::{
    DeliveryClient, JobStatusResponse, JobTracker, SubmissionJob, SubmitRequest,
};
use crate::error::{DeliveryError, PipelineError};
use crate::llm::LlmProvider;
use crate::moderation::consensus::ConsensusDecision;
use crate::moderation::normalizer::ContentFingerprint;
use crate::moderation::result::{ModerationResult, SubmissionOutcome, format_result};
use crate::moderation::route::classify_route;
use crate::moderation::stages::{
    ClassifierStage, ContextualStage, CredibilityStage, SafetyStage, StageContext, run_stage,
};
use crate::moderation::types::{ModerationRequest, RouteType, StageVerdict};
use crate::store::audit::{AuditLog, ModerationRecord};
use crate::store::templates::{Template, TemplateStore, UserProfile};

/// One classifier client per stage.
#[derive(Clone)]
pub struct StageClassifiers {
    pub safety: Arc<dyn LlmProvider>,
    pub contextual: Arc<dyn LlmProvider>,
    pub credibility: Arc<dyn LlmProvider>,
}

/// Stage verdicts gathered before consensus.
struct Evaluation {
    verdicts: Vec<StageVerdict>,
    cancelled: bool,
}

pub struct ModerationPipeline {
    classifiers: StageClassifiers,
    delivery: Arc<dyn DeliveryClient>,
    templates: Arc<dyn TemplateStore>,
    audit: Option<Arc<dyn AuditLog>>,
    config: ModerationConfig,
}

impl ModerationPipeline {
    pub fn new(
        classifiers: StageClassifiers,
        delivery: Arc<dyn DeliveryClient>,
        templates: Arc<dyn TemplateStore>,
        config: ModerationConfig,
    ) -> Self {
        Self {
            classifiers,
            delivery,
            templates,
            audit: None,
            config,
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn audit_log(&self) -> Option<&Arc<dyn AuditLog>> {
        self.audit.as_ref()
    }

    /// Fetch a template and moderate it.
    ///
    /// Store errors are returned unchanged; everything after the fetch
    /// resolves into a `ModerationResult`.
    pub async fn moderate_template(
        &self,
        template_id: &str,
        user: &UserProfile,
        cancel: &CancellationToken,
    ) -> Result<ModerationResult, PipelineError> {
        if user.id.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("user id is empty".into()));
        }
        let template = self.templates.get_template(template_id).await?;
        Ok(self.moderate(&template, user, cancel).await)
    }

    /// Run one moderation attempt end to end.
    pub async fn moderate(
        &self,
        template: &Template,
        user: &UserProfile,
        cancel: &CancellationToken,
    ) -> ModerationResult {
        let request = ModerationRequest::from_template(template);
        let route = classify_route(&request.delivery_method, &self.config.legislative_route_id);
        let fingerprint = ContentFingerprint::analyze(&request.body);

        info!(
            template_id = %request.message_id,
            route = route.as_str(),
            chars = fingerprint.char_count,
            injection_signals = fingerprint.injection_signals.len(),
            preview = %request.preview(),
            "Moderating message"
        );

        let evaluation = self.evaluate(&request, route, &fingerprint, cancel).await;
        let decision = if evaluation.cancelled {
            ConsensusDecision::cancelled(&evaluation.verdicts)
        } else {
            ConsensusDecision::aggregate(&evaluation.verdicts)
        };

        info!(
            template_id = %request.message_id,
            approved = decision.approved,
            votes = decision.votes.len(),
            cancelled = evaluation.cancelled,
            "Consensus reached"
        );

        let outcome = if evaluation.cancelled || (decision.approved && cancel.is_cancelled()) {
            SubmissionOutcome::Cancelled
        } else if !decision.approved {
            SubmissionOutcome::NotAttempted
        } else {
            self.submit_and_track(template, user, cancel).await
        };

        let result = format_result(&request.message_id, route, &fingerprint, &decision, &outcome);
        self.record(&request, &result, &evaluation.verdicts).await;
        result
    }

    /// Single on-demand job status read, for callers re-polling a job
    /// that outlived tracking.
    pub async fn refresh_job(&self, job_id: &str) -> Result<JobStatusResponse, DeliveryError> {
        let timeout = self.config.delivery.poll.request_timeout;
        let response = tokio::time::timeout(timeout, self.delivery.job_status(job_id))
            .await
            .map_err(|_| DeliveryError::Timeout {
                endpoint: format!("/jobs/{job_id}"),
                timeout,
            })??;

        if let Some(audit) = &self.audit {
            if let Err(e) = audit.update_job_status(job_id, response.status).await {
                warn!(job_id, error = %e, "Failed to update audited job status");
            }
        }
        Ok(response)
    }

    async fn evaluate(
        &self,
        request: &ModerationRequest,
        route: RouteType,
        fingerprint: &ContentFingerprint,
        cancel: &CancellationToken,
    ) -> Evaluation {
        let mut verdicts: Vec<StageVerdict> = Vec::with_capacity(3);

        let plan: [(&Arc<dyn LlmProvider>, &StageConfig, StageKind); 3] = [
            (&self.classifiers.safety, &self.config.safety, StageKind::Safety),
            (
                &self.classifiers.contextual,
                &self.config.contextual,
                StageKind::Contextual,
            ),
            (
                &self.classifiers.credibility,
                &self.config.credibility,
                StageKind::Credibility,
            ),
        ];

        for (llm, config, kind) in plan {
            if kind == StageKind::Credibility && route != RouteType::DirectOutreach {
                break;
            }

            let ctx = StageContext {
                request,
                route,
                fingerprint,
                prior: &verdicts,
            };
            let verdict = match kind {
                StageKind::Safety => {
                    run_cancellable::<SafetyStage>(llm.as_ref(), config, &ctx, cancel).await
                }
                StageKind::Contextual => {
                    run_cancellable::<ContextualStage>(llm.as_ref(), config, &ctx, cancel).await
                }
                StageKind::Credibility => {
                    run_cancellable::<CredibilityStage>(llm.as_ref(), config, &ctx, cancel).await
                }
            };

            let Some(verdict) = verdict else {
                info!(template_id = %request.message_id, stage = ?kind, "Moderation cancelled");
                return Evaluation {
                    verdicts,
                    cancelled: true,
                };
            };

            let blocked = !verdict.approved();
            verdicts.push(verdict);
            if blocked {
                break;
            }
        }

        Evaluation {
            verdicts,
            cancelled: false,
        }
    }

    async fn submit_and_track(
        &self,
        template: &Template,
        user: &UserProfile,
        cancel: &CancellationToken,
    ) -> SubmissionOutcome {
        let submit = SubmitRequest {
            template_id: template.id.clone(),
            user_id: user.id.clone(),
            template: template.clone(),
            user: user.clone(),
        };

        let submitted_at = Instant::now();
        let response = match self.delivery.submit(&submit).await {
            Ok(response) => response,
            Err(e) => {
                warn!(template_id = %template.id, error = %e, "Submission failed");
                return SubmissionOutcome::Rejected {
                    error: e.to_string(),
                };
            }
        };

        let job = SubmissionJob::queued(&response);
        info!(
            template_id = %template.id,
            job_id = %job.job_id,
            queued = job.submission_count,
            "Submitted for delivery"
        );

        let tracker = JobTracker::new(Arc::clone(&self.delivery), self.config.delivery.poll);
        SubmissionOutcome::Tracked(tracker.track(job, submitted_at, cancel).await)
    }

    async fn record(
        &self,
        request: &ModerationRequest,
        result: &ModerationResult,
        verdicts: &[StageVerdict],
    ) {
        let Some(audit) = &self.audit else {
            return;
        };
        let record = ModerationRecord::new(&request.author_id, result, verdicts);
        if let Err(e) = audit.record(&record).await {
            warn!(template_id = %request.message_id, error = %e, "Failed to write audit record");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StageKind {
    Safety,
    Contextual,
    Credibility,
}

/// Run a stage unless the token fires first. `None` means cancelled.
async fn run_cancellable<S: ClassifierStage>(
    llm: &dyn LlmProvider,
    config: &StageConfig,
    ctx: &StageContext<'_>,
    cancel: &CancellationToken,
) -> Option<StageVerdict> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        verdict = run_stage::<S>(llm, config, ctx) => Some(verdict),
    }
}
