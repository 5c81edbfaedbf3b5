//! Consensus engine: unanimous approval, single dissent blocks.
//!
//! Pure aggregation over the verdicts of the stages that actually ran, in
//! execution order. Stages that did not run contribute no vote.

use serde::{Deserialize, Serialize};

use crate::moderation::types::{AgentKind, StageVerdict};

/// Reasoning line recorded when every executed stage approved.
pub const ALL_APPROVE: &str = "All evaluators approve.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalDecision {
    Approve,
    Block,
}

/// One stage's vote in caller-facing shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub agent: AgentKind,
    pub approved: bool,
    pub reasoning: String,
    pub confidence: f64,
}

impl From<&StageVerdict> for Vote {
    fn from(verdict: &StageVerdict) -> Self {
        Self {
            agent: verdict.agent,
            approved: verdict.approved(),
            reasoning: verdict.reasoning.clone(),
            confidence: verdict.confidence,
        }
    }
}

/// The single decision for a moderation attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusDecision {
    pub approved: bool,
    pub final_decision: FinalDecision,
    /// Dissenting stage reasons, or `ALL_APPROVE`.
    pub reasoning: Vec<String>,
    /// One entry per executed stage, in execution order.
    pub votes: Vec<Vote>,
}

impl ConsensusDecision {
    /// Aggregate executed-stage verdicts.
    ///
    /// The first blocking verdict decides; verdicts after it are ignored
    /// (in the pipeline they never exist, since execution stops there).
    /// No verdicts at all is not consent: the decision is `block`.
    pub fn aggregate(verdicts: &[StageVerdict]) -> Self {
        let mut votes = Vec::with_capacity(verdicts.len());

        for verdict in verdicts {
            votes.push(Vote::from(verdict));
            if !verdict.approved() {
                return Self {
                    approved: false,
                    final_decision: FinalDecision::Block,
                    reasoning: vec![verdict.reasoning.clone()],
                    votes,
                };
            }
        }

        if votes.is_empty() {
            return Self {
                approved: false,
                final_decision: FinalDecision::Block,
                reasoning: vec!["No evaluator ran; approval requires at least one vote.".into()],
                votes,
            };
        }

        Self {
            approved: true,
            final_decision: FinalDecision::Approve,
            reasoning: vec![ALL_APPROVE.to_string()],
            votes,
        }
    }

    /// Decision for an attempt cancelled before every required stage ran.
    /// Votes already cast are kept; the outcome is always `block`.
    pub fn cancelled(verdicts: &[StageVerdict]) -> Self {
        Self {
            approved: false,
            final_decision: FinalDecision::Block,
            reasoning: vec!["Moderation cancelled before a decision was reached.".into()],
            votes: verdicts.iter().map(Vote::from).collect(),
        }
    }

    /// First dissenting reason, for rejection explanations.
    pub fn rejection_reason(&self) -> Option<&str> {
        if self.approved {
            None
        } else {
            self.reasoning.first().map(String::as_str)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::stages::{
        ContextualStage, CredibilityStage, SafetyStage, parse_response,
    };

    fn safe() -> StageVerdict {
        parse_response::<SafetyStage>(
            r#"{"threat_level": 0, "violation_type": "none", "safety_status": "SAFE", "confidence": 0.95}"#,
        )
    }

    fn unsafe_() -> StageVerdict {
        parse_response::<SafetyStage>(
            r#"{"threat_level": 8, "violation_type": "threats", "safety_status": "BLOCK", "confidence": 0.95}"#,
        )
    }

    fn contextual_ok() -> StageVerdict {
        parse_response::<ContextualStage>(
            r#"{"intent_assessment": "legitimate", "context_appropriateness": "appropriate", "democratic_value": "medium", "recommendation": "approve", "confidence": 0.8}"#,
        )
    }

    fn credibility_ok() -> StageVerdict {
        parse_response::<CredibilityStage>(
            r#"{"professional_tone": "good", "credibility_assessment": "high", "final_recommendation": "approve", "confidence": 0.85}"#,
        )
    }

    fn credibility_bad() -> StageVerdict {
        parse_response::<CredibilityStage>("nope")
    }

    #[test]
    fn unanimous_approval() {
        let decision = ConsensusDecision::aggregate(&[safe(), contextual_ok(), credibility_ok()]);
        assert!(decision.approved);
        assert_eq!(decision.final_decision, FinalDecision::Approve);
        assert_eq!(decision.reasoning, vec![ALL_APPROVE.to_string()]);
        assert_eq!(decision.votes.len(), 3);
        assert!(decision.votes.iter().all(|v| v.approved));
        assert!(decision.rejection_reason().is_none());
    }

    #[test]
    fn first_block_decides_and_stops() {
        let decision = ConsensusDecision::aggregate(&[unsafe_(), contextual_ok()]);
        assert!(!decision.approved);
        assert_eq!(decision.votes.len(), 1);
        assert_eq!(decision.votes[0].agent, AgentKind::Safety);
        assert!(decision.reasoning[0].starts_with("Safety: BLOCK"));
    }

    #[test]
    fn later_dissent_blocks_after_earlier_approvals() {
        let decision = ConsensusDecision::aggregate(&[safe(), contextual_ok(), credibility_bad()]);
        assert!(!decision.approved);
        assert_eq!(decision.votes.len(), 3);
        assert!(decision.votes[0].approved);
        assert!(!decision.votes[2].approved);
        assert!(decision.rejection_reason().unwrap().starts_with("Credibility: block"));
    }

    #[test]
    fn any_block_in_any_position_rejects() {
        let stages = [safe(), contextual_ok(), credibility_ok()];
        for blocked in 0..stages.len() {
            let mut verdicts: Vec<StageVerdict> = stages[..=blocked].to_vec();
            verdicts[blocked] = match verdicts[blocked].agent {
                AgentKind::Safety => parse_response::<SafetyStage>(""),
                AgentKind::Contextual => parse_response::<ContextualStage>(""),
                AgentKind::Credibility => parse_response::<CredibilityStage>(""),
            };
            let decision = ConsensusDecision::aggregate(&verdicts);
            assert!(!decision.approved, "block at position {blocked} must reject");
            assert_eq!(decision.votes.len(), blocked + 1);
        }
    }

    #[test]
    fn cancelled_keeps_cast_votes_and_blocks() {
        let decision = ConsensusDecision::cancelled(&[safe()]);
        assert!(!decision.approved);
        assert_eq!(decision.votes.len(), 1);
        assert!(decision.votes[0].approved);
        assert!(decision.reasoning[0].contains("cancelled"));
    }

    #[test]
    fn no_votes_is_not_consent() {
        let decision = ConsensusDecision::aggregate(&[]);
        assert!(!decision.approved);
        assert_eq!(decision.final_decision, FinalDecision::Block);
    }
}
