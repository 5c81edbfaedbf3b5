//! Contextual analysis: intent, appropriateness and civic value.
//!
//! Runs only after safety triage resolved SAFE. Any single negative signal
//! vetoes approval.

use serde::Deserialize;

use super::{ClassifierStage, StageContext, describe_prior};
use crate::moderation::parse::{ParseFailure, ParseSource, StageSchema, check_confidence, parse_field};
use crate::moderation::types::{
    AgentKind, ContextAppropriateness, ContextualDetail, DemocraticValue, IntentAssessment,
    Recommendation, StageDetail, StageUsage, StageVerdict,
};
use crate::safety::wrap_untrusted;

#[derive(Debug, Deserialize)]
pub struct ContextualWire {
    pub intent_assessment: String,
    pub context_appropriateness: String,
    pub democratic_value: String,
    pub recommendation: String,
    pub confidence: f64,
}

impl StageSchema for ContextualWire {
    const FIELDS: &'static [&'static str] = &[
        "intent_assessment",
        "context_appropriateness",
        "democratic_value",
        "recommendation",
        "confidence",
    ];
}

pub struct ContextualStage;

impl ClassifierStage for ContextualStage {
    type Wire = ContextualWire;

    const AGENT: AgentKind = AgentKind::Contextual;

    fn system_prompt() -> String {
        "You review messages that citizens send to public officials and organisations. The \
         message already passed an automated severe-harm screen; that screen can be fooled, so \
         judge independently.\n\n\
         Assess:\n\
         - intent: is this a good-faith attempt to communicate a view or request (legitimate), \
           or is it manipulation, intimidation, spam, or abuse disguised as advocacy (problematic)?\n\
         - context: is the content appropriate for its recipients?\n\
         - democratic value: does it contribute to civic discourse?\n\n\
         Respond with ONLY a JSON object:\n\
         {\"intent_assessment\": \"legitimate\", \"context_appropriateness\": \"appropriate\", \
         \"democratic_value\": \"high\", \"recommendation\": \"approve\", \"confidence\": 0.0}\n\n\
         Allowed values: intent_assessment legitimate|problematic; context_appropriateness \
         appropriate|inappropriate; democratic_value high|medium|low|none; recommendation \
         approve|block; confidence 0.0-1.0."
            .to_string()
    }

    fn user_prompt(ctx: &StageContext<'_>) -> String {
        let mut prompt = String::with_capacity(ctx.request.body.len() + 1024);
        prompt.push_str(&format!("Delivery route: {}\n", ctx.route.as_str()));
        if !ctx.request.recipients.is_empty() {
            let shown: Vec<&str> = ctx
                .request
                .recipients
                .iter()
                .take(10)
                .map(String::as_str)
                .collect();
            prompt.push_str(&format!("Recipients: {}\n", shown.join(", ")));
        }
        prompt.push_str(&format!("Content signals: {}\n", ctx.fingerprint.summary()));
        prompt.push_str(&format!("Earlier screening:\n{}\n\n", describe_prior(ctx.prior)));
        prompt.push_str(&wrap_untrusted(
            "message",
            &format!("Subject: {}\n\n{}", ctx.request.title, ctx.request.body),
        ));
        prompt
    }

    fn from_wire(
        wire: ContextualWire,
        raw: &str,
        source: ParseSource,
    ) -> Result<StageVerdict, ParseFailure> {
        let intent: IntentAssessment = parse_field("intent_assessment", &wire.intent_assessment)?;
        let context: ContextAppropriateness =
            parse_field("context_appropriateness", &wire.context_appropriateness)?;
        let democratic_value: DemocraticValue =
            parse_field("democratic_value", &wire.democratic_value)?;
        let model_recommendation: Recommendation =
            parse_field("recommendation", &wire.recommendation)?;
        let confidence = check_confidence(wire.confidence)?;

        let recommendation = derive_recommendation(intent, context, model_recommendation);

        let reasoning = match recommendation {
            Recommendation::Approve => format!(
                "Contextual: approve (intent {intent}, {context}, democratic value {democratic_value})"
            ),
            Recommendation::Block => {
                let mut reasons = Vec::new();
                if intent == IntentAssessment::Problematic {
                    reasons.push("problematic intent");
                }
                if context == ContextAppropriateness::Inappropriate {
                    reasons.push("inappropriate for recipients");
                }
                if model_recommendation == Recommendation::Block {
                    reasons.push("classifier recommended block");
                }
                format!("Contextual: block ({})", reasons.join(", "))
            }
        };

        Ok(StageVerdict {
            agent: AgentKind::Contextual,
            detail: StageDetail::Contextual(ContextualDetail {
                intent_assessment: intent,
                context_appropriateness: context,
                democratic_value,
                model_recommendation,
                recommendation,
            }),
            confidence,
            reasoning,
            raw_response: raw.to_string(),
            parse_source: source,
            failure: None,
            usage: StageUsage::default(),
        })
    }

    fn fail_closed(raw: &str, reason: &str) -> StageVerdict {
        StageVerdict {
            agent: AgentKind::Contextual,
            detail: StageDetail::Contextual(ContextualDetail {
                intent_assessment: IntentAssessment::Problematic,
                context_appropriateness: ContextAppropriateness::Inappropriate,
                democratic_value: DemocraticValue::None,
                model_recommendation: Recommendation::Block,
                recommendation: Recommendation::Block,
            }),
            confidence: 0.0,
            reasoning: format!("Contextual: block (classifier response unusable: {reason})"),
            raw_response: raw.to_string(),
            parse_source: ParseSource::FailClosed,
            failure: Some(reason.to_string()),
            usage: StageUsage::default(),
        }
    }
}

/// Any single negative signal blocks.
pub fn derive_recommendation(
    intent: IntentAssessment,
    context: ContextAppropriateness,
    model_recommendation: Recommendation,
) -> Recommendation {
    if intent == IntentAssessment::Problematic
        || context == ContextAppropriateness::Inappropriate
        || model_recommendation == Recommendation::Block
    {
        Recommendation::Block
    } else {
        Recommendation::Approve
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::moderation::stages::parse_response;

    fn detail(verdict: &StageVerdict) -> &ContextualDetail {
        match &verdict.detail {
            StageDetail::Contextual(d) => d,
            other => panic!("Expected contextual detail, got {:?}", other),
        }
    }

    #[test]
    fn clean_approve() {
        let verdict = parse_response::<ContextualStage>(
            r#"{"intent_assessment": "legitimate", "context_appropriateness": "appropriate", "democratic_value": "high", "recommendation": "approve", "confidence": 0.88}"#,
        );
        assert!(verdict.approved());
        assert_eq!(detail(&verdict).democratic_value, DemocraticValue::High);
    }

    #[test]
    fn empty_response_is_most_negative() {
        let verdict = parse_response::<ContextualStage>("");
        let d = detail(&verdict);
        assert_eq!(d.intent_assessment, IntentAssessment::Problematic);
        assert_eq!(d.context_appropriateness, ContextAppropriateness::Inappropriate);
        assert_eq!(d.democratic_value, DemocraticValue::None);
        assert_eq!(d.recommendation, Recommendation::Block);
        assert!(!verdict.approved());
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn single_negative_signal_vetoes_model_approve() {
        let verdict = parse_response::<ContextualStage>(
            r#"{"intent_assessment": "legitimate", "context_appropriateness": "inappropriate", "democratic_value": "high", "recommendation": "approve", "confidence": 0.9}"#,
        );
        assert!(!verdict.approved());
        assert_eq!(detail(&verdict).model_recommendation, Recommendation::Approve);
        assert!(verdict.reasoning.contains("inappropriate for recipients"));
    }

    #[test]
    fn veto_table() {
        use ContextAppropriateness::*;
        use IntentAssessment::*;
        use Recommendation::*;
        assert_eq!(derive_recommendation(Legitimate, Appropriate, Approve), Approve);
        assert_eq!(derive_recommendation(Problematic, Appropriate, Approve), Block);
        assert_eq!(derive_recommendation(Legitimate, Inappropriate, Approve), Block);
        assert_eq!(derive_recommendation(Legitimate, Appropriate, Block), Block);
    }

    #[test]
    fn low_democratic_value_alone_does_not_block() {
        let verdict = parse_response::<ContextualStage>(
            r#"{"intent_assessment": "legitimate", "context_appropriateness": "appropriate", "democratic_value": "low", "recommendation": "approve", "confidence": 0.7}"#,
        );
        assert!(verdict.approved());
    }

    #[test]
    fn unexpected_enum_value_fails_closed() {
        let verdict = parse_response::<ContextualStage>(
            r#"{"intent_assessment": "mixed", "context_appropriateness": "appropriate", "democratic_value": "high", "recommendation": "approve", "confidence": 0.9}"#,
        );
        assert_eq!(verdict.parse_source, ParseSource::FailClosed);
        assert!(verdict.failure.unwrap().contains("intent_assessment"));
    }
}
