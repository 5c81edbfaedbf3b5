//! Credibility review: tone and stakeholder credibility for direct outreach.

use serde::Deserialize;

use super::{ClassifierStage, StageContext, describe_prior};
use crate::moderation::parse::{ParseFailure, ParseSource, StageSchema, check_confidence, parse_field};
use crate::moderation::types::{
    AgentKind, CredibilityDetail, CredibilityLevel, ProfessionalTone, Recommendation,
    StageDetail, StageUsage, StageVerdict,
};
use crate::safety::wrap_untrusted;

#[derive(Debug, Deserialize)]
pub struct CredibilityWire {
    pub professional_tone: String,
    pub credibility_assessment: String,
    pub final_recommendation: String,
    pub confidence: f64,
}

impl StageSchema for CredibilityWire {
    const FIELDS: &'static [&'static str] = &[
        "professional_tone",
        "credibility_assessment",
        "final_recommendation",
        "confidence",
    ];
}

pub struct CredibilityStage;

impl ClassifierStage for CredibilityStage {
    type Wire = CredibilityWire;

    const AGENT: AgentKind = AgentKind::Credibility;

    fn system_prompt() -> String {
        "This message will be delivered directly to organisations and stakeholders, not through \
         a legislative channel, so it reaches people who did not opt in to constituent mail. \
         Judge whether it is fit to send in the platform's name.\n\n\
         Assess professional tone and whether the message presents itself credibly (clear ask, \
         no fabricated claims of authority, no impersonation).\n\n\
         Respond with ONLY a JSON object:\n\
         {\"professional_tone\": \"good\", \"credibility_assessment\": \"high\", \
         \"final_recommendation\": \"approve\", \"confidence\": 0.0}\n\n\
         Allowed values: professional_tone excellent|good|poor; credibility_assessment \
         high|medium|low; final_recommendation approve|block; confidence 0.0-1.0."
            .to_string()
    }

    fn user_prompt(ctx: &StageContext<'_>) -> String {
        let mut prompt = String::with_capacity(ctx.request.body.len() + 1024);
        prompt.push_str(&format!(
            "Recipients ({}): {}\n",
            ctx.request.recipients.len(),
            ctx.request
                .recipients
                .iter()
                .take(10)
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        ));
        prompt.push_str(&format!("Earlier reviews:\n{}\n\n", describe_prior(ctx.prior)));
        prompt.push_str(&wrap_untrusted(
            "message",
            &format!("Subject: {}\n\n{}", ctx.request.title, ctx.request.body),
        ));
        prompt
    }

    fn from_wire(
        wire: CredibilityWire,
        raw: &str,
        source: ParseSource,
    ) -> Result<StageVerdict, ParseFailure> {
        let tone: ProfessionalTone = parse_field("professional_tone", &wire.professional_tone)?;
        let credibility: CredibilityLevel =
            parse_field("credibility_assessment", &wire.credibility_assessment)?;
        let model_recommendation: Recommendation =
            parse_field("final_recommendation", &wire.final_recommendation)?;
        let confidence = check_confidence(wire.confidence)?;

        let final_recommendation = derive_recommendation(tone, credibility, model_recommendation);
        let reasoning = match final_recommendation {
            Recommendation::Approve => {
                format!("Credibility: approve (tone {tone}, credibility {credibility})")
            }
            Recommendation::Block => {
                let mut reasons = Vec::new();
                if tone == ProfessionalTone::Poor {
                    reasons.push("poor professional tone");
                }
                if credibility == CredibilityLevel::Low {
                    reasons.push("low credibility");
                }
                if model_recommendation == Recommendation::Block {
                    reasons.push("classifier recommended block");
                }
                format!("Credibility: block ({})", reasons.join(", "))
            }
        };

        Ok(StageVerdict {
            agent: AgentKind::Credibility,
            detail: StageDetail::Credibility(CredibilityDetail {
                professional_tone: tone,
                credibility_assessment: credibility,
                model_recommendation,
                final_recommendation,
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
            agent: AgentKind::Credibility,
            detail: StageDetail::Credibility(CredibilityDetail {
                professional_tone: ProfessionalTone::Poor,
                credibility_assessment: CredibilityLevel::Low,
                model_recommendation: Recommendation::Block,
                final_recommendation: Recommendation::Block,
            }),
            confidence: 0.0,
            reasoning: format!("Credibility: block (classifier response unusable: {reason})"),
            raw_response: raw.to_string(),
            parse_source: ParseSource::FailClosed,
            failure: Some(reason.to_string()),
            usage: StageUsage::default(),
        }
    }
}

pub fn derive_recommendation(
    tone: ProfessionalTone,
    credibility: CredibilityLevel,
    model_recommendation: Recommendation,
) -> Recommendation {
    if tone == ProfessionalTone::Poor
        || credibility == CredibilityLevel::Low
        || model_recommendation == Recommendation::Block
    {
        Recommendation::Block
    } else {
        Recommendation::Approve
    }
}
