//! Safety triage: fast severe-harm screen.

use serde::Deserialize;

use super::{ClassifierStage, StageContext};
use crate::moderation::parse::{ParseFailure, ParseSource, StageSchema, check_confidence, parse_field};
use crate::moderation::types::{
    AgentKind, SafetyDetail, SafetyStatus, StageDetail, StageUsage, StageVerdict, ViolationType,
};
use crate::safety::wrap_untrusted;

/// Threat level at or above which a message is blocked regardless of the
/// model's stated status.
pub const BLOCK_THRESHOLD: u8 = 3;

const MAX_THREAT_LEVEL: i64 = 10;

/// Expected classifier answer.
#[derive(Debug, Deserialize)]
pub struct SafetyWire {
    pub threat_level: i64,
    pub violation_type: String,
    pub safety_status: String,
    pub confidence: f64,
}

impl StageSchema for SafetyWire {
    const FIELDS: &'static [&'static str] =
        &["threat_level", "violation_type", "safety_status", "confidence"];
}

pub struct SafetyStage;

impl ClassifierStage for SafetyStage {
    type Wire = SafetyWire;

    const AGENT: AgentKind = AgentKind::Safety;

    fn system_prompt() -> String {
        "You are a content safety screener for a civic messaging platform. Citizens use it to \
         write to elected officials and organisations. Screen the message for severe harm only: \
         hate, harassment, violence, threats, self-harm, sexual content, illegal activity, spam.\n\n\
         Strong political opinions, criticism of officials and passionate advocacy are NOT \
         violations.\n\n\
         Respond with ONLY a JSON object:\n\
         {\"threat_level\": 0, \"violation_type\": \"none\", \"safety_status\": \"SAFE\", \"confidence\": 0.0}\n\n\
         Fields:\n\
         - threat_level: integer 0-10 (0 = harmless, 10 = severe)\n\
         - violation_type: one of none, hate, harassment, violence, threats, self_harm, sexual, illegal, spam\n\
         - safety_status: SAFE or BLOCK\n\
         - confidence: number 0.0-1.0"
            .to_string()
    }

    fn user_prompt(ctx: &StageContext<'_>) -> String {
        let mut prompt = String::with_capacity(ctx.request.body.len() + 512);
        prompt.push_str(&format!("Delivery route: {}\n", ctx.route.as_str()));
        prompt.push_str(&format!("Recipients: {}\n", ctx.request.recipients.len()));
        prompt.push_str(&format!("Content signals: {}\n\n", ctx.fingerprint.summary()));
        prompt.push_str(&wrap_untrusted(
            "message",
            &format!("Subject: {}\n\n{}", ctx.request.title, ctx.request.body),
        ));
        prompt
    }

    fn from_wire(
        wire: SafetyWire,
        raw: &str,
        source: ParseSource,
    ) -> Result<StageVerdict, ParseFailure> {
        if !(0..=MAX_THREAT_LEVEL).contains(&wire.threat_level) {
            return Err(ParseFailure {
                reason: format!("threat_level {} out of range [0, 10]", wire.threat_level),
            });
        }
        let threat_level = wire.threat_level as u8;
        let confidence = check_confidence(wire.confidence)?;
        let model_status: SafetyStatus = parse_field("safety_status", &wire.safety_status)?;
        let violation_type = ViolationType::from_model(&wire.violation_type);

        let final_status = derive_final_status(threat_level, violation_type, model_status);

        let reasoning = match final_status {
            SafetyStatus::Safe => format!("Safety: SAFE (threat level {threat_level})"),
            SafetyStatus::Block if model_status == SafetyStatus::Safe => format!(
                "Safety: BLOCK (threat level {threat_level}, violation: {violation_type}; \
                 overrides classifier's SAFE)"
            ),
            SafetyStatus::Block => format!(
                "Safety: BLOCK (threat level {threat_level}, violation: {violation_type})"
            ),
        };

        Ok(StageVerdict {
            agent: AgentKind::Safety,
            detail: StageDetail::Safety(SafetyDetail {
                threat_level,
                violation_type,
                model_status,
                final_status,
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
            agent: AgentKind::Safety,
            detail: StageDetail::Safety(SafetyDetail {
                threat_level: 10,
                violation_type: ViolationType::Unknown,
                model_status: SafetyStatus::Block,
                final_status: SafetyStatus::Block,
            }),
            confidence: 0.0,
            reasoning: format!("Safety: BLOCK (classifier response unusable: {reason})"),
            raw_response: raw.to_string(),
            parse_source: ParseSource::FailClosed,
            failure: Some(reason.to_string()),
            usage: StageUsage::default(),
        }
    }
}

/// The model's SAFE is never trusted on its own.
pub fn derive_final_status(
    threat_level: u8,
    violation_type: ViolationType,
    model_status: SafetyStatus,
) -> SafetyStatus {
    if threat_level >= BLOCK_THRESHOLD
        || violation_type == ViolationType::Unknown
        || model_status == SafetyStatus::Block
    {
        SafetyStatus::Block
    } else {
        SafetyStatus::Safe
    }
}
