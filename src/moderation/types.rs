//! Shared types for the moderation pipeline.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::moderation::parse::ParseSource;
use crate::store::templates::Template;

// ── Request ─────────────────────────────────────────────────────────

/// Immutable input to one moderation attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationRequest {
    /// Template (message) identifier.
    pub message_id: String,
    /// Author identifier.
    pub author_id: String,
    /// Subject line shown to recipients.
    pub title: String,
    /// Message body as written by the author.
    pub body: String,
    /// Intended recipients (offices, organisations, addresses).
    pub recipients: Vec<String>,
    /// Delivery-route hint from the template metadata.
    pub delivery_method: String,
}

impl ModerationRequest {
    /// Build a request from a stored template.
    pub fn from_template(template: &Template) -> Self {
        Self {
            message_id: template.id.clone(),
            author_id: template.author_id.clone(),
            title: template.title.clone(),
            body: template.body.clone(),
            recipients: template.recipients.clone(),
            delivery_method: template.delivery_method.clone(),
        }
    }

    /// Short preview of the body for logs.
    pub fn preview(&self) -> String {
        self.body.chars().take(100).collect()
    }
}

// ── Route ───────────────────────────────────────────────────────────

/// Delivery channel class; decides which stages run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteType {
    Congressional,
    DirectOutreach,
}

impl RouteType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Congressional => "congressional",
            Self::DirectOutreach => "direct_outreach",
        }
    }
}

// ── Stage enums ─────────────────────────────────────────────────────

/// Implements `as_str`, `Display` and case-insensitive `FromStr` for a
/// unit-only enum whose wire values are listed explicitly.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $wire:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let normalised = s.trim().to_ascii_lowercase().replace([' ', '-'], "_");
                match normalised.as_str() {
                    $($wire => Ok(Self::$variant),)+
                    other => Err(format!("unexpected {} value '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

/// Which classifier produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentKind {
    Safety,
    Contextual,
    Credibility,
}

wire_enum!(AgentKind {
    Safety => "safety",
    Contextual => "contextual",
    Credibility => "credibility",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SafetyStatus {
    Safe,
    Block,
}

wire_enum!(SafetyStatus {
    Safe => "safe",
    Block => "block",
});

/// Severe-harm category reported by the safety classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationType {
    None,
    Hate,
    Harassment,
    Violence,
    Threats,
    SelfHarm,
    Sexual,
    Illegal,
    Spam,
    Unknown,
}

wire_enum!(ViolationType {
    None => "none",
    Hate => "hate",
    Harassment => "harassment",
    Violence => "violence",
    Threats => "threats",
    SelfHarm => "self_harm",
    Sexual => "sexual",
    Illegal => "illegal",
    Spam => "spam",
    Unknown => "unknown",
});

impl ViolationType {
    /// Lenient mapping for model output: synonyms are folded, anything
    /// unrecognised becomes `Unknown` (which blocks).
    pub fn from_model(s: &str) -> Self {
        if let Ok(v) = s.parse() {
            return v;
        }
        match s.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "hate_speech" => Self::Hate,
            "threat" | "violent_threat" => Self::Threats,
            "selfharm" | "suicide" => Self::SelfHarm,
            "sexual_content" | "explicit" => Self::Sexual,
            "illegal_activity" => Self::Illegal,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentAssessment {
    Legitimate,
    Problematic,
}

wire_enum!(IntentAssessment {
    Legitimate => "legitimate",
    Problematic => "problematic",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextAppropriateness {
    Appropriate,
    Inappropriate,
}

wire_enum!(ContextAppropriateness {
    Appropriate => "appropriate",
    Inappropriate => "inappropriate",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DemocraticValue {
    High,
    Medium,
    Low,
    None,
}

wire_enum!(DemocraticValue {
    High => "high",
    Medium => "medium",
    Low => "low",
    None => "none",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    Block,
}

wire_enum!(Recommendation {
    Approve => "approve",
    Block => "block",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfessionalTone {
    Excellent,
    Good,
    Poor,
}

wire_enum!(ProfessionalTone {
    Excellent => "excellent",
    Good => "good",
    Poor => "poor",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredibilityLevel {
    High,
    Medium,
    Low,
}

wire_enum!(CredibilityLevel {
    High => "high",
    Medium => "medium",
    Low => "low",
});

// ── Stage details ───────────────────────────────────────────────────

/// Safety triage fields. `final_status` is re-derived, never copied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SafetyDetail {
    pub threat_level: u8,
    pub violation_type: ViolationType,
    /// What the model claimed.
    pub model_status: SafetyStatus,
    /// What the pipeline decided.
    pub final_status: SafetyStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextualDetail {
    pub intent_assessment: IntentAssessment,
    pub context_appropriateness: ContextAppropriateness,
    pub democratic_value: DemocraticValue,
    pub model_recommendation: Recommendation,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CredibilityDetail {
    pub professional_tone: ProfessionalTone,
    pub credibility_assessment: CredibilityLevel,
    pub model_recommendation: Recommendation,
    pub final_recommendation: Recommendation,
}

/// Stage-specific structured fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageDetail {
    Safety(SafetyDetail),
    Contextual(ContextualDetail),
    Credibility(CredibilityDetail),
}

impl StageDetail {
    pub fn agent(&self) -> AgentKind {
        match self {
            Self::Safety(_) => AgentKind::Safety,
            Self::Contextual(_) => AgentKind::Contextual,
            Self::Credibility(_) => AgentKind::Credibility,
        }
    }

    /// Whether this stage's final, re-derived outcome lets the message through.
    pub fn approves(&self) -> bool {
        match self {
            Self::Safety(d) => d.final_status == SafetyStatus::Safe,
            Self::Contextual(d) => d.recommendation == Recommendation::Approve,
            Self::Credibility(d) => d.final_recommendation == Recommendation::Approve,
        }
    }
}

// ── Stage verdict ───────────────────────────────────────────────────

/// Token usage and estimated cost of one classifier call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageUsage {
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: Decimal,
    pub latency_ms: u64,
}

/// The structured, confidence-scored output of one classifier call.
///
/// Built only by the stage adapters; never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageVerdict {
    pub agent: AgentKind,
    pub detail: StageDetail,
    /// In [0, 1]. Zero when the verdict was forced closed.
    pub confidence: f64,
    /// Human-readable one-line reason.
    pub reasoning: String,
    /// Raw model text, kept for audit only.
    pub raw_response: String,
    /// How the fields were recovered.
    pub parse_source: ParseSource,
    /// Why the fail-closed default was applied, if it was.
    pub failure: Option<String>,
    pub usage: StageUsage,
}

impl StageVerdict {
    pub fn approved(&self) -> bool {
        self.detail.approves()
    }

    pub fn is_fail_closed(&self) -> bool {
        self.failure.is_some()
    }

    pub(crate) fn with_usage(mut self, usage: StageUsage) -> Self {
        self.usage = usage;
        self
    }
}
