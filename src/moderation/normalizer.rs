//! Input normalizer: deterministic, advisory content fingerprint.
//!
//! Never blocks. The fingerprint is attached to the result and shown to the
//! classifiers as context, nothing more.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::safety::{InjectionSignal, detect_injection};

static URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)\bhttps?://[^\s<>"')\]]+"#).unwrap());

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").unwrap());

static PHONE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:\+?1[\s.-]?)?\(?\b\d{3}\)?[\s.-]?\d{3}[\s.-]?\d{4}\b").unwrap()
});

static SSN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap());

static CARD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(?:\d[ -]?){13,16}\b").unwrap());

/// Personally-identifying patterns present in the body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PiiFlags {
    pub email: bool,
    pub phone: bool,
    pub ssn: bool,
    pub credit_card: bool,
}

impl PiiFlags {
    pub fn any(&self) -> bool {
        self.email || self.phone || self.ssn || self.credit_card
    }

    fn labels(&self) -> Vec<&'static str> {
        let mut labels = Vec::new();
        if self.email {
            labels.push("email address");
        }
        if self.phone {
            labels.push("phone number");
        }
        if self.ssn {
            labels.push("SSN-like number");
        }
        if self.credit_card {
            labels.push("card-like number");
        }
        labels
    }
}

/// Advisory signals computed from the message body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentFingerprint {
    pub char_count: usize,
    pub word_count: usize,
    pub urls: Vec<String>,
    pub pii: PiiFlags,
    pub injection_signals: Vec<InjectionSignal>,
}

impl ContentFingerprint {
    /// Build the fingerprint for a message body.
    pub fn analyze(body: &str) -> Self {
        let urls = URL_RE
            .find_iter(body)
            .map(|m| m.as_str().trim_end_matches(['.', ',', ';', ':']).to_string())
            .collect();

        let ssn = SSN_RE.is_match(body);
        let pii = PiiFlags {
            email: EMAIL_RE.is_match(body),
            // An SSN also matches the loose phone pattern; report it once.
            phone: !ssn && PHONE_RE.is_match(body),
            ssn,
            credit_card: CARD_RE.find_iter(body).any(|m| luhn_valid(m.as_str())),
        };

        Self {
            char_count: body.chars().count(),
            word_count: body.split_whitespace().count(),
            urls,
            pii,
            injection_signals: detect_injection(body),
        }
    }

    /// Compact one-paragraph summary for classifier prompts.
    pub fn summary(&self) -> String {
        let mut parts = vec![format!(
            "{} characters, {} words",
            self.char_count, self.word_count
        )];
        if !self.urls.is_empty() {
            parts.push(format!("{} link(s)", self.urls.len()));
        }
        let pii = self.pii.labels();
        if !pii.is_empty() {
            parts.push(format!("contains {}", pii.join(", ")));
        }
        if !self.injection_signals.is_empty() {
            let names: Vec<&str> = self
                .injection_signals
                .iter()
                .map(|s| s.pattern.as_str())
                .collect();
            parts.push(format!("possible prompt-injection phrasing ({})", names.join(", ")));
        }
        parts.join("; ")
    }
}

fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=16).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}
