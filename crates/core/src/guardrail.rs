//! Output moderation bound to a scenario's company identity.
//!
//! The transport evaluates every completed agent output before releasing it.
//! A blocked verdict is an ordinary result, never an error: the caller swaps in
//! [`GuardrailVerdict::fallback_message`] and leaves a breadcrumb.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModerationCategory {
    Offensive,
    OffBrand,
    Violence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "classification", rename_all = "snake_case")]
pub enum GuardrailVerdict {
    Pass,
    Blocked {
        category: ModerationCategory,
        rationale: String,
        /// Safe message to show in place of the blocked output.
        fallback_message: String,
    },
}

impl GuardrailVerdict {
    pub fn is_blocked(&self) -> bool {
        matches!(self, GuardrailVerdict::Blocked { .. })
    }

    pub fn fallback_message(&self) -> Option<&str> {
        match self {
            GuardrailVerdict::Pass => None,
            GuardrailVerdict::Blocked {
                fallback_message, ..
            } => Some(fallback_message),
        }
    }
}

const OFFENSIVE_TERMS: &[&str] = &["idiot", "stupid", "moron", "shut up"];
const VIOLENCE_TERMS: &[&str] = &["kill you", "hurt you", "beat you up", "attack you"];
const DISPARAGING_TERMS: &[&str] = &["scam", "rip-off", "ripoff", "worst company", "terrible company"];

#[derive(Debug, Clone)]
pub struct GuardrailPolicy {
    company_name: String,
    rules: Vec<(ModerationCategory, Vec<String>)>,
}

impl GuardrailPolicy {
    pub fn new(company_name: impl Into<String>) -> Self {
        let terms = |list: &[&str]| list.iter().map(|t| t.to_string()).collect::<Vec<_>>();
        Self {
            company_name: company_name.into(),
            rules: vec![
                (ModerationCategory::Offensive, terms(OFFENSIVE_TERMS)),
                (ModerationCategory::Violence, terms(VIOLENCE_TERMS)),
            ],
        }
    }

    /// Adds extra blocked phrases for a category.
    pub fn with_terms<I, S>(mut self, category: ModerationCategory, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let terms: Vec<String> = terms.into_iter().map(|t| t.into().to_lowercase()).collect();
        match self.rules.iter_mut().find(|(c, _)| *c == category) {
            Some((_, existing)) => existing.extend(terms),
            None => self.rules.push((category, terms)),
        }
        self
    }

    pub fn company_name(&self) -> &str {
        &self.company_name
    }

    pub fn evaluate(&self, candidate_output: &str) -> GuardrailVerdict {
        let text = candidate_output.to_lowercase();

        for (category, terms) in &self.rules {
            if let Some(term) = terms.iter().find(|t| text.contains(t.as_str())) {
                return self.blocked(*category, format!("output contains '{term}'"));
            }
        }

        let company = self.company_name.to_lowercase();
        if !company.is_empty() && text.contains(&company) {
            if let Some(term) = DISPARAGING_TERMS.iter().find(|t| text.contains(*t)) {
                return self.blocked(
                    ModerationCategory::OffBrand,
                    format!("output disparages {} ('{term}')", self.company_name),
                );
            }
        }

        GuardrailVerdict::Pass
    }

    fn blocked(&self, category: ModerationCategory, rationale: String) -> GuardrailVerdict {
        GuardrailVerdict::Blocked {
            category,
            rationale,
            fallback_message: format!(
                "Sorry, I can't help with that. Is there anything else I can do for you at {}?",
                self.company_name
            ),
        }
    }
}
