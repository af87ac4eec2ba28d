use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

use idsr_catalog::{DiseaseCatalog, DiseaseDefinition};

use crate::alert::DiseaseAlert;

/// Maximum number of suggestions returned by [`AlertRuleEngine::suggest`].
pub const MAX_SUGGESTIONS: usize = 5;

/// One ranked diagnosis suggestion.
#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion<'a> {
    pub disease: &'a DiseaseDefinition,
    /// Distinct input symptoms found in the disease's symptom list.
    pub matched: u32,
    /// `matched * matched / disease.symptoms.len()`.
    pub score: f64,
}

impl Suggestion<'_> {
    /// Exact comparison of `m1²/n1` against `m2²/n2` without floating point.
    fn cmp_score(&self, other: &Self) -> Ordering {
        let lhs = u64::from(self.matched).pow(2) * other.disease.symptoms.len() as u64;
        let rhs = u64::from(other.matched).pow(2) * self.disease.symptoms.len() as u64;
        lhs.cmp(&rhs)
    }
}

/// Rule-based diagnosis hints and threshold alerts over a disease catalog.
///
/// Pure and deterministic: the same catalog and inputs always give the same
/// answer. Unknown disease codes never alert.
#[derive(Debug, Clone)]
pub struct AlertRuleEngine {
    catalog: Arc<DiseaseCatalog>,
}

impl AlertRuleEngine {
    pub fn new(catalog: Arc<DiseaseCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &DiseaseCatalog {
        &self.catalog
    }

    /// Rank catalog diseases by precision-weighted symptom overlap.
    ///
    /// Duplicate input symptoms count once. Diseases with no overlap are
    /// dropped; ties keep catalog order.
    pub fn suggest<S: AsRef<str>>(&self, symptoms: &[S]) -> Vec<Suggestion<'_>> {
        let wanted: BTreeSet<&str> = symptoms.iter().map(|s| s.as_ref()).collect();
        if wanted.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<Suggestion<'_>> = self
            .catalog
            .iter()
            .filter_map(|disease| {
                let matched = disease
                    .symptoms
                    .iter()
                    .filter(|s| wanted.contains(s.as_str()))
                    .count() as u32;
                if matched == 0 {
                    return None;
                }
                let ratio = f64::from(matched) / disease.symptoms.len() as f64;
                Some(Suggestion {
                    disease,
                    matched,
                    score: f64::from(matched) * ratio,
                })
            })
            .collect();

        // Stable sort keeps catalog order among equal scores.
        scored.sort_by(|a, b| b.cmp_score(a));
        scored.truncate(MAX_SUGGESTIONS);
        scored
    }

    /// Whether `case_count` cases observed over `elapsed_hours` warrant an
    /// immediate alert for `disease_code`.
    pub fn should_alert(&self, disease_code: &str, case_count: u32, elapsed_hours: u32) -> bool {
        let Some(disease) = self.catalog.get(disease_code) else {
            return false;
        };
        match disease.reporting_timeframe.as_hours() {
            None => case_count >= disease.reporting_threshold,
            Some(bound) => elapsed_hours <= bound && case_count >= disease.reporting_threshold,
        }
    }

    /// [`AlertRuleEngine::should_alert`] plus the payload to escalate.
    pub fn evaluate(
        &self,
        disease_code: &str,
        case_count: u32,
        elapsed_hours: u32,
    ) -> Option<DiseaseAlert> {
        if !self.should_alert(disease_code, case_count, elapsed_hours) {
            return None;
        }
        let disease = self.catalog.get(disease_code)?;
        Some(DiseaseAlert::new(disease, case_count, elapsed_hours))
    }
}

impl Default for AlertRuleEngine {
    fn default() -> Self {
        Self::new(DiseaseCatalog::shared())
    }
}
