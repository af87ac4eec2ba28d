use core::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiseaseCategory {
    EpidemicProne,
    Endemic,
    Neglected,
    Other,
}

/// Reporting priority. Ordered so that `High < Medium < Low` sorts urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// How quickly a notifiable disease must be escalated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReportingTimeframe {
    #[serde(rename = "immediate")]
    Immediate,
    #[serde(rename = "24h")]
    Within24Hours,
    #[serde(rename = "7d")]
    Within7Days,
    #[serde(rename = "30d")]
    Within30Days,
}

impl ReportingTimeframe {
    /// Hour bound of the window; `None` for `immediate`.
    pub fn as_hours(&self) -> Option<u32> {
        match self {
            ReportingTimeframe::Immediate => None,
            ReportingTimeframe::Within24Hours => Some(24),
            ReportingTimeframe::Within7Days => Some(168),
            ReportingTimeframe::Within30Days => Some(720),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportingTimeframe::Immediate => "immediate",
            ReportingTimeframe::Within24Hours => "24h",
            ReportingTimeframe::Within7Days => "7d",
            ReportingTimeframe::Within30Days => "30d",
        }
    }
}

impl fmt::Display for ReportingTimeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference data for one notifiable disease. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseDefinition {
    pub code: String,
    pub name: String,
    pub category: DiseaseCategory,
    pub priority: Priority,
    #[serde(default)]
    pub icd11_code: Option<String>,
    pub symptoms: Vec<String>,
    pub case_definition: String,
    /// Case count that triggers an alert.
    pub reporting_threshold: u32,
    pub reporting_timeframe: ReportingTimeframe,
    pub requires_lab_confirmation: bool,
    pub contact_tracing_required: bool,
}

impl DiseaseDefinition {
    pub fn has_symptom(&self, symptom: &str) -> bool {
        self.symptoms.iter().any(|s| s == symptom)
    }
}
