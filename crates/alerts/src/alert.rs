use serde::{Deserialize, Serialize};

use idsr_catalog::{DiseaseDefinition, Priority, ReportingTimeframe};

/// Threshold breach for a notifiable disease.
///
/// This is an insight for escalation (notification, dashboard banner), not a
/// state change: raising one never mutates case or outbreak records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiseaseAlert {
    pub disease_code: String,
    pub disease_name: String,
    pub priority: Priority,
    pub case_count: u32,
    pub reporting_threshold: u32,
    pub reporting_timeframe: ReportingTimeframe,
    pub elapsed_hours: u32,
    pub contact_tracing_required: bool,
    pub explanation: String,
}

impl DiseaseAlert {
    pub(crate) fn new(disease: &DiseaseDefinition, case_count: u32, elapsed_hours: u32) -> Self {
        let explanation = match disease.reporting_timeframe.as_hours() {
            None => format!(
                "{} ({}): {} case(s) reached the immediate-report threshold of {}",
                disease.name, disease.code, case_count, disease.reporting_threshold
            ),
            Some(bound) => format!(
                "{} ({}): {} case(s) within {}h reached the threshold of {} per {}",
                disease.name,
                disease.code,
                case_count,
                elapsed_hours.min(bound),
                disease.reporting_threshold,
                disease.reporting_timeframe
            ),
        };

        Self {
            disease_code: disease.code.clone(),
            disease_name: disease.name.clone(),
            priority: disease.priority,
            case_count,
            reporting_threshold: disease.reporting_threshold,
            reporting_timeframe: disease.reporting_timeframe,
            elapsed_hours,
            contact_tracing_required: disease.contact_tracing_required,
            explanation,
        }
    }
}
