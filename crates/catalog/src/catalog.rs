use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::builtin;
use crate::disease::DiseaseDefinition;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("duplicate disease code: {0}")]
    DuplicateCode(String),

    #[error("invalid definition for {code}: {reason}")]
    InvalidDefinition { code: String, reason: String },
}

/// In-memory list of notifiable diseases, loaded once at process start.
///
/// Read-only after construction; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiseaseCatalog {
    diseases: Vec<DiseaseDefinition>,
}

impl DiseaseCatalog {
    /// Build a catalog, rejecting duplicate codes and unusable definitions.
    pub fn new(diseases: Vec<DiseaseDefinition>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for d in &diseases {
            if !seen.insert(d.code.as_str()) {
                return Err(CatalogError::DuplicateCode(d.code.clone()));
            }
            if d.symptoms.is_empty() {
                return Err(CatalogError::InvalidDefinition {
                    code: d.code.clone(),
                    reason: "symptom list is empty".to_string(),
                });
            }
            if d.reporting_threshold == 0 {
                return Err(CatalogError::InvalidDefinition {
                    code: d.code.clone(),
                    reason: "reporting_threshold must be >= 1".to_string(),
                });
            }
        }
        Ok(Self { diseases })
    }

    /// The built-in WHO IDSR priority disease list.
    pub fn priority_diseases() -> Self {
        Self {
            diseases: builtin::priority_diseases(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::priority_diseases())
    }

    /// Load a catalog from a JSON array of definitions.
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let diseases: Vec<DiseaseDefinition> = serde_json::from_str(json)?;
        Self::new(diseases)
    }

    pub fn empty() -> Self {
        Self { diseases: Vec::new() }
    }

    pub fn get(&self, code: &str) -> Option<&DiseaseDefinition> {
        self.diseases.iter().find(|d| d.code == code)
    }

    /// Definitions in catalog order.
    pub fn iter(&self) -> impl Iterator<Item = &DiseaseDefinition> {
        self.diseases.iter()
    }

    pub fn len(&self) -> usize {
        self.diseases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diseases.is_empty()
    }

    /// Definitions ordered for pick lists: high priority first, catalog order
    /// within a priority.
    pub fn by_priority(&self) -> Vec<&DiseaseDefinition> {
        let mut out: Vec<&DiseaseDefinition> = self.diseases.iter().collect();
        out.sort_by_key(|d| d.priority);
        out
    }
}

impl Default for DiseaseCatalog {
    fn default() -> Self {
        Self::priority_diseases()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disease::{Priority, ReportingTimeframe};

    #[test]
    fn builtin_catalog_is_valid() {
        let builtin = DiseaseCatalog::priority_diseases();
        let rebuilt = DiseaseCatalog::new(builtin.iter().cloned().collect()).unwrap();
        assert_eq!(rebuilt.len(), 14);
    }

    #[test]
    fn lookup_by_code() {
        let catalog = DiseaseCatalog::priority_diseases();
        let mal = catalog.get("MAL").unwrap();
        assert_eq!(mal.reporting_threshold, 10);
        assert_eq!(mal.reporting_timeframe, ReportingTimeframe::Within7Days);
        assert!(catalog.get("NOPE").is_none());
    }

    #[test]
    fn by_priority_puts_high_first_and_is_stable() {
        let catalog = DiseaseCatalog::priority_diseases();
        let ordered = catalog.by_priority();
        assert_eq!(ordered[0].code, "CHOL");
        let first_medium = ordered.iter().position(|d| d.priority == Priority::Medium).unwrap();
        assert!(ordered[..first_medium].iter().all(|d| d.priority == Priority::High));
        assert_eq!(ordered[first_medium].code, "MAL");
    }

    #[test]
    fn json_catalog_round_trip_and_validation() {
        let json = r#"[{
            "code": "X", "name": "Example", "category": "other", "priority": "low",
            "symptoms": ["fever"], "case_definition": "n/a",
            "reporting_threshold": 3, "reporting_timeframe": "24h",
            "requires_lab_confirmation": false, "contact_tracing_required": false
        }]"#;
        let catalog = DiseaseCatalog::from_json_str(json).unwrap();
        assert_eq!(catalog.get("X").unwrap().reporting_timeframe.as_hours(), Some(24));

        let dup = format!("[{0},{0}]", &json[1..json.len() - 1]);
        assert!(matches!(
            DiseaseCatalog::from_json_str(&dup),
            Err(CatalogError::DuplicateCode(code)) if code == "X"
        ));
    }

    #[test]
    fn unknown_timeframe_is_a_parse_error() {
        let json = r#"[{
            "code": "X", "name": "Example", "category": "other", "priority": "low",
            "symptoms": ["fever"], "case_definition": "n/a",
            "reporting_threshold": 3, "reporting_timeframe": "fortnight",
            "requires_lab_confirmation": false, "contact_tracing_required": false
        }]"#;
        assert!(matches!(
            DiseaseCatalog::from_json_str(json),
            Err(CatalogError::Parse(_))
        ));
    }
}
