//! `idsr-catalog`
//!
//! **Responsibility:** Static reference data for notifiable diseases (symptom
//! sets, alert thresholds, reporting timeframes).

mod builtin;
pub mod catalog;
pub mod disease;

pub use catalog::{CatalogError, DiseaseCatalog};
pub use disease::{DiseaseCategory, DiseaseDefinition, Priority, ReportingTimeframe};
