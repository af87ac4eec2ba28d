//! WHO IDSR priority diseases shipped with the field client.

use crate::disease::{DiseaseCategory, DiseaseDefinition, Priority, ReportingTimeframe};

use DiseaseCategory::{Endemic, EpidemicProne, Other};
use Priority::{High, Medium};
use ReportingTimeframe::{Immediate, Within24Hours, Within30Days, Within7Days};

#[allow(clippy::too_many_arguments)]
fn disease(
    code: &str,
    name: &str,
    category: DiseaseCategory,
    priority: Priority,
    icd11_code: &str,
    symptoms: &[&str],
    case_definition: &str,
    reporting_threshold: u32,
    reporting_timeframe: ReportingTimeframe,
    requires_lab_confirmation: bool,
    contact_tracing_required: bool,
) -> DiseaseDefinition {
    DiseaseDefinition {
        code: code.to_string(),
        name: name.to_string(),
        category,
        priority,
        icd11_code: Some(icd11_code.to_string()),
        symptoms: symptoms.iter().map(|s| s.to_string()).collect(),
        case_definition: case_definition.to_string(),
        reporting_threshold,
        reporting_timeframe,
        requires_lab_confirmation,
        contact_tracing_required,
    }
}

/// Catalog order matters: it breaks ties in symptom suggestions.
#[rustfmt::skip]
pub(crate) fn priority_diseases() -> Vec<DiseaseDefinition> {
    vec![
        disease(
            "CHOL", "Cholera", EpidemicProne, High, "1A00",
            &["acute_watery_diarrhea", "vomiting", "dehydration"],
            "Acute watery diarrhea with or without vomiting in persons aged 5 years or more",
            1, Immediate, true, true,
        ),
        disease(
            "MEAS", "Measles", EpidemicProne, High, "1F03",
            &["fever", "rash", "cough", "conjunctivitis"],
            "Fever and maculopapular rash with cough, coryza or conjunctivitis",
            1, Immediate, true, true,
        ),
        disease(
            "YF", "Yellow Fever", EpidemicProne, High, "1D47",
            &["fever", "jaundice", "bleeding", "abdominal_pain"],
            "Acute onset of fever with jaundice within 2 weeks of onset",
            1, Immediate, true, false,
        ),
        disease(
            "EBOLA", "Ebola Virus Disease", EpidemicProne, High, "1D60",
            &["fever", "bleeding", "vomiting", "diarrhea", "weakness"],
            "Sudden onset of fever with bleeding or contact with suspected case",
            1, Immediate, true, true,
        ),
        disease(
            "COVID", "COVID-19", EpidemicProne, High, "RA01",
            &["fever", "cough", "breathing_difficulty", "loss_of_taste_smell"],
            "Acute respiratory illness with fever, cough, or breathing difficulty",
            5, Within24Hours, true, true,
        ),
        disease(
            "MPOX", "Monkeypox", EpidemicProne, High, "1E72",
            &["fever", "rash", "lymphadenopathy", "headache"],
            "Acute rash illness with fever and lymphadenopathy",
            1, Immediate, true, true,
        ),
        disease(
            "MENIN", "Meningococcal Meningitis", EpidemicProne, High, "1C1B.0",
            &["fever", "headache", "stiff_neck", "altered_consciousness"],
            "Sudden onset of fever with stiff neck or altered consciousness",
            2, Within24Hours, true, true,
        ),
        disease(
            "MAL", "Malaria", Endemic, Medium, "1F40",
            &["fever", "chills", "sweating", "headache"],
            "Fever with or without other symptoms in malaria-endemic area",
            10, Within7Days, true, false,
        ),
        disease(
            "TB", "Tuberculosis", Endemic, Medium, "1B10",
            &["cough", "weight_loss", "night_sweats", "fever"],
            "Cough for 2 weeks or more with weight loss and night sweats",
            10, Within7Days, true, true,
        ),
        disease(
            "HIV", "HIV/AIDS", Endemic, Medium, "1C62",
            &["weight_loss", "chronic_diarrhea", "fever", "opportunistic_infections"],
            "Clinical signs with positive HIV test",
            20, Within30Days, true, false,
        ),
        disease(
            "DENG", "Dengue Fever", EpidemicProne, Medium, "1D2Z",
            &["fever", "headache", "joint_pain", "rash", "bleeding"],
            "Acute febrile illness with headache and joint/muscle pain",
            5, Within7Days, true, false,
        ),
        disease(
            "TYPH", "Typhoid Fever", Endemic, Medium, "1A07",
            &["fever", "headache", "abdominal_pain", "constipation"],
            "Prolonged fever with headache and abdominal symptoms",
            5, Within7Days, true, false,
        ),
        disease(
            "RABIES", "Rabies", Other, High, "1C82",
            &["hydrophobia", "altered_consciousness", "paralysis", "animal_bite"],
            "History of animal bite with neurological symptoms",
            1, Immediate, false, true,
        ),
        disease(
            "POLIO", "Acute Flaccid Paralysis (AFP)", EpidemicProne, High, "8C70",
            &["paralysis", "fever", "weakness"],
            "Acute onset of flaccid paralysis in child under 15 years",
            1, Immediate, true, false,
        ),
    ]
}
