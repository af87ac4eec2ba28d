use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use idsr_core::{CaseStatus, DomainResult, OutbreakDeclaration, UserId};

/// Minimal view of a remote case row needed for clustering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseRecord {
    pub disease_code: String,
    #[serde(default)]
    pub location: Option<String>,
    pub status: CaseStatus,
    pub reported_at: DateTime<Utc>,
}

impl CaseRecord {
    pub fn new(
        disease_code: impl Into<String>,
        location: impl Into<String>,
        status: CaseStatus,
        reported_at: DateTime<Utc>,
    ) -> Self {
        Self {
            disease_code: disease_code.into(),
            location: Some(location.into()),
            status,
            reported_at,
        }
    }
}

/// Grouping key: disease plus exact location string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClusterKey {
    pub disease_code: String,
    pub location: String,
}

/// A possible outbreak awaiting human review.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterCandidate {
    pub key: ClusterKey,
    pub case_count: u32,
    pub first_reported_at: DateTime<Utc>,
    pub last_reported_at: DateTime<Utc>,
}

impl ClusterCandidate {
    /// Turn a reviewed candidate into the payload of an outbreak declaration.
    pub fn into_declaration(self, declared_by: UserId) -> DomainResult<OutbreakDeclaration> {
        OutbreakDeclaration::new(
            self.key.disease_code,
            self.key.location,
            self.case_count,
            self.first_reported_at.date_naive(),
            declared_by,
        )
    }
}

/// Deterministic confirmed-case cluster detection.
///
/// Model:
/// - Keep `confirmed` cases reported within the lookback window.
/// - Group by `(disease_code, location)`.
/// - Surface groups reaching the threshold, largest first.
///
/// Stateless: running it twice over the same input yields the same output.
#[derive(Debug, Clone)]
pub struct OutbreakClusterDetector {
    lookback: Duration,
    threshold: u32,
}

impl OutbreakClusterDetector {
    pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;
    pub const DEFAULT_THRESHOLD: u32 = 5;

    pub fn new() -> Self {
        Self {
            lookback: Duration::days(Self::DEFAULT_LOOKBACK_DAYS),
            threshold: Self::DEFAULT_THRESHOLD,
        }
    }

    pub fn with_lookback_days(mut self, days: i64) -> Self {
        self.lookback = Duration::days(days);
        self
    }

    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold.max(1);
        self
    }

    /// Inclusive lower bound of the window ending at `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - self.lookback
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn detect(&self, cases: &[CaseRecord], now: DateTime<Utc>) -> Vec<ClusterCandidate> {
        let since = self.window_start(now);
        let mut groups: BTreeMap<ClusterKey, ClusterCandidate> = BTreeMap::new();

        for case in cases {
            if case.status != CaseStatus::Confirmed || case.reported_at < since {
                continue;
            }
            // Cases without a usable location cannot be clustered.
            let Some(location) = case.location.as_deref().filter(|l| !l.trim().is_empty()) else {
                continue;
            };
            let key = ClusterKey {
                disease_code: case.disease_code.clone(),
                location: location.to_string(),
            };
            groups
                .entry(key.clone())
                .and_modify(|c| {
                    c.case_count += 1;
                    c.first_reported_at = c.first_reported_at.min(case.reported_at);
                    c.last_reported_at = c.last_reported_at.max(case.reported_at);
                })
                .or_insert(ClusterCandidate {
                    key,
                    case_count: 1,
                    first_reported_at: case.reported_at,
                    last_reported_at: case.reported_at,
                });
        }

        let mut out: Vec<ClusterCandidate> = groups
            .into_values()
            .filter(|c| c.case_count >= self.threshold)
            .collect();
        // BTreeMap yields keys ascending; the stable sort keeps that for ties.
        out.sort_by(|a, b| b.case_count.cmp(&a.case_count));
        out
    }
}

impl Default for OutbreakClusterDetector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, 12, 0, 0).unwrap()
    }

    fn confirmed(code: &str, location: &str, hours_ago: i64) -> CaseRecord {
        CaseRecord::new(code, location, CaseStatus::Confirmed, now() - Duration::hours(hours_ago))
    }

    #[test]
    fn fifth_case_creates_candidate() {
        let detector = OutbreakClusterDetector::default();
        let mut cases: Vec<CaseRecord> = (0..4).map(|i| confirmed("CHOL", "Riverside", i)).collect();
        assert!(detector.detect(&cases, now()).is_empty());

        cases.push(confirmed("CHOL", "Riverside", 10));
        let out = detector.detect(&cases, now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].case_count, 5);
        assert_eq!(out[0].key.disease_code, "CHOL");
        assert_eq!(out[0].key.location, "Riverside");
        assert_eq!(out[0].first_reported_at, now() - Duration::hours(10));
        assert_eq!(out[0].last_reported_at, now());
    }

    #[test]
    fn only_confirmed_cases_in_window_count() {
        let detector = OutbreakClusterDetector::default();
        let mut cases: Vec<CaseRecord> = (0..4).map(|i| confirmed("MEAS", "Hilltop", i)).collect();
        let mut suspected = confirmed("MEAS", "Hilltop", 1);
        suspected.status = CaseStatus::Suspected;
        cases.push(suspected);
        cases.push(confirmed("MEAS", "Hilltop", 7 * 24 + 1));
        assert!(detector.detect(&cases, now()).is_empty());

        // Exactly at the window start is still inside.
        cases.push(confirmed("MEAS", "Hilltop", 7 * 24));
        assert_eq!(detector.detect(&cases, now())[0].case_count, 5);
    }

    #[test]
    fn locations_are_compared_exactly() {
        let detector = OutbreakClusterDetector::default().with_threshold(2);
        let cases = vec![
            confirmed("TYPH", "Market St", 1),
            confirmed("TYPH", "market st", 2),
            confirmed("TYPH", "Market St ", 3),
        ];
        assert!(detector.detect(&cases, now()).is_empty());
    }

    #[test]
    fn missing_location_is_skipped() {
        let detector = OutbreakClusterDetector::default().with_threshold(1);
        let mut case = confirmed("CHOL", "x", 1);
        case.location = None;
        let mut blank = confirmed("CHOL", "  ", 1);
        blank.location = Some("  ".to_string());
        assert!(detector.detect(&[case, blank], now()).is_empty());
    }

    #[test]
    fn sorted_by_count_then_key() {
        let detector = OutbreakClusterDetector::default().with_threshold(2);
        let mut cases = Vec::new();
        cases.extend((0..2).map(|i| confirmed("TYPH", "B", i)));
        cases.extend((0..3).map(|i| confirmed("MEAS", "Z", i)));
        cases.extend((0..2).map(|i| confirmed("CHOL", "A", i)));
        cases.extend((0..2).map(|i| confirmed("TYPH", "A", i)));

        let keys: Vec<(String, String, u32)> = detector
            .detect(&cases, now())
            .into_iter()
            .map(|c| (c.key.disease_code, c.key.location, c.case_count))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("MEAS".into(), "Z".into(), 3),
                ("CHOL".into(), "A".into(), 2),
                ("TYPH".into(), "A".into(), 2),
                ("TYPH".into(), "B".into(), 2),
            ]
        );
    }

    #[test]
    fn custom_window() {
        let detector = OutbreakClusterDetector::default()
            .with_lookback_days(1)
            .with_threshold(2);
        let cases = vec![confirmed("DENG", "A", 1), confirmed("DENG", "A", 30)];
        assert!(detector.detect(&cases, now()).is_empty());
    }

    #[test]
    fn candidate_becomes_declaration() {
        let detector = OutbreakClusterDetector::default();
        let cases: Vec<CaseRecord> = (0..5).map(|i| confirmed("CHOL", "Riverside", i * 24)).collect();
        let candidate = detector.detect(&cases, now()).remove(0);
        let declared_by = UserId::new();

        let decl = candidate.into_declaration(declared_by).unwrap();
        assert_eq!(decl.case_count, 5);
        assert_eq!(decl.location, "Riverside");
        assert_eq!(decl.declared_by, declared_by);
        assert_eq!(decl.start_date, (now() - Duration::hours(96)).date_naive());
        assert_eq!(decl.status, idsr_core::OutbreakStatus::Active);
    }

    fn arb_case() -> impl Strategy<Value = CaseRecord> {
        (
            prop::sample::select(vec!["CHOL", "MEAS", "DENG"]),
            prop::sample::select(vec!["A", "B", "C"]),
            prop::bool::weighted(0.8),
            0i64..(10 * 24),
        )
            .prop_map(|(code, loc, is_confirmed, hours)| {
                let status = if is_confirmed { CaseStatus::Confirmed } else { CaseStatus::Suspected };
                CaseRecord::new(code, loc, status, now() - Duration::hours(hours))
            })
    }

    proptest! {
        #[test]
        fn detection_is_idempotent_and_ordered(cases in prop::collection::vec(arb_case(), 0..80)) {
            let detector = OutbreakClusterDetector::default();
            let first = detector.detect(&cases, now());
            let second = detector.detect(&cases, now());
            prop_assert_eq!(&first, &second);

            for c in &first {
                prop_assert!(c.case_count >= OutbreakClusterDetector::DEFAULT_THRESHOLD);
            }
            for pair in first.windows(2) {
                prop_assert!(
                    pair[0].case_count > pair[1].case_count
                        || (pair[0].case_count == pair[1].case_count && pair[0].key < pair[1].key)
                );
            }
            let counted: u32 = first.iter().map(|c| c.case_count).sum();
            prop_assert!(counted as usize <= cases.len());
        }
    }
}
