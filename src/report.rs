//! Findings and report aggregation.
//!
//! Findings are created during probing and never mutated afterward. The
//! aggregator consumes them once, grouping by conformance class and then by
//! check id, so the report shape depends only on the registry ordering and
//! never on execution order.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::ConformanceClass;

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Pass,
    Warn,
    Fail,
    Skip,
}

impl Severity {
    /// Ranking for check-level status: the worst finding wins.
    fn rank(self) -> u8 {
        match self {
            Severity::Skip => 0,
            Severity::Pass => 1,
            Severity::Warn => 2,
            Severity::Fail => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Severity::Pass => "PASS",
            Severity::Warn => "WARN",
            Severity::Fail => "FAIL",
            Severity::Skip => "SKIP",
        }
    }
}

/// A single validation result.
///
/// Every finding names the check (rule id) it came from, so each entry in
/// the report is traceable to a registered scenario.
#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub severity: Severity,
    pub class: ConformanceClass,
    pub rule: &'static str,
    pub message: String,
    /// Extra material for follow-up: the probed URL, a schema error path,
    /// or the id of a resource left behind by a failed cleanup.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

impl Finding {
    pub fn pass(class: ConformanceClass, rule: &'static str, message: impl Into<String>) -> Self {
        Finding {
            severity: Severity::Pass,
            class,
            rule,
            message: message.into(),
            context: None,
        }
    }

    pub fn warn(class: ConformanceClass, rule: &'static str, message: impl Into<String>) -> Self {
        Finding {
            severity: Severity::Warn,
            class,
            rule,
            message: message.into(),
            context: None,
        }
    }

    pub fn fail(class: ConformanceClass, rule: &'static str, message: impl Into<String>) -> Self {
        Finding {
            severity: Severity::Fail,
            class,
            rule,
            message: message.into(),
            context: None,
        }
    }

    pub fn skip(class: ConformanceClass, rule: &'static str, message: impl Into<String>) -> Self {
        Finding {
            severity: Severity::Skip,
            class,
            rule,
            message: message.into(),
            context: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }
}

/// All findings for one check, with the check's overall status.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub rule: &'static str,
    pub status: Severity,
    pub findings: Vec<Finding>,
}

/// All checks for one conformance class.
#[derive(Debug, Clone, Serialize)]
pub struct ClassReport {
    pub class: ConformanceClass,
    pub checks: Vec<CheckReport>,
}

/// The final, queryable result of a run.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub root_url: String,
    pub checks_run: usize,
    pub passed: usize,
    pub warnings: usize,
    pub failed: usize,
    pub skipped: usize,
    pub classes: Vec<ClassReport>,
}

impl Report {
    /// Finalize a run: group findings by class, then by check id.
    ///
    /// Grouping is deterministic (class declaration order, then rule id),
    /// which keeps two runs against an unchanged deployment identical even
    /// when worker scheduling differs.
    pub fn from_findings(root_url: impl Into<String>, findings: Vec<Finding>) -> Report {
        let mut grouped: BTreeMap<ConformanceClass, BTreeMap<&'static str, Vec<Finding>>> =
            BTreeMap::new();

        let mut passed = 0;
        let mut warnings = 0;
        let mut failed = 0;
        let mut skipped = 0;

        for finding in findings {
            match finding.severity {
                Severity::Pass => passed += 1,
                Severity::Warn => warnings += 1,
                Severity::Fail => failed += 1,
                Severity::Skip => skipped += 1,
            }
            grouped
                .entry(finding.class.clone())
                .or_default()
                .entry(finding.rule)
                .or_default()
                .push(finding);
        }

        let mut checks_run = 0;
        let classes = grouped
            .into_iter()
            .map(|(class, checks)| ClassReport {
                class,
                checks: checks
                    .into_iter()
                    .map(|(rule, findings)| {
                        checks_run += 1;
                        let status = findings
                            .iter()
                            .map(|f| f.severity)
                            .max_by_key(|s| s.rank())
                            .unwrap_or(Severity::Skip);
                        CheckReport {
                            rule,
                            status,
                            findings,
                        }
                    })
                    .collect(),
            })
            .collect();

        Report {
            root_url: root_url.into(),
            checks_run,
            passed,
            warnings,
            failed,
            skipped,
            classes,
        }
    }

    /// True when no FAIL finding exists.
    pub fn is_ok(&self) -> bool {
        self.failed == 0
    }

    /// Iterate every finding in report (grouped) order.
    pub fn findings(&self) -> impl Iterator<Item = &Finding> {
        self.classes
            .iter()
            .flat_map(|c| c.checks.iter())
            .flat_map(|c| c.findings.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConformanceClass::{Core, ItemSearch};

    #[test]
    fn grouping_is_independent_of_insertion_order() {
        let a = vec![
            Finding::pass(ItemSearch, "item-search/limit", "ok"),
            Finding::fail(Core, "core/landing-links", "missing"),
            Finding::pass(ItemSearch, "item-search/bbox", "ok"),
        ];
        let mut b = a.clone();
        b.reverse();

        let ra = Report::from_findings("https://example.com", a);
        let rb = Report::from_findings("https://example.com", b);

        let shape = |r: &Report| {
            r.classes
                .iter()
                .map(|c| {
                    (
                        c.class.clone(),
                        c.checks.iter().map(|ch| ch.rule).collect::<Vec<_>>(),
                    )
                })
                .collect::<Vec<_>>()
        };
        assert_eq!(shape(&ra), shape(&rb));
        assert_eq!(ra.passed, 2);
        assert_eq!(ra.failed, 1);
    }

    #[test]
    fn check_status_is_worst_finding() {
        let findings = vec![
            Finding::pass(Core, "core/landing-links", "self ok"),
            Finding::warn(Core, "core/landing-links", "service-doc absent"),
        ];
        let report = Report::from_findings("https://example.com", findings);
        assert_eq!(report.classes[0].checks[0].status, Severity::Warn);
    }

    #[test]
    fn is_ok_tracks_failures_only() {
        let report = Report::from_findings(
            "https://example.com",
            vec![
                Finding::warn(Core, "core/landing-links", "advisory"),
                Finding::skip(ItemSearch, "item-search/basic", "not advertised"),
            ],
        );
        assert!(report.is_ok());

        let report = Report::from_findings(
            "https://example.com",
            vec![Finding::fail(Core, "core/landing-links", "broken")],
        );
        assert!(!report.is_ok());
    }

    #[test]
    fn serializes_with_lowercase_severities() {
        let report = Report::from_findings(
            "https://example.com",
            vec![Finding::pass(Core, "core/landing-links", "ok")],
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["classes"][0]["class"], "core");
        assert_eq!(json["classes"][0]["checks"][0]["status"], "pass");
    }
}
