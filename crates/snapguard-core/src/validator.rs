//! Snapshot and script validation.
//!
//! Seven independent checks grade each snapshot; a weighted sum of the
//! passing checks gives the score and the failing ones decide the severity.
//! Validation never fails: every finding is returned as data.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ValidationLimits;
use crate::domain::{
    IssueCode, IssueSeverity, Script, ScriptValidationResult, Severity, Snapshot, SnapshotCheck,
    Step, StepValidation, ValidationIssue, ValidationResult,
};
use crate::obs;
use crate::pool;
use crate::xml::XmlDocument;

const TOTAL_WEIGHT: u32 = 110;

/// Result of the cheap pre-save check on a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuickCheck {
    pub has_snapshot: bool,
    pub is_valid: bool,
    pub issues: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    limits: ValidationLimits,
}

impl Validator {
    pub fn new(limits: ValidationLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &ValidationLimits {
        &self.limits
    }

    pub fn validate_snapshot(&self, snapshot: &Snapshot) -> ValidationResult {
        self.validate_snapshot_at(snapshot, Utc::now())
    }

    /// Validate against an explicit clock.
    pub fn validate_snapshot_at(
        &self,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> ValidationResult {
        let limits = &self.limits;
        let content = snapshot.content.as_str();
        let size = snapshot.size();
        let doc = XmlDocument::parse(content).ok();

        let mut checks = BTreeMap::new();
        let mut issues = Vec::new();

        let has_content = !content.trim().is_empty()
            && content.trim_start().starts_with('<')
            && size >= limits.min_content_len;
        checks.insert(SnapshotCheck::Content, has_content);
        if !has_content {
            issues.push(
                ValidationIssue::new(
                    IssueCode::MissingXmlContent,
                    IssueSeverity::Error,
                    "xml content is missing or empty",
                )
                .with_suggestion("save the page hierarchy when the step is recorded"),
            );
        }

        let well_formed = doc.as_ref().is_some_and(XmlDocument::has_hierarchy_markers);
        checks.insert(SnapshotCheck::Format, well_formed);
        if !well_formed {
            issues.push(
                ValidationIssue::new(
                    IssueCode::InvalidXmlFormat,
                    IssueSeverity::Error,
                    "xml is malformed or has no hierarchy element",
                )
                .with_suggestion("check that the snapshot was stored whole and correctly encoded"),
            );
        }

        let has_device = snapshot.device.has_identity();
        checks.insert(SnapshotCheck::Device, has_device);
        if !has_device {
            issues.push(
                ValidationIssue::new(
                    IssueCode::MissingDeviceInfo,
                    IssueSeverity::Warning,
                    "device information is missing",
                )
                .with_suggestion("record device id and name to improve cross-device replay"),
            );
        }

        let has_page = snapshot.page.has_identity();
        checks.insert(SnapshotCheck::Page, has_page);
        if !has_page {
            issues.push(
                ValidationIssue::new(
                    IssueCode::MissingPageInfo,
                    IssueSeverity::Info,
                    "page information is missing",
                )
                .with_suggestion("record the page title so the step context is recognisable"),
            );
        }

        let timestamp_ok = match snapshot.captured_at {
            Some(at) => at <= now + limits.max_future_skew(),
            None => false,
        };
        checks.insert(SnapshotCheck::Timestamp, timestamp_ok);
        if !timestamp_ok {
            let message = if snapshot.captured_at.is_some() {
                "capture timestamp lies in the future"
            } else {
                "capture timestamp is missing"
            };
            issues.push(
                ValidationIssue::new(IssueCode::MissingTimestamp, IssueSeverity::Info, message)
                    .with_suggestion("record the capture time to track snapshot age"),
            );
        }

        let size_ok = (limits.min_size_bytes..=limits.max_size_bytes).contains(&size);
        checks.insert(SnapshotCheck::Size, size_ok);
        if size > 0 && size < limits.min_size_bytes {
            issues.push(
                ValidationIssue::new(
                    IssueCode::XmlTooSmall,
                    IssueSeverity::Warning,
                    format!("xml content is too small ({size} bytes) and may be incomplete"),
                )
                .with_suggestion("check that the snapshot captured the whole page"),
            );
        } else if size > limits.max_size_bytes {
            issues.push(
                ValidationIssue::new(
                    IssueCode::XmlTooLarge,
                    IssueSeverity::Warning,
                    format!("xml content is too large ({} KB)", size / 1024),
                )
                .with_suggestion("trim the hierarchy or capture a smaller region"),
            );
        }

        let structured = doc.as_ref().is_some_and(has_ui_structure);
        checks.insert(SnapshotCheck::Structure, structured);
        if !structured {
            issues.push(
                ValidationIssue::new(
                    IssueCode::InvalidXmlStructure,
                    IssueSeverity::Warning,
                    "xml does not look like an android ui hierarchy",
                )
                .with_suggestion("capture the snapshot with a ui hierarchy dump"),
            );
        }

        let severity = grade(&checks, limits.minor_pass_ratio);
        ValidationResult {
            score: score(&checks),
            checks,
            issues,
            severity,
        }
    }

    /// Validate every step. Pooled scripts are restored first so references
    /// are checked against their effective content.
    pub fn validate_script(&self, script: &Script) -> ScriptValidationResult {
        let restored;
        let script = if script.snapshot_pool.is_some() {
            restored = pool::restore(script);
            &restored
        } else {
            script
        };

        let steps: Vec<StepValidation> = script
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| self.validate_step(index, step))
            .collect();

        let total_steps = steps.len();
        let valid_steps = steps.iter().filter(|s| s.is_valid).count();
        let issues = steps.iter().flat_map(|s| s.issues.iter().cloned()).collect();
        let compatibility_score = compatibility_score(script, &steps);

        let result = ScriptValidationResult {
            is_valid: valid_steps == total_steps,
            total_steps,
            valid_steps,
            warnings: compatibility_warnings(script, &steps),
            recommendations: recommendations(script, &steps),
            steps,
            issues,
            compatibility_score,
        };
        obs::emit_script_validated(&script.name, valid_steps, total_steps, compatibility_score);
        result
    }

    /// Validate a raw JSON document, reporting shape problems as findings.
    pub fn validate_script_json(&self, json: &str) -> ScriptValidationResult {
        let value: serde_json::Value = match serde_json::from_str(json) {
            Ok(value) => value,
            Err(e) => return invalid_format(format!("script is not valid json: {e}")),
        };
        if !value.get("steps").is_some_and(serde_json::Value::is_array) {
            return invalid_format("script has no steps array".to_string());
        }
        match serde_json::from_value::<Script>(value) {
            Ok(script) => self.validate_script(&script),
            Err(e) => invalid_format(format!("script does not match the expected shape: {e}")),
        }
    }

    /// Validate one step: its snapshot (when present) and its locator.
    pub fn validate_step(&self, index: usize, step: &Step) -> StepValidation {
        let mut issues = Vec::new();
        let validation = match &step.snapshot {
            None => {
                issues.push(
                    ValidationIssue::new(
                        IssueCode::MissingXmlSnapshot,
                        IssueSeverity::Error,
                        format!("step {} has no xml snapshot", index + 1),
                    )
                    .with_suggestion("re-record the step with snapshot capture enabled"),
                );
                None
            }
            Some(snapshot) => {
                let validation = self.validate_snapshot(snapshot);
                obs::emit_snapshot_validated(
                    &step.id,
                    validation.severity,
                    validation.score,
                    validation.issues.len(),
                );
                issues.extend(validation.issues.iter().cloned());
                Some(validation)
            }
        };

        let has_locator = !step.locator.is_empty();
        if !has_locator {
            issues.push(
                ValidationIssue::new(
                    IssueCode::MissingLocator,
                    IssueSeverity::Error,
                    format!("step {} has no element locator", index + 1),
                )
                .with_suggestion("record at least one of xpath, resource id, text or bounds"),
            );
        }

        StepValidation {
            step_index: index,
            step_id: step.id.clone(),
            is_valid: has_locator && validation.as_ref().is_some_and(ValidationResult::is_valid),
            validation,
            issues,
        }
    }

    /// Cheap check used before a step is saved.
    pub fn quick_check(&self, step: &Step) -> QuickCheck {
        let mut issues = Vec::new();
        let snapshot = step.snapshot.as_ref();
        let has_snapshot = snapshot.is_some_and(Snapshot::has_content);

        if !has_snapshot {
            issues.push("missing xml content".to_string());
        }
        if snapshot.map_or(true, |s| s.device.device_id.trim().is_empty()) {
            issues.push("missing device information".to_string());
        }
        if snapshot.and_then(|s| s.captured_at).is_none() {
            issues.push("missing capture timestamp".to_string());
        }
        if let Some(s) = snapshot.filter(|s| s.has_content()) {
            if s.size() < self.limits.min_size_bytes {
                issues.push("xml content is too short and may be incomplete".to_string());
            }
        }

        QuickCheck {
            has_snapshot,
            is_valid: issues.is_empty(),
            issues,
        }
    }
}

/// Validate with default limits.
pub fn validate_snapshot(snapshot: &Snapshot) -> ValidationResult {
    Validator::default().validate_snapshot(snapshot)
}

/// Validate with default limits.
pub fn validate_script(script: &Script) -> ScriptValidationResult {
    Validator::default().validate_script(script)
}

fn has_ui_structure(doc: &XmlDocument) -> bool {
    let marked = doc
        .elements()
        .any(|e| e.name() == "node" || e.attr("class").is_some());
    let bounded = doc.elements().any(|e| e.attr("bounds").is_some());
    marked && bounded
}

fn score(checks: &BTreeMap<SnapshotCheck, bool>) -> u32 {
    let passed: u32 = checks
        .iter()
        .filter(|(_, ok)| **ok)
        .map(|(check, _)| check.weight())
        .sum();
    passed * 100 / TOTAL_WEIGHT
}

fn grade(checks: &BTreeMap<SnapshotCheck, bool>, minor_pass_ratio: f64) -> Severity {
    let failed = |pred: fn(SnapshotCheck) -> bool| {
        checks.iter().any(|(check, ok)| !*ok && pred(*check))
    };
    if failed(SnapshotCheck::is_must_have) {
        return Severity::Critical;
    }
    if failed(SnapshotCheck::is_major) {
        return Severity::Major;
    }
    let passed = checks.values().filter(|ok| **ok).count();
    if (passed as f64) < minor_pass_ratio * SnapshotCheck::ALL.len() as f64 {
        Severity::Minor
    } else {
        Severity::Passed
    }
}

fn fraction(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    }
}

fn compatibility_score(script: &Script, steps: &[StepValidation]) -> u32 {
    let total = steps.len();
    let valid = steps.iter().filter(|s| s.is_valid).count();
    let with_device = steps.iter().filter(|s| s.has_device_info()).count();

    let mut score = 0.0;
    if script.has_version() {
        score += 20.0;
    }
    if script.platform().is_some() {
        score += 15.0;
    }
    if script.metadata.is_some() {
        score += 10.0;
    }
    score += 40.0 * fraction(valid, total);
    score += 15.0 * fraction(with_device, total);
    score.round() as u32
}

fn compatibility_warnings(script: &Script, steps: &[StepValidation]) -> Vec<String> {
    let mut warnings = Vec::new();
    if !script.has_version() {
        warnings.push("script has no version; compatibility cannot be tracked".to_string());
    }
    if script.platform().is_none() {
        warnings.push("no target platform set; replay on other platforms may fail".to_string());
    }
    let without_snapshot = steps
        .iter()
        .filter(|s| s.has_issue(IssueCode::MissingXmlSnapshot))
        .count();
    if without_snapshot > 0 {
        warnings.push(format!(
            "{without_snapshot} step(s) have no xml snapshot; cross-device replay is limited"
        ));
    }
    warnings
}

fn recommendations(script: &Script, steps: &[StepValidation]) -> Vec<String> {
    let mut out = Vec::new();
    let count = |pred: &dyn Fn(&StepValidation) -> bool| steps.iter().filter(|&s| pred(s)).count();

    let invalid = count(&|s| !s.is_valid);
    if invalid > 0 {
        out.push(format!("fix the xml snapshots of {invalid} invalid step(s)"));
    }
    if !script.has_version() {
        out.push("add a version to the script".to_string());
    }
    if script.platform().is_none() {
        out.push("set the target platform in the script metadata".to_string());
    }
    let no_device = count(&|s| !s.has_device_info());
    if no_device > 0 {
        out.push(format!("add device information to {no_device} step(s)"));
    }
    let large = count(&|s| s.has_issue(IssueCode::XmlTooLarge));
    if large > 0 {
        out.push(format!("reduce the xml size of {large} step(s)"));
    }
    let no_locator = count(&|s| s.has_issue(IssueCode::MissingLocator));
    if no_locator > 0 {
        out.push(format!("record element locators for {no_locator} step(s)"));
    }
    out
}

fn invalid_format(message: String) -> ScriptValidationResult {
    ScriptValidationResult {
        is_valid: false,
        total_steps: 0,
        valid_steps: 0,
        steps: Vec::new(),
        issues: vec![ValidationIssue::new(
            IssueCode::InvalidScriptFormat,
            IssueSeverity::Error,
            message,
        )],
        warnings: Vec::new(),
        compatibility_score: 0,
        recommendations: vec!["check that the script file is a valid script export".to_string()],
    }
}
