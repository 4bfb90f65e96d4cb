//! Validation findings and results.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Deterministic issue codes emitted by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    // Structural
    InvalidScriptFormat,
    MissingXmlSnapshot,
    MissingLocator,
    // Content
    MissingXmlContent,
    InvalidXmlFormat,
    XmlTooSmall,
    XmlTooLarge,
    InvalidXmlStructure,
    // Metadata
    MissingDeviceInfo,
    MissingPageInfo,
    MissingTimestamp,
}

/// Coarse grouping of issue codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Structural,
    Content,
    Metadata,
}

impl IssueCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidScriptFormat => "INVALID_SCRIPT_FORMAT",
            Self::MissingXmlSnapshot => "MISSING_XML_SNAPSHOT",
            Self::MissingLocator => "MISSING_LOCATOR",
            Self::MissingXmlContent => "MISSING_XML_CONTENT",
            Self::InvalidXmlFormat => "INVALID_XML_FORMAT",
            Self::XmlTooSmall => "XML_TOO_SMALL",
            Self::XmlTooLarge => "XML_TOO_LARGE",
            Self::InvalidXmlStructure => "INVALID_XML_STRUCTURE",
            Self::MissingDeviceInfo => "MISSING_DEVICE_INFO",
            Self::MissingPageInfo => "MISSING_PAGE_INFO",
            Self::MissingTimestamp => "MISSING_TIMESTAMP",
        }
    }

    pub fn category(self) -> IssueCategory {
        match self {
            Self::InvalidScriptFormat | Self::MissingXmlSnapshot | Self::MissingLocator => {
                IssueCategory::Structural
            }
            Self::MissingXmlContent
            | Self::InvalidXmlFormat
            | Self::XmlTooSmall
            | Self::XmlTooLarge
            | Self::InvalidXmlStructure => IssueCategory::Content,
            Self::MissingDeviceInfo | Self::MissingPageInfo | Self::MissingTimestamp => {
                IssueCategory::Metadata
            }
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of a single finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Info,
    Warning,
    Error,
}

/// Actionable finding produced by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
    pub severity: IssueSeverity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(code: IssueCode, severity: IssueSeverity, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            severity,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

/// The seven snapshot checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotCheck {
    Content,
    Format,
    Device,
    Page,
    Timestamp,
    Size,
    Structure,
}

impl SnapshotCheck {
    pub const ALL: [SnapshotCheck; 7] = [
        Self::Content,
        Self::Format,
        Self::Device,
        Self::Page,
        Self::Timestamp,
        Self::Size,
        Self::Structure,
    ];

    /// Contribution to the quality score when the check passes.
    pub fn weight(self) -> u32 {
        match self {
            Self::Content | Self::Format => 25,
            Self::Device | Self::Size | Self::Structure => 15,
            Self::Page => 10,
            Self::Timestamp => 5,
        }
    }

    /// A failing must-have check makes the snapshot unusable.
    pub fn is_must_have(self) -> bool {
        matches!(self, Self::Content | Self::Format)
    }

    pub fn is_major(self) -> bool {
        matches!(self, Self::Size | Self::Structure)
    }
}

/// Overall severity of a snapshot validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Passed,
    Minor,
    Major,
    Critical,
}

/// Outcome of validating one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub checks: BTreeMap<SnapshotCheck, bool>,
    pub issues: Vec<ValidationIssue>,
    pub severity: Severity,
    pub score: u32,
}

impl ValidationResult {
    /// Usable for replay: no must-have, size or structure check failed.
    pub fn is_valid(&self) -> bool {
        matches!(self.severity, Severity::Passed | Severity::Minor)
    }

    pub fn passed(&self, check: SnapshotCheck) -> bool {
        self.checks.get(&check).copied().unwrap_or(false)
    }

    pub fn has_issue(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

/// Validation of one step inside a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepValidation {
    pub step_index: usize,
    pub step_id: String,
    pub is_valid: bool,
    /// Absent when the step has no snapshot at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationResult>,
    pub issues: Vec<ValidationIssue>,
}

impl StepValidation {
    pub fn has_device_info(&self) -> bool {
        self.validation
            .as_ref()
            .is_some_and(|v| v.passed(SnapshotCheck::Device))
    }

    pub fn has_issue(&self, code: IssueCode) -> bool {
        self.issues.iter().any(|i| i.code == code)
    }
}

/// Whole-script validation summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptValidationResult {
    /// Every step is valid. A high compatibility score does not imply this.
    pub is_valid: bool,
    pub total_steps: usize,
    pub valid_steps: usize,
    pub steps: Vec<StepValidation>,
    pub issues: Vec<ValidationIssue>,
    pub warnings: Vec<String>,
    pub compatibility_score: u32,
    pub recommendations: Vec<String>,
}

impl ScriptValidationResult {
    pub fn step(&self, index: usize) -> Option<&StepValidation> {
        self.steps.iter().find(|s| s.step_index == index)
    }
}
