//! Recovery results and reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::script::Script;
use super::snapshot::Snapshot;
use super::validation::ValidationIssue;

/// Identifier of a recovery strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyId {
    XmlRepair,
    CacheLookup,
    DeviceAdaptation,
    XmlRegeneration,
    FallbackManual,
}

impl StrategyId {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::XmlRepair => "xml-repair",
            Self::CacheLookup => "cache-lookup",
            Self::DeviceAdaptation => "device-adaptation",
            Self::XmlRegeneration => "xml-regeneration",
            Self::FallbackManual => "fallback-manual",
        }
    }
}

impl fmt::Display for StrategyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a step entered the recovery chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Missing,
    Corrupted,
    DeviceIncompatible,
}

/// Result of applying one strategy to one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryResult {
    pub success: bool,
    pub strategy_id: StrategyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovered: Option<Snapshot>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

impl RecoveryResult {
    pub fn recovered(strategy_id: StrategyId, snapshot: Snapshot) -> Self {
        Self {
            success: true,
            strategy_id,
            recovered: Some(snapshot),
            warnings: Vec::new(),
            recommendations: Vec::new(),
        }
    }

    pub fn failed(strategy_id: StrategyId, warning: impl Into<String>) -> Self {
        Self {
            success: false,
            strategy_id,
            recovered: None,
            warnings: vec![warning.into()],
            recommendations: Vec::new(),
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendations.push(recommendation.into());
        self
    }
}

/// Auditable record of what happened to one failing step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepOutcome {
    pub step_index: usize,
    pub step_id: String,
    pub failure: FailureKind,
    pub original_issues: Vec<ValidationIssue>,
    /// Every strategy tried, in order.
    pub attempts: Vec<RecoveryResult>,
    pub recovered_by: Option<StrategyId>,
    pub resolved_issues: usize,
}

/// Summary of a whole-script recovery pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryReport {
    pub original_issues: usize,
    pub resolved_issues: usize,
    /// Distinct strategies that succeeded at least once, in first-use order.
    pub applied_strategies: Vec<StrategyId>,
    pub remaining_issues: Vec<String>,
    pub confidence_score: u32,
    pub recommendations: Vec<String>,
    pub step_outcomes: Vec<StepOutcome>,
    /// The pass stopped early; steps after the cancellation point are untouched.
    pub cancelled: bool,
    pub recovered_script: Script,
    pub evaluated_at: DateTime<Utc>,
}

impl RecoveryReport {
    /// Report for a script that needed no recovery.
    pub fn clean(script: Script) -> Self {
        Self {
            original_issues: 0,
            resolved_issues: 0,
            applied_strategies: Vec::new(),
            remaining_issues: Vec::new(),
            confidence_score: 100,
            recommendations: Vec::new(),
            step_outcomes: Vec::new(),
            cancelled: false,
            recovered_script: script,
            evaluated_at: Utc::now(),
        }
    }

    pub fn used(&self, strategy: StrategyId) -> bool {
        self.applied_strategies.contains(&strategy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_id_wire_format() {
        let json = serde_json::to_string(&StrategyId::XmlRegeneration).unwrap();
        assert_eq!(json, "\"xml-regeneration\"");
        assert_eq!(StrategyId::CacheLookup.to_string(), "cache-lookup");
    }

    #[test]
    fn clean_report_has_full_confidence() {
        let report = RecoveryReport::clean(Script::default());
        assert_eq!(report.original_issues, 0);
        assert_eq!(report.confidence_score, 100);
        assert!(!report.cancelled);
    }
}
