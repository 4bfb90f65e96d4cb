//! Hand-off to an external step executor.
//!
//! The executor receives actions and locators only. Snapshot XML stays on
//! this side of the boundary.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{ElementLocator, RecoveryReport, Script, ScriptValidationResult, StrategyId};
use crate::validator::Validator;

/// One step as the executor sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableStep {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, serde_json::Value>,
    pub locator: ElementLocator,
}

/// Recovery figures carried into the bundle, without the recovered script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverySummary {
    pub original_issues: usize,
    pub resolved_issues: usize,
    pub confidence_score: u32,
    pub applied_strategies: Vec<StrategyId>,
    pub remaining_issues: Vec<String>,
    pub cancelled: bool,
}

impl From<&RecoveryReport> for RecoverySummary {
    fn from(report: &RecoveryReport) -> Self {
        Self {
            original_issues: report.original_issues,
            resolved_issues: report.resolved_issues,
            confidence_score: report.confidence_score,
            applied_strategies: report.applied_strategies.clone(),
            remaining_issues: report.remaining_issues.clone(),
            cancelled: report.cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionBundle {
    pub script_name: String,
    pub steps: Vec<ExecutableStep>,
    pub validation: ScriptValidationResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recovery: Option<RecoverySummary>,
}

impl ExecutionBundle {
    /// Every step validated.
    pub fn is_ready(&self) -> bool {
        self.validation.is_valid
    }
}

/// Runs one step on a device. Implemented by the embedding application.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    /// `true` when the step passed.
    async fn execute(&self, step: &ExecutableStep, variables: &BTreeMap<String, String>) -> bool;
}

/// Build the bundle for `script`, or for the recovered script when a
/// recovery report is given. Validation runs against the steps being shipped.
pub fn prepare_execution(
    script: &Script,
    validator: &Validator,
    recovery: Option<&RecoveryReport>,
) -> ExecutionBundle {
    let source = recovery.map_or(script, |r| &r.recovered_script);
    let validation = validator.validate_script(source);
    let steps = source
        .steps
        .iter()
        .map(|step| ExecutableStep {
            id: step.id.clone(),
            action: step.action.clone(),
            params: step.params.clone(),
            locator: step.locator.clone(),
        })
        .collect();

    tracing::debug!(
        event = "execution.prepared",
        script = %source.name,
        steps = source.steps.len(),
        ready = validation.is_valid,
    );

    ExecutionBundle {
        script_name: source.name.clone(),
        steps,
        validation,
        recovery: recovery.map(RecoverySummary::from),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::domain::{DeviceInfo, PageInfo, Snapshot, Step};

    const XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?><hierarchy rotation="0"><node class="android.widget.Button" resource-id="app:id/pay" text="Pay" bounds="[0,0][200,100]"/></hierarchy>"#;

    fn script() -> Script {
        let mut step = Step::new(
            "pay",
            ElementLocator {
                resource_id: Some("app:id/pay".to_string()),
                ..ElementLocator::default()
            },
        )
        .with_snapshot(Snapshot::capture(
            XML,
            DeviceInfo::new("emu-1", "Pixel").with_app("com.shop", ".Main"),
            PageInfo::new("Checkout", "form"),
        ));
        step.action = Some("click".to_string());
        step.params.insert("retries".to_string(), 2.into());
        Script::new("checkout", vec![step])
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StepExecutor for Recording {
        async fn execute(
            &self,
            step: &ExecutableStep,
            variables: &BTreeMap<String, String>,
        ) -> bool {
            self.seen
                .lock()
                .unwrap()
                .push(format!("{}:{}", step.id, variables.len()));
            true
        }
    }

    #[test]
    fn bundle_carries_no_xml() {
        let bundle = prepare_execution(&script(), &Validator::default(), None);
        assert_eq!(bundle.steps.len(), 1);
        assert_eq!(bundle.steps[0].action.as_deref(), Some("click"));
        assert_eq!(bundle.steps[0].params["retries"], 2);
        assert!(bundle.recovery.is_none());

        let json = serde_json::to_string(&bundle).unwrap();
        assert!(!json.contains("<hierarchy"));
    }

    #[test]
    fn recovery_report_supplies_the_steps() {
        let mut report = RecoveryReport::clean(script());
        report.recovered_script.steps[0].id = "pay-recovered".to_string();
        report.confidence_score = 90;
        let bundle = prepare_execution(&Script::default(), &Validator::default(), Some(&report));
        assert_eq!(bundle.steps[0].id, "pay-recovered");
        assert_eq!(bundle.recovery.unwrap().confidence_score, 90);
    }

    #[tokio::test]
    async fn executor_receives_bundle_steps() {
        let bundle = prepare_execution(&script(), &Validator::default(), None);
        let executor = Recording::default();
        let vars = BTreeMap::from([("user".to_string(), "qa".to_string())]);
        for step in &bundle.steps {
            assert!(executor.execute(step, &vars).await);
        }
        assert_eq!(*executor.seen.lock().unwrap(), vec!["pay:1".to_string()]);
    }
}
