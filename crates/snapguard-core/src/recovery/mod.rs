//! Script recovery.
//!
//! Walks every failing step of a script through the strategy chain and
//! reports what was resolved. Works on a copy; the input is never touched.
//!
//! Per step the chain is terminal on the first successful strategy whose
//! snapshot leaves the step no worse off: either it validates on its own, or
//! it adds no new issue and does not raise the step's severity. Issues a
//! kept snapshot still has are reported as remaining. A step that nothing
//! fixes gets the manual-guidance fallback.

pub mod report;
pub mod source;
pub mod strategies;

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::config::SnapguardConfig;
use crate::domain::{
    DeviceInfo, FailureKind, IssueCode, RecoveryReport, RecoveryResult, Script, Severity, Step,
    StepOutcome, StepValidation, StrategyId, ValidationIssue,
};
use crate::obs;
use crate::pool;
use crate::validator::Validator;

pub use report::{
    read_recovery_artifact, render_recovery_report_md, render_validation_md,
    write_recovery_artifact,
};
pub use source::{lookup_with_timeout, LookupKey, ScriptSiblings, SnapshotSource};
pub use strategies::{
    CacheLookupStrategy, DeviceAdaptationStrategy, ManualGuidanceStrategy, RecoveryContext,
    RecoveryStrategy, RegenerationStrategy, StrategyChain, Trigger, XmlRepairStrategy,
};

/// `round(resolvedRatio * 80 + min(distinct * 5, 20))`, or 100 without issues.
pub fn confidence_score(original: usize, resolved: usize, distinct_strategies: usize) -> u32 {
    if original == 0 {
        return 100;
    }
    let ratio = resolved as f64 / original as f64;
    let bonus = (distinct_strategies * 5).min(20) as f64;
    (ratio * 80.0 + bonus).round() as u32
}

pub struct RecoveryEngine {
    validator: Validator,
    chain: StrategyChain,
    target_device: Option<DeviceInfo>,
}

impl RecoveryEngine {
    pub fn new(validator: Validator, chain: StrategyChain) -> Self {
        Self {
            validator,
            chain,
            target_device: None,
        }
    }

    /// Standard chain with the configured limits and the given shared sources.
    pub fn from_config(config: &SnapguardConfig, sources: Vec<Arc<dyn SnapshotSource>>) -> Self {
        Self::new(
            Validator::new(config.validation.clone()),
            StrategyChain::standard(
                sources,
                config.recovery.lookup_timeout(),
                config.recovery.allow_regeneration,
            ),
        )
    }

    /// Steps captured on a different device are adapted to `device`.
    pub fn with_target_device(mut self, device: DeviceInfo) -> Self {
        self.target_device = Some(device).filter(DeviceInfo::has_identity);
        self
    }

    pub fn validator(&self) -> &Validator {
        &self.validator
    }

    pub async fn recover(&self, script: &Script) -> RecoveryReport {
        self.recover_with_cancel(script, &CancellationToken::new()).await
    }

    /// Like [`recover`](Self::recover), checking `cancel` before each step.
    /// Steps already recovered when the token fires are kept.
    pub async fn recover_with_cancel(
        &self,
        script: &Script,
        cancel: &CancellationToken,
    ) -> RecoveryReport {
        let span = obs::recovery_span(&script.name, script.steps.len());
        self.run(script, cancel).instrument(span).await
    }

    fn classify(&self, step: &Step, validation: &StepValidation) -> Option<FailureKind> {
        if !validation.is_valid {
            return match &step.snapshot {
                Some(snapshot) if snapshot.has_content() => Some(FailureKind::Corrupted),
                _ => Some(FailureKind::Missing),
            };
        }
        let target = self.target_device.as_ref()?;
        let snapshot = step.snapshot.as_ref()?;
        (snapshot.device.device_id != target.device_id).then_some(FailureKind::DeviceIncompatible)
    }

    async fn run(&self, script: &Script, cancel: &CancellationToken) -> RecoveryReport {
        let mut working = if script.snapshot_pool.is_some() {
            pool::restore(script)
        } else {
            script.clone()
        };
        let before = self.validator.validate_script(&working);

        let failing: Vec<(usize, FailureKind)> = before
            .steps
            .iter()
            .filter_map(|sv| {
                let step = working.steps.get(sv.step_index)?;
                Some((sv.step_index, self.classify(step, sv)?))
            })
            .collect();
        if failing.is_empty() {
            return RecoveryReport::clean(working);
        }

        let local: Vec<Arc<dyn SnapshotSource>> =
            vec![Arc::new(ScriptSiblings::from_validation(&working, &before))];

        let mut outcomes = Vec::new();
        let mut applied: Vec<StrategyId> = Vec::new();
        let mut original_issues = 0usize;
        let mut resolved_issues = 0usize;
        let mut remaining = Vec::new();
        let mut cancelled = false;

        for (index, failure) in failing {
            if cancel.is_cancelled() {
                obs::emit_recovery_cancelled(&script.name, index);
                cancelled = true;
                break;
            }
            let issues = match before.step(index) {
                Some(sv) if !sv.is_valid => sv.issues.clone(),
                _ => Vec::new(),
            };
            original_issues += issues.len();

            let outcome = self
                .recover_step(&mut working, index, failure, issues, &local)
                .await;

            resolved_issues += outcome.resolved_issues;
            if let Some(id) = outcome.recovered_by {
                if !applied.contains(&id) {
                    applied.push(id);
                }
            }
            remaining.extend(unresolved(&working, index, &outcome, &self.validator));
            outcomes.push(outcome);
        }

        let confidence_score = confidence_score(original_issues, resolved_issues, applied.len());
        obs::emit_recovery_finished(
            &script.name,
            original_issues,
            resolved_issues,
            confidence_score,
        );

        RecoveryReport {
            original_issues,
            resolved_issues,
            recommendations: report_recommendations(&remaining, &applied, original_issues),
            applied_strategies: applied,
            remaining_issues: remaining,
            confidence_score,
            step_outcomes: outcomes,
            cancelled,
            recovered_script: working,
            evaluated_at: Utc::now(),
        }
    }

    async fn recover_step(
        &self,
        working: &mut Script,
        index: usize,
        failure: FailureKind,
        issues: Vec<ValidationIssue>,
        local: &[Arc<dyn SnapshotSource>],
    ) -> StepOutcome {
        let step = working.steps[index].clone();
        let ctx = RecoveryContext {
            step_index: index,
            step: &step,
            failure,
            issues: &issues,
            target_device: self.target_device.as_ref(),
            local_sources: local,
        };

        let baseline = self.validator.validate_step(index, &step);
        let mut attempts = Vec::new();
        let mut recovered_by = None;
        let mut resolved = 0;

        for strategy in self.chain.plan(failure, &issues) {
            let mut result = strategy.attempt(&ctx).await;
            if result.success {
                match self.accept(&step, index, &baseline, &result) {
                    Some(after) => {
                        resolved = issues.iter().filter(|i| !after.has_issue(i.code)).count();
                        working.steps[index].snapshot = result.recovered.clone();
                        recovered_by = Some(result.strategy_id);
                    }
                    None => {
                        result.success = false;
                        result = result.with_warning("recovered snapshot made the step worse");
                    }
                }
            }
            obs::emit_strategy_attempted(&step.id, result.strategy_id, result.success);
            attempts.push(result);
            if recovered_by.is_some() {
                break;
            }
        }

        match recovered_by {
            Some(id) => obs::emit_step_recovered(&step.id, id, resolved),
            None => {
                let guidance = self.chain.fallback().attempt(&ctx).await;
                let codes: Vec<IssueCode> = issues.iter().map(|i| i.code).collect();
                obs::emit_step_unrecovered(&step.id, &codes);
                attempts.push(guidance);
            }
        }

        StepOutcome {
            step_index: index,
            step_id: step.id.clone(),
            failure,
            original_issues: issues,
            attempts,
            recovered_by,
            resolved_issues: resolved,
        }
    }

    /// Validation of the step with the strategy's snapshot, if that snapshot
    /// is valid on its own or no worse than what the step had.
    fn accept(
        &self,
        step: &Step,
        index: usize,
        baseline: &StepValidation,
        result: &RecoveryResult,
    ) -> Option<StepValidation> {
        let snapshot = result.recovered.as_ref()?;
        let candidate = Step {
            snapshot: Some(snapshot.clone()),
            ..step.clone()
        };
        let after = self.validator.validate_step(index, &candidate);
        if self.validator.validate_snapshot(snapshot).is_valid() || no_worse(baseline, &after) {
            Some(after)
        } else {
            None
        }
    }
}

fn step_severity(validation: &StepValidation) -> Severity {
    validation
        .validation
        .as_ref()
        .map_or(Severity::Critical, |v| v.severity)
}

/// No issue code absent before, and severity not raised.
fn no_worse(before: &StepValidation, after: &StepValidation) -> bool {
    after.issues.iter().all(|i| before.has_issue(i.code))
        && step_severity(after) <= step_severity(before)
}

/// Original issues of step `index` still present after recovery.
fn unresolved(
    working: &Script,
    index: usize,
    outcome: &StepOutcome,
    validator: &Validator,
) -> Vec<String> {
    if outcome.original_issues.is_empty() {
        return Vec::new();
    }
    let after = validator.validate_step(index, &working.steps[index]);
    outcome
        .original_issues
        .iter()
        .filter(|i| after.has_issue(i.code))
        .map(|i| format!("step {}: {}: {}", index + 1, i.code, i.message))
        .collect()
}

fn report_recommendations(
    remaining: &[String],
    applied: &[StrategyId],
    original_issues: usize,
) -> Vec<String> {
    let mut out = Vec::new();
    if !remaining.is_empty() {
        out.push("remaining issues need manual handling:".to_string());
        out.extend(remaining.iter().map(|r| format!("- {r}")));
    }
    if applied.contains(&StrategyId::XmlRegeneration) {
        out.push("script contains synthetic xml; test it in a real environment".to_string());
    }
    if applied.contains(&StrategyId::CacheLookup) {
        out.push("borrowed snapshots were used; verify they match the app version".to_string());
    }
    if applied.is_empty() && original_issues > 0 {
        out.push("automatic recovery failed; check the script source and integrity".to_string());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_formula() {
        assert_eq!(confidence_score(0, 0, 0), 100);
        assert_eq!(confidence_score(4, 4, 1), 85);
        assert_eq!(confidence_score(4, 2, 2), 50);
        assert_eq!(confidence_score(3, 3, 6), 100);
        assert_eq!(confidence_score(5, 0, 0), 0);
    }
}
