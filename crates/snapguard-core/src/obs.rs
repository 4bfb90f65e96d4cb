//! Structured events for snapshot validation and recovery.
//!
//! Every event carries an `event = "<area>.<what>"` field so log pipelines
//! can filter without parsing messages.

use tracing::{debug, info, warn};

use crate::domain::{IssueCode, Severity, StrategyId};

/// Span covering one recovery pass. Attach it with
/// [`tracing::Instrument::instrument`] so it follows the future across awaits.
pub fn recovery_span(script_name: &str, steps: usize) -> tracing::Span {
    tracing::info_span!("snapguard.recovery", script = %script_name, steps = steps)
}

pub fn emit_snapshot_validated(step_id: &str, severity: Severity, score: u32, issues: usize) {
    debug!(
        event = "snapshot.validated",
        step_id = %step_id,
        severity = ?severity,
        score = score,
        issues = issues,
    );
}

pub fn emit_script_validated(script: &str, valid_steps: usize, total_steps: usize, score: u32) {
    info!(
        event = "script.validated",
        script = %script,
        valid_steps = valid_steps,
        total_steps = total_steps,
        compatibility_score = score,
    );
}

pub fn emit_strategy_attempted(step_id: &str, strategy: StrategyId, success: bool) {
    debug!(
        event = "recovery.strategy_attempted",
        step_id = %step_id,
        strategy = %strategy,
        success = success,
    );
}

pub fn emit_step_recovered(step_id: &str, strategy: StrategyId, resolved: usize) {
    info!(
        event = "recovery.step_recovered",
        step_id = %step_id,
        strategy = %strategy,
        resolved_issues = resolved,
    );
}

pub fn emit_step_unrecovered(step_id: &str, remaining: &[IssueCode]) {
    let codes: Vec<&str> = remaining.iter().map(|c| c.as_str()).collect();
    warn!(
        event = "recovery.step_unrecovered",
        step_id = %step_id,
        remaining = ?codes,
    );
}

pub fn emit_recovery_finished(script: &str, original: usize, resolved: usize, confidence: u32) {
    info!(
        event = "recovery.finished",
        script = %script,
        original_issues = original,
        resolved_issues = resolved,
        confidence_score = confidence,
    );
}

pub fn emit_recovery_cancelled(script: &str, at_step: usize) {
    warn!(event = "recovery.cancelled", script = %script, at_step = at_step);
}

pub fn emit_lookup_timed_out(source: &str, timeout_ms: u64) {
    warn!(event = "recovery.lookup_timeout", source = %source, timeout_ms = timeout_ms);
}

pub fn emit_cache_miss(key: &str) {
    debug!(event = "cache.miss", key = %key);
}

pub fn emit_cache_swept(removed: usize, remaining: usize) {
    info!(event = "cache.swept", removed = removed, remaining = remaining);
}
