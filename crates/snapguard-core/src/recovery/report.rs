//! Human-readable and on-disk forms of recovery and validation results.

use std::path::{Path, PathBuf};

use crate::domain::{ContentHash, RecoveryReport, Result, ScriptValidationResult, SnapguardError};

/// Markdown summary of a recovery pass.
pub fn render_recovery_report_md(report: &RecoveryReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "# Recovery Report: {}\n\n",
        display_name(&report.recovered_script.name)
    ));
    out.push_str(&format!(
        "- original issues: {}\n- resolved issues: {}\n- confidence: {}\n",
        report.original_issues, report.resolved_issues, report.confidence_score
    ));
    if report.cancelled {
        out.push_str("- **cancelled**: later steps were not processed\n");
    }
    out.push('\n');

    if !report.applied_strategies.is_empty() {
        out.push_str("## Strategies\n");
        for s in &report.applied_strategies {
            out.push_str(&format!("- `{}`\n", s));
        }
        out.push('\n');
    }

    if !report.step_outcomes.is_empty() {
        out.push_str("## Steps\n");
        out.push_str("| step | failure | recovered by | resolved |\n");
        out.push_str("|------|---------|--------------|----------|\n");
        for o in &report.step_outcomes {
            let by = o
                .recovered_by
                .map(|s| s.to_string())
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "| {} `{}` | {:?} | {} | {}/{} |\n",
                o.step_index + 1,
                o.step_id,
                o.failure,
                by,
                o.resolved_issues,
                o.original_issues.len()
            ));
        }
        out.push('\n');
    }

    if !report.recommendations.is_empty() {
        out.push_str("## Recommendations\n");
        for r in &report.recommendations {
            if r.starts_with("- ") {
                out.push_str(&format!("  {}\n", r));
            } else {
                out.push_str(&format!("- {}\n", r));
            }
        }
    }
    out
}

/// Markdown summary of a script validation.
pub fn render_validation_md(result: &ScriptValidationResult) -> String {
    let mut out = String::new();
    out.push_str("# Validation\n\n");
    out.push_str(&format!(
        "- valid: {}\n- steps: {}/{} valid\n- compatibility: {}\n\n",
        result.is_valid, result.valid_steps, result.total_steps, result.compatibility_score
    ));

    let failing: Vec<_> = result.steps.iter().filter(|s| !s.is_valid).collect();
    if !failing.is_empty() {
        out.push_str("## Failing Steps\n");
        for s in failing {
            let codes: Vec<&str> = s.issues.iter().map(|i| i.code.as_str()).collect();
            out.push_str(&format!(
                "- {} `{}`: {}\n",
                s.step_index + 1,
                s.step_id,
                codes.join(", ")
            ));
        }
        out.push('\n');
    }

    for (title, items) in [
        ("Warnings", &result.warnings),
        ("Recommendations", &result.recommendations),
    ] {
        if items.is_empty() {
            continue;
        }
        out.push_str(&format!("## {}\n", title));
        for item in items {
            out.push_str(&format!("- {}\n", item));
        }
        out.push('\n');
    }
    out
}

fn display_name(name: &str) -> &str {
    if name.trim().is_empty() {
        "(unnamed)"
    } else {
        name
    }
}

/// Persist `<dir>/<run_id>/recovery.json` and `<dir>/<run_id>/recovery.digest`.
pub fn write_recovery_artifact(
    report: &RecoveryReport,
    dir: &Path,
    run_id: &str,
) -> Result<PathBuf> {
    let run_dir = dir.join(run_id);
    std::fs::create_dir_all(&run_dir)?;

    let artifact_path = run_dir.join("recovery.json");
    let digest_path = run_dir.join("recovery.digest");
    let json = serde_json::to_vec_pretty(report)?;
    let digest = ContentHash::from_bytes(&json);

    std::fs::write(&artifact_path, &json)?;
    std::fs::write(&digest_path, digest.as_str().as_bytes())?;

    Ok(artifact_path)
}

/// Read `<dir>/<run_id>/recovery.json`, verifying it against its digest.
pub fn read_recovery_artifact(dir: &Path, run_id: &str) -> Result<RecoveryReport> {
    let run_dir = dir.join(run_id);
    let json = std::fs::read(run_dir.join("recovery.json"))?;
    let expected = std::fs::read_to_string(run_dir.join("recovery.digest"))?;
    let actual = ContentHash::from_bytes(&json);
    if expected.trim() != actual.as_str() {
        return Err(SnapguardError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual: actual.as_str().to_string(),
        });
    }

    Ok(serde_json::from_slice(&json)?)
}
