//! Result and catalog rendering

use ruckus_core::{Experiment, FaultLifetime, SessionReport, TargetStatus};
use serde::Serialize;

/// Plain-text session summary
#[must_use]
pub fn session_text(report: &SessionReport) -> String {
    let result = &report.result;
    let mut lines = vec![
        format!("Experiment: {}", result.experiment),
        format!("Session:    {}", result.session_id),
        format!("Verdict:    {:?}", result.verdict),
    ];
    if let Some(step) = &result.fail_step {
        lines.push(format!("Fail step:  {step}"));
    }
    lines.push(format!(
        "Targets:    {} reverted, {} skipped, {} failed",
        result.count(TargetStatus::Reverted),
        result.count(TargetStatus::Skipped),
        result.failed_targets()
    ));

    for target in &result.targets {
        let error = target
            .error
            .as_ref()
            .map(|e| format!(" error={e}"))
            .unwrap_or_default();
        lines.push(format!(
            "  {:<24} {:<10} {:<16} iterations={}{error}",
            target.name,
            format!("{:?}", target.status).to_lowercase(),
            target.phase.label(),
            target.iterations
        ));
        lines.extend(target.warnings.iter().map(|w| format!("    warning: {w}")));
    }
    lines.extend(result.warnings.iter().map(|w| format!("Warning: {w}")));

    if let Some(abort) = &report.abort {
        lines.push(format!(
            "Aborted:    {} reverted, {} helper(s) deleted, {} failure(s)",
            abort.reverted.len(),
            abort.deleted_helpers.len(),
            abort.failures.len()
        ));
    }
    lines.push(format!("Exit code:  {}", report.exit_code()));
    lines.join("\n")
}

/// JSON session report
///
/// # Errors
///
/// Returns the serializer error, which only happens for non-string map keys.
pub fn session_json(report: &SessionReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Catalog entry as listed by `ruckus list`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogEntry {
    /// Experiment name
    pub name: &'static str,
    /// Target kind
    pub target: String,
    /// Whether the helper runs until deleted
    pub bounded: bool,
    /// Whether the fault undoes itself
    pub self_reverting: bool,
    /// Description
    pub description: &'static str,
}

/// Every built-in experiment
#[must_use]
pub fn catalog() -> Vec<CatalogEntry> {
    Experiment::ALL
        .into_iter()
        .map(|e| CatalogEntry {
            name: e.name(),
            target: e.target_kind().to_string(),
            bounded: e.lifetime() == FaultLifetime::Bounded,
            self_reverting: e.self_reverting(),
            description: e.description(),
        })
        .collect()
}

/// Plain-text catalog
#[must_use]
pub fn catalog_text() -> String {
    catalog()
        .into_iter()
        .map(|e| format!("{:<20} {:<9} {}", e.name, e.target, e.description))
        .collect::<Vec<_>>()
        .join("\n")
}
