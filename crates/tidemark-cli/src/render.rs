use tidemark_runner::{MigrationOutcome, MigrationState, RunReport, StatusReport};

const WIDTH: usize = 78;
const ID_W: usize = 28;
const STATUS_W: usize = 9;
const TIME_W: usize = 8;
// borders, padding and column gaps take the remaining 8
const DESC_W: usize = WIDTH - 8 - ID_W - STATUS_W - TIME_W;

/// Boxed summary of a run, run-next or rollback.
pub fn run_report(target: &str, command: &str, report: &RunReport) -> String {
    let mut lines = vec![top(&format!("{target} · {command}"))];
    for outcome in &report.outcomes {
        lines.push(outcome_row(outcome));
        if let Some(detail) = outcome.error.as_deref().or(outcome.reason.as_deref()) {
            lines.push(full_row(&format!("  ↳ {detail}")));
        }
    }
    match (&report.message, report.outcomes.is_empty()) {
        (Some(message), _) => lines.push(full_row(message)),
        (None, true) => lines.push(full_row("nothing to do")),
        (None, false) => {}
    }
    lines.push(bottom(&format!(
        "{}: {} applied, {} reverted, {} skipped, {} failed ({}ms)",
        report.status.as_str(),
        report.applied,
        report.reverted,
        report.skipped,
        report.failed,
        report.duration_ms
    )));
    lines.join("\n")
}

/// Boxed listing of applied and pending migrations.
pub fn status_report(target: &str, report: &StatusReport) -> String {
    let mut lines = vec![top(&format!("{target} · status"))];
    if report.migrations.is_empty() {
        lines.push(full_row("no migrations found"));
    }
    lines.extend(report.migrations.iter().map(state_row));
    lines.push(bottom(&format!(
        "{} applied, {} pending",
        report.applied, report.pending
    )));
    lines.join("\n")
}

pub fn target_error(target: &str, error: &str) -> String {
    [
        top(&format!("{target} · error")),
        full_row(error),
        bottom("error"),
    ]
    .join("\n")
}

fn outcome_row(outcome: &MigrationOutcome) -> String {
    let time = outcome
        .duration_ms
        .map(|ms| format!("{ms}ms"))
        .unwrap_or_default();
    row(&outcome.id, outcome.status.as_str(), &outcome.description, &time)
}

fn state_row(state: &MigrationState) -> String {
    let (status, when) = match state.applied_at {
        Some(at) => ("applied", at.format("%Y-%m-%d").to_string()),
        None => ("pending", String::new()),
    };
    row(&state.id, status, &state.description, &when)
}

fn row(id: &str, status: &str, description: &str, time: &str) -> String {
    let id = fit(id, ID_W);
    let status = fit(status, STATUS_W);
    let description = fit(description, DESC_W);
    let time = fit(time, TIME_W + 2);
    format!("│ {id:<ID_W$} {status:<STATUS_W$} {description:<DESC_W$} {time:>tw$}│", tw = TIME_W + 2)
}

fn full_row(text: &str) -> String {
    let inner = WIDTH - 3;
    format!("│ {:<inner$}│", fit(text, inner))
}

fn top(title: &str) -> String {
    let title = fit(title, WIDTH - 8);
    let dashes = WIDTH - 2 - title.chars().count() - 5;
    format!("╭─── {title} {}╮", "─".repeat(dashes))
}

fn bottom(summary: &str) -> String {
    let summary = fit(summary, WIDTH - 8);
    let dashes = WIDTH - 2 - summary.chars().count() - 5;
    format!("╰─── {summary} {}╯", "─".repeat(dashes))
}

/// Truncate to `width` characters, marking the cut with an ellipsis.
fn fit(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(width.saturating_sub(1)).collect();
    cut.push('…');
    cut
}
