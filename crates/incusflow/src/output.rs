//! 実行結果の表示

use colored::Colorize;
use incusflow_converge::{Applied, ConvergeError, Diff, Outcome, Report, RotationReport};

/// 1 ステート分の結果を表示
pub fn print_state(id: &str, function: &str, result: &Result<Outcome, ConvergeError>) {
    match result {
        Ok(outcome) => {
            let line = format!("{} [{}] {}: {}", marker(outcome.applied), id, function, outcome.comment);
            match outcome.applied {
                Applied::Changed => println!("{}", line.green()),
                Applied::Pending => println!("{}", line.yellow()),
                Applied::Unchanged => println!("{}", line),
            }
            if let Some(realized) = &outcome.realized
                && realized != &outcome.name
            {
                println!("    → {}", realized.cyan());
            }
            print_diff(&outcome.diff);
        }
        Err(e) => {
            println!("{}", format!("✗ [{}] {}: {}", id, function, e).red());
        }
    }
}

fn marker(applied: Applied) -> &'static str {
    match applied {
        Applied::Changed => "✓",
        Applied::Pending => "~",
        Applied::Unchanged => "=",
    }
}

/// 差分を YAML で字下げして表示
pub fn print_diff(diff: &Diff) {
    if diff.is_empty() {
        return;
    }
    match serde_yaml::to_string(diff) {
        Ok(yaml) => {
            for line in yaml.lines() {
                println!("    {}", line.dimmed());
            }
        }
        Err(e) => tracing::warn!("差分を表示できません: {}", e),
    }
}

pub fn print_report(report: &Report) {
    for state in &report.states {
        print_state(&state.id, &state.function, &state.result);
    }
    println!();
    let summary = report.summary();
    let line = format!("結果: {}", summary);
    if summary.failed > 0 {
        println!("{}", line.red().bold());
    } else if summary.pending > 0 {
        println!("{}", line.yellow().bold());
    } else {
        println!("{}", line.green().bold());
    }
}

pub fn print_rotation(report: &RotationReport) {
    println!("一致したスナップショット: {}個", report.matched);
    let verb = if report.dry_run { "削除予定" } else { "削除" };
    if report.deleted.is_empty() && report.failed.is_empty() {
        println!("{}", "削除するスナップショットはありません".dimmed());
    }
    for name in &report.deleted {
        let line = format!("  - {} ({})", name, verb);
        if report.dry_run {
            println!("{}", line.yellow());
        } else {
            println!("{}", line.green());
        }
    }
    for failure in &report.failed {
        println!("{}", format!("  ✗ {}: {}", failure.name, failure.error).red());
    }
}
