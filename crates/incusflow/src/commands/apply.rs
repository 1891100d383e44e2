use crate::output;
use anyhow::Context as _;
use colored::Colorize;
use incusflow_converge::{Context, Registry, StateFile};
use std::path::Path;

/// ステートファイルを適用する（`dry_run` なら plan）
///
/// 全ステートが成功したら `true`。
pub async fn handle(config: Option<&Path>, file: &Path, dry_run: bool) -> anyhow::Result<bool> {
    let states = StateFile::load(file)
        .with_context(|| format!("ステートファイルを読み込めません: {}", file.display()))?;

    if dry_run {
        println!("{}", "変更内容を確認中（実際には変更しません）...".blue());
    } else {
        println!("{}", "ステートを適用中...".blue());
    }
    println!("ステートファイル: {} ({}件)", file.display().to_string().cyan(), states.len());

    if states.is_empty() {
        println!("{}", "ステートがありません".dimmed());
        return Ok(true);
    }

    let client = super::connect(config)?;
    let ctx = Context::new(client).with_dry_run(dry_run);
    println!();
    let report = Registry::run(&ctx, &states).await;
    output::print_report(&report);
    Ok(report.is_success())
}
