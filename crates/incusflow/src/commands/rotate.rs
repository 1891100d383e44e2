use crate::output;
use colored::Colorize;
use incusflow_converge::{ConvergeError, RotationPolicy, rotate};
use std::path::Path;

/// ローテーション対象のスナップショットの持ち主
pub enum Target {
    Instance(String),
    Volume {
        pool: String,
        volume: String,
        volume_type: String,
    },
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Instance(name) => write!(f, "インスタンス {}", name),
            Target::Volume {
                pool,
                volume,
                volume_type,
            } => write!(f, "ボリューム {}/{}/{}", pool, volume_type, volume),
        }
    }
}

pub async fn handle(
    config: Option<&Path>,
    target: Target,
    pattern: &str,
    keep: usize,
    dry_run: bool,
) -> anyhow::Result<bool> {
    let policy = RotationPolicy::new(pattern, keep)?;
    println!(
        "{}",
        format!("{} のスナップショットをローテーション中...", target).blue()
    );
    println!("パターン: {} / 保持数: {}", pattern.cyan(), keep);

    let client = super::connect(config)?;
    let snapshots = match &target {
        Target::Instance(name) => client.instance_snapshots(name),
        Target::Volume {
            pool,
            volume,
            volume_type,
        } => client.volume_snapshots(pool, volume_type, volume),
    };

    match rotate(&snapshots, &policy, dry_run).await {
        Ok(report) => {
            output::print_rotation(&report);
            Ok(true)
        }
        Err(ConvergeError::Rotation { report }) => {
            output::print_rotation(&report);
            println!();
            println!(
                "{}",
                format!("✗ {}個のスナップショットを削除できませんでした", report.failed.len())
                    .red()
                    .bold()
            );
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
