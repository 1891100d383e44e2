use colored::Colorize;
use incusflow_client::{PublishOptions, WaitPolicy};
use std::path::Path;
use std::time::Duration;

/// ゲストエージェント（`--cloud-init` なら cloud-init）の起動完了を待つ
pub async fn wait(
    config: Option<&Path>,
    instance: &str,
    cloud_init: bool,
    timeout: Option<u64>,
) -> anyhow::Result<bool> {
    let mut policy = if cloud_init {
        WaitPolicy::cloud_init()
    } else {
        WaitPolicy::agent_ready()
    };
    if let Some(secs) = timeout {
        policy = policy.with_timeout(Duration::from_secs(secs));
    }

    let client = super::connect(config)?;
    let what = if cloud_init { "cloud-init" } else { "ゲストエージェント" };
    println!(
        "{}",
        format!("{} の{}を待機中... (最大{}秒)", instance, what, policy.timeout.as_secs()).blue()
    );

    let instances = client.instances();
    let elapsed = if cloud_init {
        instances.wait_cloud_init(instance, policy).await?
    } else {
        instances.wait_ready(instance, policy).await?
    };
    println!(
        "{}",
        format!("✓ {} の準備ができました ({:.1}秒)", instance, elapsed.as_secs_f64())
            .green()
            .bold()
    );
    Ok(true)
}

/// スナップショットをイメージとして公開する
pub async fn publish(
    config: Option<&Path>,
    instance: &str,
    snapshot: &str,
    aliases: Vec<String>,
    public: bool,
) -> anyhow::Result<bool> {
    let client = super::connect(config)?;
    println!("{}", format!("{}/{} を公開中...", instance, snapshot).blue());

    let options = PublishOptions {
        public,
        aliases,
        ..Default::default()
    };
    let fingerprint = client
        .instances()
        .publish_snapshot(instance, snapshot, &options)
        .await?;
    println!("{}", "✓ イメージを作成しました".green().bold());
    println!("フィンガープリント: {}", fingerprint.cyan());
    for alias in &options.aliases {
        println!("  エイリアス: {}", alias);
    }
    Ok(true)
}
