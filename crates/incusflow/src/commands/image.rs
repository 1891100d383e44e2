use anyhow::Context as _;
use colored::Colorize;
use std::path::Path;

/// リモートから最新版を取り込み直す
pub async fn refresh(config: Option<&Path>, fingerprint: &str) -> anyhow::Result<bool> {
    let client = super::connect(config)?;
    println!("{}", format!("イメージ {} を更新中...", fingerprint).blue());
    client.images().refresh(fingerprint).await?;
    println!("{}", "✓ 更新しました".green().bold());
    Ok(true)
}

/// 非公開イメージ取得用のワンタイムシークレットを発行する
pub async fn secret(config: Option<&Path>, fingerprint: &str) -> anyhow::Result<bool> {
    let client = super::connect(config)?;
    let secret = client.images().secret(fingerprint).await?;
    println!("{}", secret);
    Ok(true)
}

/// イメージをファイルへ書き出す
pub async fn export(config: Option<&Path>, fingerprint: &str, output: &Path) -> anyhow::Result<bool> {
    let client = super::connect(config)?;
    println!("{}", format!("イメージ {} を書き出し中...", fingerprint).blue());
    let data = client.images().export(fingerprint).await?;
    tokio::fs::write(output, &data)
        .await
        .with_context(|| format!("書き込みに失敗しました: {}", output.display()))?;
    println!(
        "{}",
        format!("✓ {} ({} バイト)", output.display(), data.len()).green().bold()
    );
    Ok(true)
}
