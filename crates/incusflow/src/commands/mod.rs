pub mod apply;
pub mod functions;
pub mod image;
pub mod instance;
pub mod rotate;

use anyhow::Context as _;
use colored::Colorize;
use incusflow_client::IncusClient;
use std::path::Path;

/// 設定を読み込み、コントロールプレーンへのクライアントを作る
///
/// Ctrl-C で実行中の待機を中断する。
pub fn connect(config: Option<&Path>) -> anyhow::Result<IncusClient> {
    let settings = match config {
        Some(path) => incusflow_config::load_from(path),
        None => incusflow_config::load(),
    }
    .context("接続設定の読み込みに失敗しました")?;

    let client = IncusClient::from_settings(&settings).context("クライアントの初期化に失敗しました")?;
    println!("接続先: {}", client.endpoint().cyan());

    let token = client.cancellation().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("{}", "中断しています...".yellow());
            token.cancel();
        }
    });
    Ok(client)
}
