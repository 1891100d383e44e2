mod commands;
mod output;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "incusflow")]
#[command(about = "宣言した状態へ、Incus を収束させる。", long_about = None)]
struct Cli {
    /// 接続設定ファイル（省略時は INCUSFLOW_CONFIG → ./incusflow.yaml → ~/.config/incusflow/config.yaml）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// デバッグログを出力
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// ステートファイルを適用
    Apply {
        /// ステートファイル (YAML)
        file: PathBuf,
    },
    /// 変更内容を表示（何も変更しない）
    Plan {
        /// ステートファイル (YAML)
        file: PathBuf,
    },
    /// スナップショットをローテーション（古いものから削除）
    Rotate {
        /// 対象インスタンス
        #[arg(long, conflicts_with_all = ["pool", "volume"], required_unless_present = "volume")]
        instance: Option<String>,
        /// ボリュームのストレージプール
        #[arg(long, requires = "volume")]
        pool: Option<String>,
        /// 対象ボリューム
        #[arg(long, requires = "pool")]
        volume: Option<String>,
        /// ボリュームの種類
        #[arg(long, default_value = incusflow_client::DEFAULT_VOLUME_TYPE)]
        volume_type: String,
        /// 対象スナップショット名のパターン（例: "daily-*"）
        #[arg(long)]
        pattern: String,
        /// 残す数
        #[arg(long)]
        keep: usize,
        /// 削除対象を表示するだけ
        #[arg(long)]
        dry_run: bool,
    },
    /// インスタンスの起動完了を待つ
    Wait {
        /// 対象インスタンス
        instance: String,
        /// cloud-init の完了まで待つ
        #[arg(long)]
        cloud_init: bool,
        /// 待機の上限（秒）
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// スナップショットをイメージとして公開
    Publish {
        /// 対象インスタンス
        instance: String,
        /// スナップショット名
        snapshot: String,
        /// 付与するエイリアス（複数指定可）
        #[arg(long = "alias")]
        aliases: Vec<String>,
        /// 公開イメージにする
        #[arg(long)]
        public: bool,
    },
    /// イメージを操作
    #[command(subcommand)]
    Image(ImageCommands),
    /// 使用できるステート関数を一覧表示
    Functions,
    /// バージョン情報を表示
    Version,
}

/// イメージ操作のサブコマンド
#[derive(Subcommand)]
enum ImageCommands {
    /// 取得元から最新版を取り込み直す
    Refresh {
        /// フィンガープリント
        fingerprint: String,
    },
    /// ワンタイムシークレットを発行
    Secret {
        /// フィンガープリント
        fingerprint: String,
    },
    /// イメージをファイルへ書き出す
    Export {
        /// フィンガープリント
        fingerprint: String,
        /// 出力先ファイル
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // ログは stderr へ。RUST_LOG が無ければ info（--verbose で debug）
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let success = match cli.command {
        Commands::Version => {
            println!("incusflow {}", env!("CARGO_PKG_VERSION"));
            true
        }
        Commands::Functions => {
            commands::functions::handle();
            true
        }
        Commands::Apply { file } => {
            commands::apply::handle(cli.config.as_deref(), &file, false).await?
        }
        Commands::Plan { file } => {
            commands::apply::handle(cli.config.as_deref(), &file, true).await?
        }
        Commands::Wait {
            instance,
            cloud_init,
            timeout,
        } => commands::instance::wait(cli.config.as_deref(), &instance, cloud_init, timeout).await?,
        Commands::Publish {
            instance,
            snapshot,
            aliases,
            public,
        } => {
            commands::instance::publish(cli.config.as_deref(), &instance, &snapshot, aliases, public)
                .await?
        }
        Commands::Image(command) => match command {
            ImageCommands::Refresh { fingerprint } => {
                commands::image::refresh(cli.config.as_deref(), &fingerprint).await?
            }
            ImageCommands::Secret { fingerprint } => {
                commands::image::secret(cli.config.as_deref(), &fingerprint).await?
            }
            ImageCommands::Export {
                fingerprint,
                output,
            } => commands::image::export(cli.config.as_deref(), &fingerprint, &output).await?,
        },
        Commands::Rotate {
            instance,
            pool,
            volume,
            volume_type,
            pattern,
            keep,
            dry_run,
        } => {
            let target = match (instance, pool, volume) {
                (Some(instance), _, _) => commands::rotate::Target::Instance(instance),
                (None, Some(pool), Some(volume)) => commands::rotate::Target::Volume {
                    pool,
                    volume,
                    volume_type,
                },
                _ => anyhow::bail!("--instance か --pool/--volume のどちらかを指定してください"),
            };
            commands::rotate::handle(cli.config.as_deref(), target, &pattern, keep, dry_run).await?
        }
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}
